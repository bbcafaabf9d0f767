pub mod command;
pub mod config;
pub mod event_log;
mod interrupt;
pub mod memory;
pub mod reconciler;
pub mod session;
pub mod turn;

#[cfg(test)]
mod tests;

pub use command::ControllerHandle;
pub use config::{ControllerConfig, InterviewBrief};
pub use event_log::{EventLog, RealtimeEventLogEntry};
pub use memory::MemoryStore;
pub use reconciler::{ConversationItem, ConversationReconciler};
pub use session::{Session, SessionController, SessionStatus};
pub use turn::{TurnMode, TurnState};
