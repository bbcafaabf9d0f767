pub mod builder;
pub mod conversation;
pub mod handle;
pub mod handlers;
pub mod session;

mod connection;

pub use builder::{DEFAULT_REALTIME_URL, RealtimeClientBuilder};
pub use conversation::{ItemSnapshot, ItemStatus, ToolCall};
pub use handle::RealtimeClient;
pub use handlers::ToolHandler;
pub use session::{ItemDelta, RemoteSession, SessionEvent};
