//! Realtime session controller for spoken interview practice.
//!
//! The crate owns the lifecycle of a bidirectional audio/event stream to a
//! realtime conversational agent: who may speak, how streamed deltas become a
//! transcript, and how agent speech is cut off when the user interrupts.
//!
//! The main entry point is [`SessionController`], generic over the three
//! collaborators it drives:
//!
//! - a [`RemoteSession`] (usually a [`RealtimeClient`] speaking the realtime
//!   websocket protocol),
//! - an [`AudioCapture`] device (usually a [`FrameCapture`] fed by a microphone
//!   callback),
//! - an [`AudioPlayback`] engine (usually a [`StreamPlayer`] drained by a
//!   speaker callback).

pub mod audio;
pub mod client;
pub mod controller;
pub mod error;
pub mod types;

pub use audio::{
    AudioAsset, AudioCapture, AudioPlayback, CaptureInput, CaptureStatus, FrameCapture,
    PlaybackOutput, StreamPlayer, TrackOffset,
};
pub use client::{
    ItemDelta, ItemSnapshot, ItemStatus, RealtimeClient, RealtimeClientBuilder, RemoteSession,
    SessionEvent, ToolHandler,
};
pub use controller::{
    ControllerConfig, ControllerHandle, ConversationItem, EventLog, InterviewBrief, MemoryStore,
    RealtimeEventLogEntry, Session, SessionController, SessionStatus, TurnMode, TurnState,
};
pub use error::RealtimeError;

/// Sample rate (24kHz) of the PCM16 mono audio exchanged with the agent in both directions.
pub const SAMPLE_RATE_HZ: u32 = 24000;
