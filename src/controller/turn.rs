use super::session::SessionController;
use crate::audio::{AudioCapture, AudioPlayback, CaptureStatus};
use crate::client::RemoteSession;
use crate::error::RealtimeError;
use crate::types::{SessionUpdate, TurnDetection, TurnDetectionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Who decides where a user turn ends.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Push-to-talk: the operator starts and stops each turn.
    #[default]
    Manual,
    /// The server's voice-activity detection segments turns.
    ServerVad,
}

impl TurnMode {
    pub fn turn_detection(self) -> Option<TurnDetection> {
        match self {
            TurnMode::Manual => None,
            TurnMode::ServerVad => Some(TurnDetection::server_vad()),
        }
    }
}

impl From<Option<TurnDetectionKind>> for TurnMode {
    fn from(kind: Option<TurnDetectionKind>) -> Self {
        match kind {
            Some(TurnDetectionKind::ServerVad) => TurnMode::ServerVad,
            None => TurnMode::Manual,
        }
    }
}

/// Manual-mode turn state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Capturing,
    AwaitingResponse,
}

impl<R, C, P> SessionController<R, C, P>
where
    R: RemoteSession,
    C: AudioCapture,
    P: AudioPlayback,
{
    /// Push-to-talk press: silences the agent, then starts forwarding frames.
    ///
    /// Ignored in server VAD mode, where capture is always running.
    pub async fn start_recording(&mut self) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        if self.session.turn_mode != TurnMode::Manual {
            debug!("[Controller] Start recording ignored in server VAD mode.");
            return Ok(());
        }
        if self.turn_state == TurnState::Capturing {
            return Ok(());
        }

        self.interrupt_playback().await;
        self.capture
            .record(self.frames_tx.clone())
            .await
            .map_err(|e| RealtimeError::Capture(e.to_string()))?;
        self.turn_state = TurnState::Capturing;
        info!("[Controller] Recording.");
        Ok(())
    }

    /// Push-to-talk release: flushes the turn's audio and requests a response.
    pub async fn stop_recording(&mut self) -> Result<(), RealtimeError> {
        if self.session.turn_mode != TurnMode::Manual || self.turn_state != TurnState::Capturing {
            debug!("[Controller] Stop recording ignored: not capturing.");
            return Ok(());
        }
        self.capture.pause().await?;
        self.forward_queued_frames().await;
        self.turn_state = TurnState::AwaitingResponse;
        info!("[Controller] Recording stopped, requesting response.");
        self.remote.create_response().await
    }

    /// Switches turn-taking mode. In-flight items are left alone.
    pub async fn set_turn_mode(&mut self, mode: TurnMode) -> Result<(), RealtimeError> {
        if mode == self.session.turn_mode {
            return Ok(());
        }
        info!(
            "[Controller] Turn mode {:?} -> {:?}.",
            self.session.turn_mode, mode
        );
        let was_recording =
            self.is_connected() && self.capture.status() == CaptureStatus::Recording;
        if was_recording {
            self.capture.pause().await?;
            self.forward_queued_frames().await;
        }

        if let Err(e) = self
            .remote
            .update_session(SessionUpdate::turn_detection(mode.turn_detection()))
            .await
        {
            warn!(
                "[Controller] Turn mode unchanged, session update failed: {}",
                e
            );
            if was_recording {
                if let Err(resume) = self.capture.record(self.frames_tx.clone()).await {
                    warn!("[Controller] Capture not resumed: {}", resume);
                }
            }
            return Err(e);
        }
        if self.turn_state == TurnState::Capturing {
            self.turn_state = TurnState::Idle;
        }
        self.session.turn_mode = mode;
        self.config.turn_mode = mode;

        if mode == TurnMode::ServerVad && self.is_connected() {
            self.capture.record(self.frames_tx.clone()).await?;
        }
        Ok(())
    }
}
