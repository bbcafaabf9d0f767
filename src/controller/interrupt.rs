use super::session::SessionController;
use crate::audio::{AudioCapture, AudioPlayback, TrackOffset};
use crate::client::RemoteSession;
use tracing::{debug, info, warn};

impl<R, C, P> SessionController<R, C, P>
where
    R: RemoteSession,
    C: AudioCapture,
    P: AudioPlayback,
{
    /// Stops playback and truncates the interrupted response at the point the
    /// user actually heard.
    ///
    /// A rejected cancellation is logged and dropped; playback is already
    /// stopped either way.
    pub(super) async fn interrupt_playback(&mut self) -> Option<TrackOffset> {
        let Some(track) = self.playback.interrupt().await else {
            debug!("[Controller] Interrupt: nothing was playing.");
            return None;
        };
        let played = track.offset(self.config.sample_rate);
        info!(
            "[Controller] Interrupted {} after {:?}.",
            track.track_id, played
        );
        if let Err(e) = self.remote.cancel_response(&track.track_id, played).await {
            warn!(
                "[Controller] Cancellation of {} rejected: {}",
                track.track_id, e
            );
        }
        Some(track)
    }
}
