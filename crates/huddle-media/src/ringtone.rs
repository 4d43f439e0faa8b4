use std::sync::Arc;

use tracing::debug;

/// Plays the incoming-call sound.
pub trait RingtoneOutput: Send + Sync {
    /// Start playing on a loop from the beginning.
    fn start_loop(&self);
    /// Stop and rewind.
    fn stop(&self);
}

/// A ringing ringtone. Stops when told to or when dropped.
pub struct Ringtone {
    output: Arc<dyn RingtoneOutput>,
    playing: bool,
}

impl Ringtone {
    pub fn start(output: Arc<dyn RingtoneOutput>) -> Self {
        output.start_loop();
        debug!("Ringtone started");
        Self {
            output,
            playing: true,
        }
    }

    pub fn stop(&mut self) {
        if self.playing {
            self.output.stop();
            self.playing = false;
            debug!("Ringtone stopped");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Drop for Ringtone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Output for headless runs: logs instead of playing.
#[derive(Debug, Default)]
pub struct SilentRingtone;

impl RingtoneOutput for SilentRingtone {
    fn start_loop(&self) {
        debug!("(silent) ring ring");
    }

    fn stop(&self) {}
}
