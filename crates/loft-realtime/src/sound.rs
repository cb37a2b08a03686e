use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, trace};

use loft_types::models::NotificationKind;

use crate::effects::EffectError;

const NOTIFICATION_SAMPLE: &str = "/sounds/notification.mp3";
const SAMPLE_VOLUME: f32 = 0.5;
const TONE_DURATION: Duration = Duration::from_millis(300);

/// What to play for a notification kind: a sample, and the tone to fall
/// back to when the sample cannot be played.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundCue {
    pub kind: NotificationKind,
    pub sample: &'static str,
    pub volume: f32,
    pub fallback_hz: u32,
    pub fallback_duration: Duration,
}

pub fn cue_for(kind: NotificationKind) -> SoundCue {
    let fallback_hz = match kind {
        NotificationKind::Success => 800,
        NotificationKind::Info => 600,
        NotificationKind::Warning => 400,
        NotificationKind::Error => 300,
    };
    SoundCue {
        kind,
        sample: NOTIFICATION_SAMPLE,
        volume: SAMPLE_VOLUME,
        fallback_hz,
        fallback_duration: TONE_DURATION,
    }
}

/// Sink for sound cues.
pub trait AudioOutput: Send + Sync {
    fn play(&self, cue: &SoundCue) -> Result<(), EffectError>;
}

/// Renders cues as log lines.
pub struct TracingAudio;

impl AudioOutput for TracingAudio {
    fn play(&self, cue: &SoundCue) -> Result<(), EffectError> {
        info!(
            kind = cue.kind.as_str(),
            sample = cue.sample,
            volume = cue.volume,
            fallback_hz = cue.fallback_hz,
            "sound cue"
        );
        Ok(())
    }
}

/// Discards every cue.
pub struct NullAudio;

impl AudioOutput for NullAudio {
    fn play(&self, _cue: &SoundCue) -> Result<(), EffectError> {
        Ok(())
    }
}

/// Plays cues once a user gesture has unlocked audio; silent before that.
pub struct SoundDispatcher {
    unlocked: AtomicBool,
    output: Arc<dyn AudioOutput>,
}

impl SoundDispatcher {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            unlocked: AtomicBool::new(false),
            output,
        }
    }

    /// One-way: once unlocked, audio stays unlocked for the session.
    pub fn unlock(&self) {
        if !self.unlocked.swap(true, Ordering::AcqRel) {
            trace!("audio unlocked");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Acquire)
    }

    /// Returns whether the cue reached the output.
    pub fn play(&self, kind: NotificationKind) -> Result<bool, EffectError> {
        if !self.is_unlocked() {
            trace!(kind = kind.as_str(), "audio locked, skipping cue");
            return Ok(false);
        }
        self.output.play(&cue_for(kind))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u32>>);

    impl AudioOutput for Recorder {
        fn play(&self, cue: &SoundCue) -> Result<(), EffectError> {
            self.0.lock().unwrap().push(cue.fallback_hz);
            Ok(())
        }
    }

    #[test]
    fn cue_frequencies_by_kind() {
        assert_eq!(cue_for(NotificationKind::Success).fallback_hz, 800);
        assert_eq!(cue_for(NotificationKind::Info).fallback_hz, 600);
        assert_eq!(cue_for(NotificationKind::Warning).fallback_hz, 400);
        assert_eq!(cue_for(NotificationKind::Error).fallback_hz, 300);
        assert_eq!(cue_for(NotificationKind::Error).sample, "/sounds/notification.mp3");
    }

    #[test]
    fn silent_until_unlocked() {
        let recorder = Arc::new(Recorder::default());
        let sound = SoundDispatcher::new(recorder.clone());

        assert!(!sound.play(NotificationKind::Warning).unwrap());
        assert!(recorder.0.lock().unwrap().is_empty());

        sound.unlock();
        sound.unlock();
        assert!(sound.play(NotificationKind::Warning).unwrap());
        assert_eq!(*recorder.0.lock().unwrap(), vec![400]);
    }
}
