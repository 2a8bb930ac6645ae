//! Voice activity detection and speaking indicators.
//!
//! [`SpeakingDetector`] runs over local capture frames and reports
//! edges only, so the caller can forward a status message exactly when
//! the state flips. [`SpeakingIndicators`] tracks which remote
//! participants are audible, expiring each one after a quiet window so
//! a lost "stopped speaking" update cannot leave a stuck indicator.

use std::collections::HashMap;
use std::time::Duration;

use confab_sfu::ParticipantId;
use tokio::time::Instant;

/// Edge-triggered RMS threshold detector for 16-bit PCM frames.
#[derive(Debug)]
pub struct SpeakingDetector {
    threshold: f32,
    speaking: bool,
}

impl SpeakingDetector {
    /// `threshold` is an RMS amplitude in the i16 sample range;
    /// values around 500-1500 work for typical microphone capture.
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            speaking: false,
        }
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one capture frame. Returns `Some(state)` only when the
    /// speaking state changed.
    pub fn process_frame(&mut self, samples: &[i16]) -> Option<bool> {
        let now_speaking = Self::rms(samples) >= self.threshold;
        if now_speaking == self.speaking {
            return None;
        }
        self.speaking = now_speaking;
        Some(now_speaking)
    }

    fn rms(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples
            .iter()
            .map(|&s| {
                let s = f64::from(s);
                s * s
            })
            .sum();
        (sum / samples.len() as f64).sqrt() as f32
    }
}

/// Remote speaking state with automatic expiry.
#[derive(Debug)]
pub struct SpeakingIndicators {
    window: Duration,
    last_heard: HashMap<ParticipantId, Instant>,
}

impl SpeakingIndicators {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_heard: HashMap::new(),
        }
    }

    /// Record activity from a participant. Returns true when this is a
    /// rising edge, meaning the UI should light the indicator.
    pub fn heard(&mut self, participant: ParticipantId) -> bool {
        let now = Instant::now();
        let was_active = self
            .last_heard
            .get(&participant)
            .is_some_and(|t| now.duration_since(*t) < self.window);
        self.last_heard.insert(participant, now);
        !was_active
    }

    /// Explicit stop, for when the remote sends a speaking=false status.
    pub fn clear(&mut self, participant: &ParticipantId) {
        self.last_heard.remove(participant);
    }

    pub fn remove(&mut self, participant: &ParticipantId) {
        self.last_heard.remove(participant);
    }

    /// Participants currently inside the activity window, sorted for
    /// stable rendering. Expired entries are pruned as a side effect.
    pub fn speaking(&mut self) -> Vec<ParticipantId> {
        let now = Instant::now();
        let window = self.window;
        self.last_heard
            .retain(|_, t| now.duration_since(*t) < window);
        let mut out: Vec<ParticipantId> = self.last_heard.keys().cloned().collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_reports_edges_only() {
        let mut detector = SpeakingDetector::new(1000.0);

        let quiet = vec![10i16; 480];
        let loud = vec![8000i16; 480];

        assert_eq!(detector.process_frame(&quiet), None);
        assert_eq!(detector.process_frame(&loud), Some(true));
        assert_eq!(detector.process_frame(&loud), None);
        assert_eq!(detector.process_frame(&quiet), Some(false));
        assert_eq!(detector.process_frame(&quiet), None);
    }

    #[test]
    fn test_detector_empty_frame_is_silence() {
        let mut detector = SpeakingDetector::new(1.0);
        assert_eq!(detector.process_frame(&[]), None);
        assert!(!detector.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_expires_after_quiet_window() {
        let mut indicators = SpeakingIndicators::new(Duration::from_millis(500));
        let alice = ParticipantId::from("alice");

        assert!(indicators.heard(alice.clone()));
        assert_eq!(indicators.speaking(), vec![alice.clone()]);

        // Still inside the window: no new rising edge.
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(!indicators.heard(alice.clone()));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(indicators.speaking().is_empty());

        // After expiry the next activity is a rising edge again.
        assert!(indicators.heard(alice));
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_clear_and_sorted_output() {
        let mut indicators = SpeakingIndicators::new(Duration::from_secs(1));
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");

        indicators.heard(bob.clone());
        indicators.heard(alice.clone());
        assert_eq!(indicators.speaking(), vec![alice.clone(), bob.clone()]);

        indicators.clear(&alice);
        assert_eq!(indicators.speaking(), vec![bob]);
    }
}
