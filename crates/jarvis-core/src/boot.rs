//! Landing screen boot sequence

use std::time::Duration;

pub const BOOT_MESSAGES: [&str; 11] = [
    "STARK INDUSTRIES SECURE NETWORK",
    "INITIALIZING ARC REACTOR CORE...",
    "POWER LEVEL: 100%",
    "LOADING J.A.R.V.I.S. NEURAL MATRIX...",
    "CONNECTING TO AVENGERS DATABASE...",
    "SECURITY PROTOCOLS: ACTIVE",
    "HOLOGRAPHIC INTERFACE: READY",
    "VOICE RECOGNITION: CALIBRATED",
    "ALL SYSTEMS OPERATIONAL",
    "",
    "WELCOME BACK, SIR.",
];

pub const LINE_INTERVAL: Duration = Duration::from_millis(300);
pub const PROMPT_DELAY: Duration = Duration::from_millis(500);
const PULSE_STEP: Duration = Duration::from_millis(50);

/// Boot text driven by elapsed time rather than timers
#[derive(Debug, Clone, Default)]
pub struct BootSequence {
    elapsed: Duration,
    skipped: bool,
}

impl BootSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, dt: Duration) {
        self.elapsed = self.elapsed.saturating_add(dt);
    }

    pub fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn visible_lines(&self) -> &'static [&'static str] {
        if self.skipped {
            return &BOOT_MESSAGES;
        }
        let shown = (self.elapsed.as_millis() / LINE_INTERVAL.as_millis()) as usize;
        &BOOT_MESSAGES[..shown.min(BOOT_MESSAGES.len())]
    }

    /// The interval tick after the last line notices completion, then the
    /// prompt follows after a short pause
    pub fn prompt_at() -> Duration {
        LINE_INTERVAL * (BOOT_MESSAGES.len() as u32 + 1) + PROMPT_DELAY
    }

    pub fn prompt_visible(&self) -> bool {
        self.skipped || self.elapsed >= Self::prompt_at()
    }

    /// Whether a key press leaves the landing screen. Enter always does; any
    /// other key only once the prompt is up.
    pub fn accepts(&self, is_enter: bool) -> bool {
        is_enter || self.prompt_visible()
    }

    /// Arc reactor pulse phase in `0..100`
    pub fn pulse(&self) -> u8 {
        ((self.elapsed.as_millis() / PULSE_STEP.as_millis()) % 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_revealed_one_per_interval() {
        let mut boot = BootSequence::new();
        assert!(boot.visible_lines().is_empty());

        boot.advance(Duration::from_millis(299));
        assert!(boot.visible_lines().is_empty());
        boot.advance(Duration::from_millis(1));
        assert_eq!(boot.visible_lines(), &BOOT_MESSAGES[..1]);

        boot.advance(LINE_INTERVAL * 20);
        assert_eq!(boot.visible_lines().len(), 11);
        assert_eq!(boot.visible_lines()[10], "WELCOME BACK, SIR.");
    }

    #[test]
    fn test_prompt_timing() {
        let mut boot = BootSequence::new();
        boot.advance(Duration::from_millis(4099));
        assert!(!boot.prompt_visible());
        assert!(!boot.accepts(false));
        assert!(boot.accepts(true));

        boot.advance(Duration::from_millis(1));
        assert!(boot.prompt_visible());
        assert!(boot.accepts(false));
    }

    #[test]
    fn test_skip_shows_everything() {
        let mut boot = BootSequence::new();
        boot.skip();
        assert_eq!(boot.visible_lines().len(), BOOT_MESSAGES.len());
        assert!(boot.prompt_visible());
    }

    #[test]
    fn test_pulse_wraps() {
        let mut boot = BootSequence::new();
        boot.advance(Duration::from_millis(50 * 105));
        assert_eq!(boot.pulse(), 5);
    }
}
