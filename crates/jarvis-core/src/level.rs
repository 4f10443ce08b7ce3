//! Audio level signal driving the visual pulse

use rand::Rng;

use crate::voice::VoiceState;

pub const APPROACH_RATE: f32 = 0.15;
pub const DECAY_FACTOR: f32 = 0.85;

/// Smoothed level in `[0, 1]`, updated once per animation tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioLevel {
    value: f32,
}

impl AudioLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Advance one tick. `sample` is a measured level if a real meter is
    /// wired in; otherwise a random target is drawn.
    pub fn tick<R: Rng + ?Sized>(&mut self, state: VoiceState, sample: Option<f32>, rng: &mut R) {
        if state.is_audible() {
            let target = sample.unwrap_or_else(|| random_target(rng));
            self.approach(target);
        } else {
            self.decay();
        }
    }

    pub fn approach(&mut self, target: f32) {
        let target = if target.is_finite() { target } else { 0.0 };
        self.value = clamp_unit(self.value + (target - self.value) * APPROACH_RATE);
    }

    pub fn decay(&mut self) {
        self.value = clamp_unit(self.value * DECAY_FACTOR);
    }
}

pub fn random_target<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    0.3 + rng.gen::<f32>() * 0.7
}

/// Map a microphone RMS amplitude onto the level scale
pub fn rms_to_level(rms: f32) -> f32 {
    clamp_unit(rms / 0.5)
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_level_stays_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut level = AudioLevel::new();
        let states = [
            VoiceState::Listening,
            VoiceState::Speaking,
            VoiceState::Idle,
            VoiceState::Processing,
        ];
        for i in 0..2000 {
            level.tick(states[(i / 50) % states.len()], None, &mut rng);
            assert!((0.0..=1.0).contains(&level.value()));
        }

        for target in [5.0, -3.0, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            level.approach(target);
            assert!((0.0..=1.0).contains(&level.value()), "target {target}");
        }
    }

    #[test]
    fn test_approach_and_decay_rates() {
        let mut level = AudioLevel::new();
        level.approach(1.0);
        assert!((level.value() - 0.15).abs() < 1e-6);
        level.decay();
        assert!((level.value() - 0.1275).abs() < 1e-6);
    }

    #[test]
    fn test_idle_decays_toward_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut level = AudioLevel::new();
        for _ in 0..60 {
            level.tick(VoiceState::Speaking, None, &mut rng);
        }
        assert!(level.value() >= 0.3 * 0.9);
        for _ in 0..100 {
            level.tick(VoiceState::Idle, None, &mut rng);
        }
        assert!(level.value() < 1e-3);
    }

    #[test]
    fn test_measured_sample_replaces_random_target() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut level = AudioLevel::new();
        for _ in 0..200 {
            level.tick(VoiceState::Listening, Some(0.2), &mut rng);
        }
        assert!((level.value() - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_random_target_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let t = random_target(&mut rng);
            assert!((0.3..=1.0).contains(&t));
        }
        assert_eq!(rms_to_level(0.25), 0.5);
        assert_eq!(rms_to_level(2.0), 1.0);
    }
}
