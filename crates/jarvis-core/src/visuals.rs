//! Decorative animation layer
//!
//! Every visual is a pure function of elapsed time, audio level and voice
//! state over parameters drawn once from a seeded RNG. Nothing here performs
//! I/O or keeps per-frame state, so a renderer can call `Scene::frame` at any
//! rate and get the same picture for the same inputs.

use std::f64::consts::{PI, TAU};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::voice::VoiceState;

pub const PARTICLE_COUNT: usize = 200;
pub const PARTICLE_RADIUS: f64 = 3.0;
pub const RING_COUNT: usize = 5;
pub const RING_BASE_RADIUS: f64 = 2.0;
pub const BAR_COUNT: usize = 64;
pub const WAVEFORM_RADIUS: f64 = 2.5;
pub const CORE_RADIUS: f64 = 1.5;
pub const REACTOR_SIZE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Orthographic projection after tilting the scene toward the viewer
    pub fn project(&self, tilt: f64) -> (f64, f64) {
        let (sin, cos) = tilt.sin_cos();
        (self.x, self.y * cos - self.z * sin)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Particle {
    origin: Point3,
    size: f64,
    life: f64,
}

/// Particles laid out on a flattened torus around the core
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleField {
    particles: Vec<Particle>,
}

impl ParticleField {
    pub fn new<R: Rng + ?Sized>(count: usize, radius: f64, rng: &mut R) -> Self {
        let particles = (0..count)
            .map(|_| {
                let theta = rng.gen::<f64>() * TAU;
                let phi = (rng.gen::<f64>() - 0.5) * PI * 0.8;
                let r = radius + (rng.gen::<f64>() - 0.5) * 1.5;
                Particle {
                    origin: Point3::new(
                        theta.cos() * phi.cos() * r,
                        phi.sin() * r * 0.5,
                        theta.sin() * phi.cos() * r,
                    ),
                    size: 0.5 + rng.gen::<f64>() * 1.5,
                    life: rng.gen(),
                }
            })
            .collect();
        Self { particles }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Positions at time `t`: each particle orbits the vertical axis at its
    /// own rate, bobs vertically and is pushed outward by the audio level.
    pub fn positions(&self, t: f64, level: f64) -> Vec<Point3> {
        let expand = 1.0 + level * 0.3;
        self.particles
            .iter()
            .map(|p| {
                let angle = t * (0.2 + p.life * 0.3);
                let (sin, cos) = angle.sin_cos();
                let x = p.origin.x * cos - p.origin.z * sin;
                let z = p.origin.x * sin + p.origin.z * cos;
                let y = p.origin.y + (t * 2.0 + p.life * 10.0).sin() * 0.3;
                Point3::new(x * expand, y * expand, z * expand)
            })
            .collect()
    }

    /// Brightness in `[0.4, 1.0]`
    pub fn twinkle(&self, index: usize, t: f64) -> f64 {
        self.particles
            .get(index)
            .map(|p| (p.life * 50.0 + t * 5.0).sin() * 0.3 + 0.7)
            .unwrap_or(0.0)
    }

    pub fn size(&self, index: usize) -> f64 {
        self.particles.get(index).map(|p| p.size).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RingSpec {
    radius: f64,
    speed: f64,
    tilt: f64,
    segments: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingFrame {
    pub radius: f64,
    /// Rotation about the ring's own axis
    pub angle: f64,
    pub tilt: f64,
    pub segments: usize,
    pub segment_pulse: f64,
}

impl RingFrame {
    /// `(start, length)` of each highlighted arc, already rotated
    pub fn arcs(&self) -> Vec<(f64, f64)> {
        let n = self.segments as f64;
        (0..self.segments)
            .map(|i| {
                let start = TAU / n * i as f64 + PI / n + self.angle;
                (start, PI / (n + 2.0) * self.segment_pulse)
            })
            .collect()
    }
}

/// Concentric rings rotating in alternating directions
#[derive(Debug, Clone, PartialEq)]
pub struct Rings {
    rings: Vec<RingSpec>,
}

impl Rings {
    pub fn new(count: usize, base_radius: f64) -> Self {
        let rings = (0..count)
            .map(|i| {
                let direction = if i % 2 == 0 { 1.0 } else { -1.0 };
                RingSpec {
                    radius: base_radius + i as f64 * 0.4,
                    speed: (1.0 - i as f64 * 0.15) * direction,
                    tilt: PI / 12.0 * ((i % 3) as f64 - 1.0),
                    segments: 3 + i % 3,
                }
            })
            .collect();
        Self { rings }
    }

    pub fn frames(&self, t: f64, level: f64, active: bool) -> Vec<RingFrame> {
        self.rings
            .iter()
            .enumerate()
            .map(|(i, ring)| {
                let speed = ring.speed * if active { 1.0 } else { 0.3 };
                let audio_pulse = if active { 1.0 + level * 0.3 } else { 1.0 };
                let segment_pulse = if active {
                    1.0 + (t * 3.0 + i as f64 * 0.5).sin() * 0.1
                } else {
                    1.0
                };
                RingFrame {
                    radius: ring.radius,
                    angle: t * speed * audio_pulse,
                    tilt: ring.tilt + (t * 0.5 + i as f64).sin() * 0.02,
                    segments: ring.segments,
                    segment_pulse,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreFrame {
    pub radius: f64,
    pub inner_scale: f64,
    pub glow_scale: f64,
    pub wobble: f64,
}

/// Holographic core pulse
pub fn core_pulse(t: f64, level: f64, active: bool) -> CoreFrame {
    let (inner_scale, glow_scale) = if active {
        (
            1.0 + (t * 3.0).sin() * 0.05 + level * 0.1,
            1.2 + (t * 2.0).sin() * 0.1 + level * 0.15,
        )
    } else {
        (1.0 + t.sin() * 0.02, 1.15 + (t * 0.5).sin() * 0.05)
    };
    CoreFrame {
        radius: CORE_RADIUS,
        inner_scale,
        glow_scale,
        wobble: (t * 0.2).sin() * 0.1,
    }
}

const REACTOR_RINGS: [(f64, f64); 5] = [(0.3, 2.0), (0.45, -1.5), (0.6, 1.0), (0.75, -0.8), (0.9, 0.5)];

#[derive(Debug, Clone, PartialEq)]
pub struct ReactorFrame {
    pub rotation: f64,
    pub intensity: f64,
    pub core_scale: f64,
    /// `(radius, angle, scale)` per ring
    pub rings: Vec<(f64, f64, f64)>,
}

pub fn arc_reactor(t: f64, power: f64, active: bool, size: f64) -> ReactorFrame {
    let rings = REACTOR_RINGS
        .iter()
        .enumerate()
        .map(|(i, &(fraction, speed))| {
            let scale = if active {
                1.0 + (t * 3.0 + i as f64 * 0.5).sin() * 0.1 * power
            } else {
                1.0
            };
            (size * fraction, t * speed, scale)
        })
        .collect();

    ReactorFrame {
        rotation: t * 0.1,
        intensity: if active { 1.5 * power } else { 0.5 },
        core_scale: if active {
            1.0 + (t * 4.0).sin() * 0.15 * power
        } else {
            0.9
        },
        rings,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bar {
    base: f64,
    phase: f64,
    frequency: f64,
}

/// Circular bar waveform
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    bars: Vec<Bar>,
}

pub const MIN_BAR_HEIGHT: f64 = 0.05;

impl Waveform {
    pub fn new<R: Rng + ?Sized>(bar_count: usize, rng: &mut R) -> Self {
        let n = bar_count.max(1) as f64;
        let bars = (0..bar_count)
            .map(|i| Bar {
                base: 0.1 + rng.gen::<f64>() * 0.1,
                phase: i as f64 / n * PI * 4.0,
                frequency: 1.0 + rng.gen::<f64>() * 2.0,
            })
            .collect();
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn heights(&self, t: f64, level: f64, listening: bool) -> Vec<f64> {
        self.bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                let height = if listening {
                    let wave1 = (t * bar.frequency * 3.0 + bar.phase).sin() * 0.5 + 0.5;
                    let wave2 = (t * 5.0 + i as f64 * 0.2).sin() * 0.3 + 0.7;
                    wave1 * wave2 * 0.6 + level * 0.5 + bar.base
                } else {
                    bar.base + (t * 0.5 + bar.phase).sin() * 0.02
                };
                height.max(MIN_BAR_HEIGHT)
            })
            .collect()
    }
}

/// Everything the dashboard canvas draws in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFrame {
    pub particles: Vec<Point3>,
    pub rings: Vec<RingFrame>,
    pub core: CoreFrame,
    pub reactor: ReactorFrame,
    pub bars: Vec<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    particles: ParticleField,
    rings: Rings,
    waveform: Waveform,
}

impl Scene {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            particles: ParticleField::new(PARTICLE_COUNT, PARTICLE_RADIUS, &mut rng),
            rings: Rings::new(RING_COUNT, RING_BASE_RADIUS),
            waveform: Waveform::new(BAR_COUNT, &mut rng),
        }
    }

    pub fn particles(&self) -> &ParticleField {
        &self.particles
    }

    pub fn frame(&self, t: f64, level: f32, state: VoiceState) -> SceneFrame {
        let level = f64::from(level).clamp(0.0, 1.0);
        let active = state != VoiceState::Idle;
        SceneFrame {
            particles: self.particles.positions(t, level),
            rings: self.rings.frames(t, level, active),
            core: core_pulse(t, level, active),
            reactor: arc_reactor(t, 0.5 + level * 0.5, active, REACTOR_SIZE),
            bars: self.waveform.heights(t, level, state == VoiceState::Listening),
            active,
        }
    }
}
