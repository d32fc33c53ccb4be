//! Animation parameter `t` of the scalar field.

use std::f64::consts::TAU;
use std::ops::RangeInclusive;

/// How `t` follows the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeMode {
    /// `t` only changes when set.
    Manual,
    /// `fract(time)`.
    Sawtooth,
    /// `|1 - 2 * fract(time)|`.
    Triangle,
    /// `sin(2π * time)`.
    Sine,
    /// `fract(time) * 2π`.
    #[default]
    ZeroToTwoPi,
}

impl TimeMode {
    /// All modes in cycling order.
    pub const ALL: [Self; 5] = [
        Self::Manual,
        Self::Sawtooth,
        Self::Triangle,
        Self::Sine,
        Self::ZeroToTwoPi,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Sawtooth => "sawtooth",
            Self::Triangle => "triangle",
            Self::Sine => "sine",
            Self::ZeroToTwoPi => "0 to 2pi",
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn previous(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Value of `t` at `time` seconds, `None` in manual mode.
    pub fn evaluate(self, time: f64) -> Option<f32> {
        let phase = time.rem_euclid(1.0);
        let t = match self {
            Self::Manual => return None,
            Self::Sawtooth => phase,
            Self::Triangle => (1.0 - 2.0 * phase).abs(),
            Self::Sine => (time * TAU).sin(),
            Self::ZeroToTwoPi => phase * TAU,
        };
        Some(t as f32)
    }

    /// Range a `t` slider covers in this mode, `None` in manual mode.
    pub fn slider_range(self) -> Option<RangeInclusive<f32>> {
        match self {
            Self::Manual => None,
            Self::Sawtooth | Self::Triangle => Some(0.0..=1.0),
            Self::Sine => Some(-1.0..=1.0),
            Self::ZeroToTwoPi => Some(0.0..=TAU as f32),
        }
    }
}

impl std::fmt::Display for TimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The current `t` and the mode driving it.
#[derive(Debug, Clone)]
pub struct TimeParameter {
    mode: TimeMode,
    t: f32,
    /// Kept from the last animated mode while manual.
    slider_range: RangeInclusive<f32>,
}

impl Default for TimeParameter {
    fn default() -> Self {
        Self::new(TimeMode::default())
    }
}

impl TimeParameter {
    pub fn new(mode: TimeMode) -> Self {
        Self {
            mode,
            t: 0.0,
            slider_range: mode.slider_range().unwrap_or(0.0..=TAU as f32),
        }
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TimeMode) {
        self.mode = mode;
    }

    pub fn t(&self) -> f32 {
        self.t
    }

    /// Set `t` directly. Switches to manual mode.
    pub fn set_t(&mut self, t: f32) {
        self.t = t;
        self.mode = TimeMode::Manual;
    }

    pub fn slider_range(&self) -> RangeInclusive<f32> {
        self.slider_range.clone()
    }

    /// Advance `t` to `time` seconds since start.
    pub fn update(&mut self, time: f64) -> f32 {
        if let Some(t) = self.mode.evaluate(time) {
            self.t = t;
        }
        if let Some(range) = self.mode.slider_range() {
            self.slider_range = range;
        }
        self.t
    }
}
