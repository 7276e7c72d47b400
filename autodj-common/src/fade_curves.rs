//! Fade curve implementations for crossfading
//!
//! Two laws are used by autodj:
//! - **Linear**: the executor's stepped gain ramp on the incoming deck
//! - **EqualPower**: the dual-deck crossfader, keeping `a² + b² = 1`

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Fade curve types for crossfading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(t) = t
    /// Constant rate of change, precise and predictable
    #[default]
    Linear,

    /// Equal-Power: v(t) = sin(t × π/2)
    /// Maintains constant perceived loudness during crossfade
    EqualPower,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Volume multiplier (0.0 = silence, 1.0 = full volume)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-in gain ramped between a floor and full volume
    ///
    /// The floor keeps the incoming deck audible-but-silent (a tiny positive
    /// gain) so backends never see an exact zero or a negative volume.
    pub fn ramp(&self, floor: f32, position: f32) -> f32 {
        floor + (1.0 - floor) * self.calculate_fade_in(position)
    }
}

/// Equal-power crossfader gains for deck A and deck B at position `x`
///
/// `x = 0.0` puts deck A fully on air, `x = 1.0` deck B.
/// Gains satisfy `a² + b² = 1` for every `x`.
pub fn equal_power_gains(x: f32) -> (f32, f32) {
    let x = x.clamp(0.0, 1.0);
    // cos(π/2) is slightly negative in f32
    let a = (FRAC_PI_2 * x).cos().max(0.0);
    let b = (FRAC_PI_2 * (1.0 - x)).cos().max(0.0);
    (a, b)
}

/// Crossfader position at which the deck being faded in reaches `gain`
///
/// Inverse of the B-side of [`equal_power_gains`]: `b(x) = gain`.
pub fn crossfade_position_for_gain(gain: f32) -> f32 {
    let g = gain.clamp(0.0, 1.0);
    g.asin() / FRAC_PI_2
}
