use serde::{Deserialize, Serialize};

use crate::errors::{BoError, BoResult};

/// Closed search interval `[min, max]` for the single input variable.
///
/// Both ends and the width are finite and `min < max`. Construction through
/// [`Bounds::new`] rejects anything else; [`Bounds::new_or_default`]
/// substitutes [`Bounds::DEFAULT`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds", into = "RawBounds")]
pub struct Bounds {
    min: f64,
    max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawBounds {
    min: f64,
    max: f64,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = BoError;

    fn try_from(raw: RawBounds) -> BoResult<Self> {
        Bounds::new(raw.min, raw.max)
    }
}

impl From<Bounds> for RawBounds {
    fn from(bounds: Bounds) -> Self {
        Self {
            min: bounds.min,
            max: bounds.max,
        }
    }
}

impl Bounds {
    pub const DEFAULT_MIN: f64 = -2.0;
    pub const DEFAULT_MAX: f64 = 10.0;

    /// Interval used whenever a requested interval is unusable.
    pub const DEFAULT: Bounds = Bounds {
        min: Self::DEFAULT_MIN,
        max: Self::DEFAULT_MAX,
    };

    pub fn new(min: f64, max: f64) -> BoResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(crate::validation_error!(
                "bounds must be finite, got [{min}, {max}]"
            ));
        }
        if min >= max {
            return Err(crate::validation_error!(
                "bounds min must be less than max, got [{min}, {max}]"
            ));
        }
        if !(max - min).is_finite() {
            return Err(crate::validation_error!(
                "bounds width overflows, got [{min}, {max}]"
            ));
        }
        Ok(Self { min, max })
    }

    /// Like [`Bounds::new`] but falls back to [`Bounds::DEFAULT`].
    pub fn new_or_default(min: f64, max: f64) -> Self {
        Self::new(min, max).unwrap_or(Self::DEFAULT)
    }

    /// `value * (1 ∓ percentage / 100)`, e.g. the current setting of a device
    /// knob ± 7 %. Produces an invalid interval (and therefore an error) for
    /// zero or negative centre values.
    pub fn around_value(value: f64, percentage: f64) -> BoResult<Self> {
        let fraction = percentage / 100.0;
        Self::new(value * (1.0 - fraction), value * (1.0 + fraction))
    }

    /// `[center - half_width, center + half_width]`.
    pub fn centered(center: f64, half_width: f64) -> BoResult<Self> {
        Self::new(center - half_width, center + half_width)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }

    /// Map `t ∈ [0, 1]` onto the interval.
    pub fn lerp(&self, t: f64) -> f64 {
        self.min + t * self.width()
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.min, self.max)
    }
}
