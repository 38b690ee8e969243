use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::models::OptimizationError;

/// D65 reference white, 0-100 scale
pub const D65_WHITE: [f64; 3] = [95.047, 100.0, 108.883];

const EPSILON: f64 = 0.008856;
const KAPPA: f64 = 7.787;

/// A CIELAB color under D65.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerceptualColor {
    #[serde(rename = "L")]
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl PerceptualColor {
    pub const fn new(l: f64, a: f64, b: f64) -> Self {
        Self { l, a, b }
    }

    /// Reject non-finite or out-of-range channels. `field` names the value in errors.
    pub fn validate(&self, field: &str) -> Result<(), OptimizationError> {
        let channels = [
            ("L", self.l, 0.0, 100.0),
            ("a", self.a, -128.0, 127.0),
            ("b", self.b, -128.0, 127.0),
        ];
        for (name, value, lo, hi) in channels {
            if !value.is_finite() {
                return Err(OptimizationError::color(
                    &format!("{field}.{name}"),
                    format!("must be finite, got {value}"),
                ));
            }
            if value < lo || value > hi {
                return Err(OptimizationError::color(
                    &format!("{field}.{name}"),
                    format!("{value} outside [{lo}, {hi}]"),
                ));
            }
        }
        Ok(())
    }

    pub fn chroma(&self) -> f64 {
        self.a.hypot(self.b)
    }

    /// Hue angle in degrees, [0, 360)
    pub fn hue_degrees(&self) -> f64 {
        if self.a == 0.0 && self.b == 0.0 {
            return 0.0;
        }
        self.b.atan2(self.a).to_degrees().rem_euclid(360.0)
    }

    /// Convert XYZ (0-100 scale, D65) to Lab
    pub fn from_xyz(xyz: [f64; 3]) -> Self {
        let f = |t: f64| {
            if t > EPSILON {
                t.cbrt()
            } else {
                KAPPA * t + 16.0 / 116.0
            }
        };

        let fx = f(xyz[0] / D65_WHITE[0]);
        let fy = f(xyz[1] / D65_WHITE[1]);
        let fz = f(xyz[2] / D65_WHITE[2]);

        Self {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }

    /// Convert to XYZ (0-100 scale, D65)
    pub fn to_xyz(&self) -> [f64; 3] {
        let fy = (self.l + 16.0) / 116.0;
        let fx = fy + self.a / 500.0;
        let fz = fy - self.b / 200.0;

        let f_inv = |t: f64| {
            let cube = t * t * t;
            if cube > EPSILON {
                cube
            } else {
                (t - 16.0 / 116.0) / KAPPA
            }
        };

        [
            f_inv(fx) * D65_WHITE[0],
            f_inv(fy) * D65_WHITE[1],
            f_inv(fz) * D65_WHITE[2],
        ]
    }

    /// Parse a `#RRGGBB` sRGB hex string
    pub fn from_hex(value: &str) -> Result<Self, OptimizationError> {
        let invalid = || OptimizationError::InvalidHex {
            value: value.to_string(),
        };
        let digits = value.strip_prefix('#').ok_or_else(invalid)?;
        if digits.len() != 6 {
            return Err(invalid());
        }
        let bytes = hex::decode(digits).map_err(|_| invalid())?;
        Ok(Self::from_srgb([bytes[0], bytes[1], bytes[2]]))
    }

    /// Format as `#RRGGBB`, clipping out-of-gamut channels
    pub fn to_hex(&self) -> String {
        format!("#{}", hex::encode_upper(self.to_srgb()))
    }

    pub fn from_srgb(srgb: [u8; 3]) -> Self {
        let linear = Vector3::from_iterator(srgb.iter().map(|&x| {
            let x = x as f64 / 255.0;
            if x <= 0.04045 {
                x / 12.92
            } else {
                ((x + 0.055) / 1.055).powf(2.4)
            }
        }));
        let xyz = srgb_to_xyz_matrix() * linear * 100.0;
        Self::from_xyz([xyz[0], xyz[1], xyz[2]])
    }

    pub fn to_srgb(&self) -> [u8; 3] {
        let xyz = self.to_xyz();
        let linear = xyz_to_srgb_matrix() * Vector3::new(xyz[0], xyz[1], xyz[2]) / 100.0;
        let encode = |c: f64| {
            let c = c.clamp(0.0, 1.0);
            let v = if c <= 0.0031308 {
                12.92 * c
            } else {
                1.055 * c.powf(1.0 / 2.4) - 0.055
            };
            (v * 255.0).round().clamp(0.0, 255.0) as u8
        };
        [encode(linear[0]), encode(linear[1]), encode(linear[2])]
    }
}

fn srgb_to_xyz_matrix() -> Matrix3<f64> {
    Matrix3::new(
        0.4124564, 0.3575761, 0.1804375, //
        0.2126729, 0.7151522, 0.0721750, //
        0.0193339, 0.1191920, 0.9503041,
    )
}

fn xyz_to_srgb_matrix() -> Matrix3<f64> {
    Matrix3::new(
        3.2404542, -1.5371385, -0.4985314, //
        -0.9692660, 1.8760108, 0.0415560, //
        0.0556434, -0.2040259, 1.0572252,
    )
}
