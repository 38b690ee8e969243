use serde::{Deserialize, Serialize};

use crate::models::{OptimizationError, PerceptualColor};

/// Number of samples in a spectral K/S curve: 380nm to 770nm in 10nm steps
pub const SPECTRAL_SAMPLES: usize = 40;

/// First wavelength of a spectral curve in nm
pub const SPECTRAL_START_NM: f64 = 380.0;

/// Wavelength step of a spectral curve in nm
pub const SPECTRAL_STEP_NM: f64 = 10.0;

/// Simplified single-value Kubelka-Munk coefficients, normalized to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KubelkaMunk {
    /// Absorption
    pub k: f64,
    /// Scattering
    pub s: f64,
}

/// Measured spectral absorption and scattering curves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralCurves {
    pub k: Vec<f64>,
    pub s: Vec<f64>,
}

/// Surface finish of a paint film
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finish {
    #[default]
    #[serde(alias = "matt")]
    Matte,
    Satin,
    #[serde(alias = "glossy")]
    Gloss,
    Metallic,
}

impl Finish {
    /// Empirical surface reflection offset
    pub fn surface_reflection(&self) -> f64 {
        match self {
            Finish::Matte => 0.04,
            Finish::Satin => 0.06,
            Finish::Gloss => 0.08,
            Finish::Metallic => 0.12,
        }
    }
}

/// A paint available to the optimizer. Supplied by the caller, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: String,
    pub lab: PerceptualColor,
    pub opacity: f64,
    #[serde(rename = "tintingStrength")]
    pub tinting_strength: f64,
    #[serde(rename = "kubelkaMunk")]
    pub kubelka_munk: KubelkaMunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral: Option<SpectralCurves>,
    #[serde(default)]
    pub finish: Finish,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_ml: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_volume_ml: Option<f64>,
}

impl Paint {
    /// Paint with neutral optical defaults, mostly useful for tests and fixtures
    pub fn new(id: impl Into<String>, name: impl Into<String>, lab: PerceptualColor) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            brand: String::new(),
            lab,
            opacity: 0.8,
            tinting_strength: 0.5,
            kubelka_munk: KubelkaMunk { k: 0.5, s: 0.5 },
            spectral: None,
            finish: Finish::Matte,
            cost_per_ml: None,
            available_volume_ml: None,
        }
    }

    pub fn validate(&self) -> Result<(), OptimizationError> {
        let invalid = |field: &str, reason: String| OptimizationError::InvalidPaint {
            paint_id: self.id.clone(),
            field: field.to_string(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id", "must not be empty".into()));
        }
        self.lab.validate(&format!("paints[{}].lab", self.id))?;

        let unit = [
            ("opacity", self.opacity),
            ("tintingStrength", self.tinting_strength),
            ("kubelkaMunk.k", self.kubelka_munk.k),
            ("kubelkaMunk.s", self.kubelka_munk.s),
        ];
        for (field, value) in unit {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("must be within [0, 1], got {value}")));
            }
        }

        if let Some(cost) = self.cost_per_ml {
            if !cost.is_finite() || cost < 0.0 {
                return Err(invalid("cost_per_ml", format!("must be non-negative, got {cost}")));
            }
        }
        if let Some(available) = self.available_volume_ml {
            if !available.is_finite() || available <= 0.0 {
                return Err(invalid(
                    "available_volume_ml",
                    format!("must be positive, got {available}"),
                ));
            }
        }

        if let Some(spectral) = &self.spectral {
            for (field, curve) in [("spectral.k", &spectral.k), ("spectral.s", &spectral.s)] {
                if curve.len() != SPECTRAL_SAMPLES {
                    return Err(invalid(
                        field,
                        format!("must have {SPECTRAL_SAMPLES} samples, got {}", curve.len()),
                    ));
                }
                if curve.iter().any(|v| !v.is_finite() || *v < 0.0) {
                    return Err(invalid(field, "must contain non-negative finite values".into()));
                }
            }
        }
        Ok(())
    }
}
