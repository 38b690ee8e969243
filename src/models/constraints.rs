use serde::{Deserialize, Serialize};

/// Floating-point slack on volume comparisons, in ml
pub const VOLUME_SLACK: f64 = 1e-9;

/// Volume limits for one optimization request, in ml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConstraints {
    pub min_total_volume_ml: f64,
    pub max_total_volume_ml: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_component_volume_ml: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_component_volume_ml: Option<f64>,
    #[serde(default = "default_allow_scaling")]
    pub allow_scaling: bool,
    /// Dispensing granularity, e.g. 0.1ml
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision_ml: Option<f64>,
}

fn default_allow_scaling() -> bool {
    true
}

impl VolumeConstraints {
    /// Fixed total volume with no per-component limits
    pub fn exact(total_ml: f64) -> Self {
        Self::window(total_ml, total_ml)
    }

    pub fn window(min_total_ml: f64, max_total_ml: f64) -> Self {
        Self {
            min_total_volume_ml: min_total_ml,
            max_total_volume_ml: max_total_ml,
            minimum_component_volume_ml: None,
            maximum_component_volume_ml: None,
            allow_scaling: true,
            precision_ml: None,
        }
    }

    /// Total volume the optimizer aims for: the middle of the allowed window
    pub fn target_total(&self) -> f64 {
        (self.min_total_volume_ml + self.max_total_volume_ml) / 2.0
    }

    pub fn contains_total(&self, total: f64) -> bool {
        total >= self.min_total_volume_ml - VOLUME_SLACK
            && total <= self.max_total_volume_ml + VOLUME_SLACK
    }
}

impl Default for VolumeConstraints {
    fn default() -> Self {
        Self::exact(100.0)
    }
}
