/// Errors that reject an optimization request before any search runs.
///
/// Convergence failures and timeouts are not errors; they are reported through
/// [`crate::models::PerformanceMetrics`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizationError {
    #[error("Invalid color {field}: {reason}")]
    InvalidColor { field: String, reason: String },
    #[error("Invalid hex color {value:?}: expected #RRGGBB")]
    InvalidHex { value: String },
    #[error("Invalid paint {paint_id}: {field} {reason}")]
    InvalidPaint {
        paint_id: String,
        field: String,
        reason: String,
    },
    #[error("At least {required} paints are required, got {count}")]
    InsufficientPaints { count: usize, required: usize },
    #[error("At most {max} paints are supported, got {count}")]
    TooManyPaints { count: usize, max: usize },
    #[error("Invalid constraint {field}: {reason}")]
    InvalidConstraint { field: String, reason: String },
    #[error("Conflicting constraints {first} and {second}: {reason}")]
    ConflictingConstraints {
        first: String,
        second: String,
        reason: String,
    },
    #[error("Invalid config {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
    #[error("Invalid mixing ratios: {0}")]
    InvalidRatios(String),
}

impl OptimizationError {
    /// Machine-readable error code for the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizationError::InvalidColor { .. } => "INVALID_COLOR",
            OptimizationError::InvalidHex { .. } => "INVALID_HEX",
            OptimizationError::InvalidPaint { .. } => "INVALID_PAINT",
            OptimizationError::InsufficientPaints { .. } => "INSUFFICIENT_PAINTS",
            OptimizationError::TooManyPaints { .. } => "TOO_MANY_PAINTS",
            OptimizationError::InvalidConstraint { .. } => "INVALID_CONSTRAINT",
            OptimizationError::ConflictingConstraints { .. } => "CONFLICTING_CONSTRAINTS",
            OptimizationError::InvalidConfig { .. } => "INVALID_CONFIG",
            OptimizationError::InvalidRatios(_) => "INVALID_RATIOS",
        }
    }

    pub(crate) fn color(field: &str, reason: impl Into<String>) -> Self {
        OptimizationError::InvalidColor {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn constraint(field: &str, reason: impl Into<String>) -> Self {
        OptimizationError::InvalidConstraint {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(first: &str, second: &str, reason: impl Into<String>) -> Self {
        OptimizationError::ConflictingConstraints {
            first: first.to_string(),
            second: second.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        OptimizationError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
