//! Volume constraint checks and repair
//!
//! `validate_structure` rejects requests whose constraints can never be met;
//! `validate` scores a single candidate; `repair` projects a candidate back
//! into the feasible region.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{
    OptimizationError, Paint, VolumeConstraints, MIN_PAINT_COUNT, VOLUME_SLACK,
};

/// Volumes at or below this are treated as unused components
const UNUSED_VOLUME: f64 = 1e-9;
/// Slack allowed when checking a volume against the precision grid
const PRECISION_SLACK: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TotalBelowMinimum,
    TotalAboveMaximum,
    ComponentBelowMinimum,
    ComponentAboveMaximum,
    ExceedsAvailability,
    Precision,
}

impl ViolationKind {
    /// Precision is cosmetic; everything else makes a candidate infeasible
    pub fn is_hard(&self) -> bool {
        !matches!(self, ViolationKind::Precision)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    /// Component index, `None` for whole-mix checks
    pub component: Option<usize>,
    /// Size of the deficit or excess in ml
    pub magnitude: f64,
    pub message: String,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<ConstraintViolation>,
    pub penalty_score: f64,
}

impl ValidationReport {
    /// No hard violations; precision misses are tolerated
    pub fn feasible(&self) -> bool {
        self.violations.iter().all(|v| !v.kind.is_hard())
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }
}

/// Scores and repairs volume vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintValidator {
    pub hard_weight: f64,
    pub precision_weight: f64,
}

impl Default for ConstraintValidator {
    fn default() -> Self {
        Self {
            hard_weight: 1.0,
            precision_weight: 0.1,
        }
    }
}

impl ConstraintValidator {
    /// Fail fast on constraints that no candidate could satisfy
    pub fn validate_structure(
        &self,
        constraints: &VolumeConstraints,
        paints: &[Paint],
        max_paint_count: usize,
    ) -> Result<(), OptimizationError> {
        let min_total = constraints.min_total_volume_ml;
        let max_total = constraints.max_total_volume_ml;

        positive("min_total_volume_ml", min_total)?;
        positive("max_total_volume_ml", max_total)?;
        if max_total < min_total {
            return Err(OptimizationError::conflict(
                "min_total_volume_ml",
                "max_total_volume_ml",
                format!("minimum total {min_total} ml exceeds maximum total {max_total} ml"),
            ));
        }

        if let Some(min_comp) = constraints.minimum_component_volume_ml {
            positive("minimum_component_volume_ml", min_comp)?;
        }
        if let Some(max_comp) = constraints.maximum_component_volume_ml {
            positive("maximum_component_volume_ml", max_comp)?;
        }
        if let Some(precision) = constraints.precision_ml {
            positive("precision_ml", precision)?;
        }

        if let (Some(min_comp), Some(max_comp)) = (
            constraints.minimum_component_volume_ml,
            constraints.maximum_component_volume_ml,
        ) {
            if min_comp > max_comp {
                return Err(OptimizationError::conflict(
                    "minimum_component_volume_ml",
                    "maximum_component_volume_ml",
                    format!(
                        "component minimum {min_comp} ml exceeds component maximum {max_comp} ml"
                    ),
                ));
            }
        }

        if let Some(min_comp) = constraints.minimum_component_volume_ml {
            let smallest_mix = min_comp * MIN_PAINT_COUNT as f64;
            if smallest_mix > max_total + VOLUME_SLACK {
                return Err(OptimizationError::conflict(
                    "minimum_component_volume_ml",
                    "max_total_volume_ml",
                    format!(
                        "{MIN_PAINT_COUNT} components of {min_comp} ml need {smallest_mix} ml, \
                         above the {max_total} ml maximum"
                    ),
                ));
            }
        }

        if let Some(precision) = constraints.precision_ml {
            if grid_bounds(constraints, precision).is_none() {
                return Err(OptimizationError::conflict(
                    "precision_ml",
                    "max_total_volume_ml",
                    format!("no multiple of {precision} ml lies in [{min_total}, {max_total}] ml"),
                ));
            }
        }

        if let Some(max_comp) = constraints.maximum_component_volume_ml {
            let components = paints.len().min(max_paint_count).max(1);
            let reachable = max_comp * components as f64;
            if reachable < min_total {
                return Err(OptimizationError::conflict(
                    "maximum_component_volume_ml",
                    "min_total_volume_ml",
                    format!(
                        "{components} components of at most {max_comp} ml reach {reachable} ml, \
                         below the {min_total} ml minimum"
                    ),
                ));
            }
        }

        let caps: Option<Vec<f64>> = paints.iter().map(|p| p.available_volume_ml).collect();
        if let Some(caps) = caps {
            let available: f64 = caps.iter().sum();
            if !caps.is_empty() && available < min_total {
                return Err(OptimizationError::conflict(
                    "available_volume_ml",
                    "min_total_volume_ml",
                    format!("only {available} ml of paint is available, {min_total} ml required"),
                ));
            }
        }

        Ok(())
    }

    /// Check one volume vector. Each constraint is reported independently.
    pub fn validate(
        &self,
        volumes: &[f64],
        constraints: &VolumeConstraints,
        paints: &[Paint],
    ) -> ValidationReport {
        let mut violations = Vec::new();
        let total: f64 = volumes.iter().sum();

        if total < constraints.min_total_volume_ml - VOLUME_SLACK {
            violations.push(ConstraintViolation {
                kind: ViolationKind::TotalBelowMinimum,
                component: None,
                magnitude: constraints.min_total_volume_ml - total,
                message: format!(
                    "total volume {total:.3} ml below min_total_volume_ml {}",
                    constraints.min_total_volume_ml
                ),
            });
        } else if total > constraints.max_total_volume_ml + VOLUME_SLACK {
            violations.push(ConstraintViolation {
                kind: ViolationKind::TotalAboveMaximum,
                component: None,
                magnitude: total - constraints.max_total_volume_ml,
                message: format!(
                    "total volume {total:.3} ml above max_total_volume_ml {}",
                    constraints.max_total_volume_ml
                ),
            });
        }

        for (i, &volume) in volumes.iter().enumerate() {
            if volume <= UNUSED_VOLUME {
                continue;
            }
            let id = paints.get(i).map(|p| p.id.as_str()).unwrap_or("?");

            if let Some(min_comp) = constraints.minimum_component_volume_ml {
                if volume < min_comp - VOLUME_SLACK {
                    violations.push(ConstraintViolation {
                        kind: ViolationKind::ComponentBelowMinimum,
                        component: Some(i),
                        magnitude: min_comp - volume,
                        message: format!(
                            "{id}: {volume:.3} ml below minimum_component_volume_ml {min_comp}"
                        ),
                    });
                }
            }
            if let Some(max_comp) = constraints.maximum_component_volume_ml {
                if volume > max_comp + VOLUME_SLACK {
                    violations.push(ConstraintViolation {
                        kind: ViolationKind::ComponentAboveMaximum,
                        component: Some(i),
                        magnitude: volume - max_comp,
                        message: format!(
                            "{id}: {volume:.3} ml above maximum_component_volume_ml {max_comp}"
                        ),
                    });
                }
            }
            if let Some(cap) = paints.get(i).and_then(|p| p.available_volume_ml) {
                if volume > cap + VOLUME_SLACK {
                    violations.push(ConstraintViolation {
                        kind: ViolationKind::ExceedsAvailability,
                        component: Some(i),
                        magnitude: volume - cap,
                        message: format!("{id}: {volume:.3} ml exceeds available_volume_ml {cap}"),
                    });
                }
            }
            if let Some(precision) = constraints.precision_ml {
                let off = (volume - round_to_precision(volume, precision)).abs();
                if off > PRECISION_SLACK {
                    violations.push(ConstraintViolation {
                        kind: ViolationKind::Precision,
                        component: Some(i),
                        magnitude: off,
                        message: format!(
                            "{id}: {volume} ml is not a multiple of precision_ml {precision}"
                        ),
                    });
                }
            }
        }

        let penalty_score = violations
            .iter()
            .map(|v| {
                let weight = if v.kind.is_hard() {
                    self.hard_weight
                } else {
                    self.precision_weight
                };
                weight * v.magnitude * v.magnitude
            })
            .sum();

        ValidationReport {
            valid: violations.is_empty(),
            violations,
            penalty_score,
        }
    }

    /// Project a volume vector onto the feasible region: clamp each component,
    /// snap to precision, then rescale into the total window. With a precision
    /// the rescale aims at a grid total inside the window and the residual is
    /// moved in whole grid steps.
    pub fn repair(
        &self,
        volumes: &[f64],
        constraints: &VolumeConstraints,
        paints: &[Paint],
    ) -> Vec<f64> {
        let mut out: Vec<f64> = volumes
            .iter()
            .map(|&v| if v.is_finite() && v > UNUSED_VOLUME { v } else { 0.0 })
            .collect();

        if out.is_empty() {
            return out;
        }

        self.clamp_components(&mut out, constraints, paints);
        self.snap_all(&mut out, constraints);
        if out.iter().all(|&v| v == 0.0) {
            let even = constraints.target_total() / out.len() as f64;
            out.iter_mut().for_each(|v| *v = even);
            self.clamp_components(&mut out, constraints, paints);
            self.snap_all(&mut out, constraints);
        }

        let total: f64 = out.iter().sum();
        if total > 0.0 && !constraints.contains_total(total) {
            let target = window_target(total, constraints);
            let scale = target / total;
            out.iter_mut().for_each(|v| *v *= scale);
            self.clamp_components(&mut out, constraints, paints);
            self.snap_all(&mut out, constraints);
            self.absorb_residual(&mut out, target, constraints, paints);
        }

        let total: f64 = out.iter().sum();
        if !constraints.contains_total(total) {
            tracing::debug!(total, "repair could not reach the total window");
        }
        out
    }

    fn clamp_components(
        &self,
        volumes: &mut [f64],
        constraints: &VolumeConstraints,
        paints: &[Paint],
    ) {
        for (i, v) in volumes.iter_mut().enumerate() {
            if *v <= UNUSED_VOLUME {
                *v = 0.0;
                continue;
            }
            let (lower, upper) = component_bounds(i, constraints, paints);
            *v = v.max(lower).min(upper);
        }
    }

    /// Round used components to the grid, staying inside their bounds
    fn snap_all(&self, volumes: &mut [f64], constraints: &VolumeConstraints) {
        let Some(precision) = constraints.precision_ml else {
            return;
        };
        for v in volumes.iter_mut().filter(|v| **v > 0.0) {
            let mut snapped = round_to_precision(*v, precision);
            if let Some(min_comp) = constraints.minimum_component_volume_ml {
                if snapped < min_comp - VOLUME_SLACK {
                    snapped = grid_ceil(min_comp, precision);
                }
            }
            if let Some(max_comp) = constraints.maximum_component_volume_ml {
                if snapped > max_comp + VOLUME_SLACK {
                    snapped = grid_floor(max_comp, precision);
                }
            }
            *v = snapped;
        }
    }

    /// Spread `target - total` over the used components, largest first, each
    /// within its bounds. With a precision only whole grid steps move.
    fn absorb_residual(
        &self,
        volumes: &mut [f64],
        target: f64,
        constraints: &VolumeConstraints,
        paints: &[Paint],
    ) {
        let total: f64 = volumes.iter().sum();
        let mut residual = target - total;
        if let Some(precision) = constraints.precision_ml {
            residual = round_to_precision(residual, precision);
        }
        if residual.abs() <= UNUSED_VOLUME {
            return;
        }

        let mut order: Vec<usize> = (0..volumes.len()).filter(|&i| volumes[i] > 0.0).collect();
        order.sort_by(|&a, &b| {
            volumes[b]
                .partial_cmp(&volumes[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for i in order {
            if residual.abs() <= UNUSED_VOLUME {
                break;
            }
            let (lower, upper) = component_bounds(i, constraints, paints);
            let room = if residual > 0.0 {
                upper - volumes[i]
            } else {
                volumes[i] - lower
            };
            let room = match constraints.precision_ml {
                Some(precision) => grid_floor(room.max(0.0), precision),
                None => room.max(0.0),
            };
            let step = residual.abs().min(room);
            if residual > 0.0 {
                volumes[i] += step;
                residual -= step;
            } else {
                volumes[i] -= step;
                residual += step;
            }
        }
    }
}

/// Smallest and largest volume a used component may take
fn component_bounds(
    index: usize,
    constraints: &VolumeConstraints,
    paints: &[Paint],
) -> (f64, f64) {
    let lower = constraints.minimum_component_volume_ml.unwrap_or(0.0);
    let mut upper = constraints.maximum_component_volume_ml.unwrap_or(f64::INFINITY);
    if let Some(cap) = paints.get(index).and_then(|p| p.available_volume_ml) {
        upper = upper.min(cap);
    }
    (lower, upper)
}

/// First and last grid multiple inside the total window, if any
fn grid_bounds(constraints: &VolumeConstraints, precision: f64) -> Option<(f64, f64)> {
    let first = grid_ceil(constraints.min_total_volume_ml, precision);
    let last = grid_floor(constraints.max_total_volume_ml, precision);
    (first <= last + VOLUME_SLACK).then_some((first, last))
}

/// Total to rescale toward: the window clamp, moved to the nearest grid
/// multiple inside the window when a precision is set
fn window_target(total: f64, constraints: &VolumeConstraints) -> f64 {
    let clamped = total
        .max(constraints.min_total_volume_ml)
        .min(constraints.max_total_volume_ml);
    match constraints
        .precision_ml
        .and_then(|p| grid_bounds(constraints, p).map(|bounds| (p, bounds)))
    {
        Some((precision, (first, last))) => {
            round_to_precision(clamped, precision).max(first).min(last)
        }
        None => clamped,
    }
}

fn grid_ceil(value: f64, precision: f64) -> f64 {
    if precision <= 0.0 || !precision.is_finite() {
        return value;
    }
    ((value - PRECISION_SLACK) / precision).ceil() * precision
}

fn grid_floor(value: f64, precision: f64) -> f64 {
    if precision <= 0.0 || !precision.is_finite() {
        return value;
    }
    ((value + PRECISION_SLACK) / precision).floor() * precision
}

fn positive(field: &str, value: f64) -> Result<(), OptimizationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(OptimizationError::constraint(
            field,
            format!("must be a positive finite number, got {value}"),
        ));
    }
    Ok(())
}

/// Scale volumes proportionally so they sum to `total`
pub fn normalize_volumes(volumes: &[f64], total: f64) -> Vec<f64> {
    let sum: f64 = volumes.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        if volumes.is_empty() {
            return Vec::new();
        }
        return vec![total / volumes.len() as f64; volumes.len()];
    }
    volumes.iter().map(|v| v * total / sum).collect()
}

/// Scale all volumes up so the smallest used component reaches `minimum`
pub fn apply_minimum_volume(volumes: &[f64], minimum: f64) -> Vec<f64> {
    let smallest = volumes
        .iter()
        .copied()
        .filter(|v| *v > UNUSED_VOLUME)
        .fold(f64::INFINITY, f64::min);
    if !smallest.is_finite() || smallest >= minimum {
        return volumes.to_vec();
    }
    let factor = minimum / smallest;
    volumes.iter().map(|v| v * factor).collect()
}

pub fn round_to_precision(value: f64, precision: f64) -> f64 {
    if precision <= 0.0 || !precision.is_finite() {
        return value;
    }
    (value / precision).round() * precision
}
