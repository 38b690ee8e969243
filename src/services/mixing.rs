//! Mixture color prediction
//!
//! Standard mode averages Lab channels by volume share. Enhanced mode uses
//! Kubelka-Munk theory: K and S curves add by concentration, the mixed K/S is
//! inverted to reflectance and integrated back into Lab.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array1;

use crate::models::{
    Finish, MixMode, OptimizationError, Paint, PerceptualColor, D65_WHITE, SPECTRAL_SAMPLES,
    SPECTRAL_START_NM, SPECTRAL_STEP_NM,
};
use crate::services::kubelka_munk::{
    film_reflectance, ks_ratio, ks_to_reflectance_corrected, reflectance_to_ks_corrected,
};

/// Tolerance on Σ ratios = 1
pub const RATIO_SUM_TOLERANCE: f64 = 1e-6;

/// Short band ends below this wavelength (nm)
const SHORT_BAND_END_NM: f64 = 500.0;
/// Mid band covers up to and including this wavelength (nm)
const MID_BAND_END_NM: f64 = 590.0;

const MIN_CONCENTRATION: f64 = 0.05;
const MIN_PAINT_SCATTERING: f64 = 0.01;
const BAND_CLAMP: (f64, f64) = (0.005, 0.995);

/// Visible-spectrum band of a spectral sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Short,
    Mid,
    Long,
}

impl Band {
    fn of(wavelength_nm: f64) -> Self {
        if wavelength_nm < SHORT_BAND_END_NM {
            Band::Short
        } else if wavelength_nm <= MID_BAND_END_NM {
            Band::Mid
        } else {
            Band::Long
        }
    }

    fn index(&self) -> usize {
        match self {
            Band::Short => 0,
            Band::Mid => 1,
            Band::Long => 2,
        }
    }
}

fn wavelength(i: usize) -> f64 {
    SPECTRAL_START_NM + SPECTRAL_STEP_NM * i as f64
}

/// Photopic sensitivity approximation used to weight samples within a band
fn luminosity(wavelength_nm: f64) -> f64 {
    0.05 + (-0.5 * ((wavelength_nm - 555.0) / 100.0).powi(2)).exp()
}

/// Predicts mixture colors. Holds the band-to-XYZ mapping and its inverse.
#[derive(Debug, Clone)]
pub struct MixingModel {
    band_matrix: Matrix3<f64>,
    band_inverse: Matrix3<f64>,
}

impl Default for MixingModel {
    fn default() -> Self {
        Self::new(default_band_matrix())
    }
}

impl MixingModel {
    /// `band_matrix` maps (short, mid, long) band reflectance to white-relative XYZ.
    /// Falls back to the default mapping if it is singular.
    pub fn new(band_matrix: Matrix3<f64>) -> Self {
        match band_matrix.try_inverse() {
            Some(band_inverse) => Self {
                band_matrix,
                band_inverse,
            },
            None => {
                tracing::warn!("singular band matrix, using default");
                let band_matrix = default_band_matrix();
                let band_inverse = band_matrix.try_inverse().unwrap_or_else(Matrix3::identity);
                Self {
                    band_matrix,
                    band_inverse,
                }
            }
        }
    }

    /// [`MixingModel::mix`] for caller-supplied input: paints are validated
    /// and `ratios` must be one non-negative share per paint summing to 1.
    pub fn try_mix(
        &self,
        paints: &[Paint],
        ratios: &[f64],
        mode: MixMode,
    ) -> Result<PerceptualColor, OptimizationError> {
        check_ratios(paints, ratios)?;
        for paint in paints {
            paint.validate()?;
        }
        Ok(self.mix(paints, ratios, mode))
    }

    /// Predict the color of `paints` mixed at `ratios`
    pub fn mix(&self, paints: &[Paint], ratios: &[f64], mode: MixMode) -> PerceptualColor {
        match mode {
            MixMode::Standard => mix_simple(paints, ratios),
            MixMode::Enhanced => self.mix_kubelka_munk(paints, ratios),
        }
    }

    /// Kubelka-Munk mixing. Uses measured spectral curves when a paint has them,
    /// otherwise curves synthesised from its Lab color.
    pub fn mix_kubelka_munk(&self, paints: &[Paint], ratios: &[f64]) -> PerceptualColor {
        let weights = normalized(ratios);
        let (k_mix, s_mix) = self.accumulate(paints, &weights);
        let finish = dominant_finish(paints, &weights);

        let reflectance: Array1<f64> = k_mix
            .iter()
            .zip(s_mix.iter())
            .map(|(&k, &s)| ks_to_reflectance_corrected(ks_ratio(k, s), finish))
            .collect();

        self.reflectance_to_lab(&reflectance)
    }

    /// Mixture applied as a film of `thickness` over a substrate of uniform
    /// reflectance. Thin films let the substrate through.
    pub fn mix_over_substrate(
        &self,
        paints: &[Paint],
        ratios: &[f64],
        thickness: f64,
        substrate_reflectance: f64,
    ) -> PerceptualColor {
        let weights = normalized(ratios);
        let (k_mix, s_mix) = self.accumulate(paints, &weights);

        let reflectance: Array1<f64> = k_mix
            .iter()
            .zip(s_mix.iter())
            .map(|(&k, &s)| film_reflectance(k, s, thickness, substrate_reflectance))
            .collect();

        self.reflectance_to_lab(&reflectance)
    }

    /// Per-wavelength K and S curves for one paint
    pub fn paint_curves(&self, paint: &Paint) -> (Array1<f64>, Array1<f64>) {
        if let Some(spectral) = &paint.spectral {
            if spectral.k.len() == SPECTRAL_SAMPLES && spectral.s.len() == SPECTRAL_SAMPLES {
                return (
                    Array1::from_vec(spectral.k.clone()),
                    Array1::from_vec(spectral.s.clone()),
                );
            }
        }

        let scattering = paint.kubelka_munk.s.max(MIN_PAINT_SCATTERING);
        let reflectance = self.synthesize_reflectance(&paint.lab);
        let s = Array1::from_elem(SPECTRAL_SAMPLES, scattering);
        let k = reflectance.mapv(|r| reflectance_to_ks_corrected(r, paint.finish) * scattering);
        (k, s)
    }

    /// Piecewise-flat reflectance curve whose band integration reproduces `lab`
    pub fn synthesize_reflectance(&self, lab: &PerceptualColor) -> Array1<f64> {
        let xyz = lab.to_xyz();
        let relative = Vector3::new(
            xyz[0] / D65_WHITE[0],
            xyz[1] / D65_WHITE[1],
            xyz[2] / D65_WHITE[2],
        );
        let bands = (self.band_inverse * relative).map(|r| r.clamp(BAND_CLAMP.0, BAND_CLAMP.1));

        (0..SPECTRAL_SAMPLES)
            .map(|i| bands[Band::of(wavelength(i)).index()])
            .collect()
    }

    /// Integrate a 40-sample reflectance curve into Lab through the three bands
    pub fn reflectance_to_lab(&self, reflectance: &Array1<f64>) -> PerceptualColor {
        let mut sums = [0.0; 3];
        let mut norms = [0.0; 3];
        for (i, &r) in reflectance.iter().enumerate() {
            let lambda = wavelength(i);
            let band = Band::of(lambda).index();
            let w = luminosity(lambda);
            sums[band] += w * r;
            norms[band] += w;
        }
        let bands = Vector3::from_iterator(
            (0..3).map(|b| if norms[b] > 0.0 { sums[b] / norms[b] } else { 0.0 }),
        );

        let relative = self.band_matrix * bands;
        PerceptualColor::from_xyz([
            relative[0] * D65_WHITE[0],
            relative[1] * D65_WHITE[1],
            relative[2] * D65_WHITE[2],
        ])
    }

    fn accumulate(&self, paints: &[Paint], weights: &[f64]) -> (Array1<f64>, Array1<f64>) {
        let mut k_mix = Array1::zeros(SPECTRAL_SAMPLES);
        let mut s_mix = Array1::zeros(SPECTRAL_SAMPLES);

        for (paint, &weight) in paints.iter().zip(weights.iter()) {
            if weight <= 0.0 {
                continue;
            }
            let concentration = weight * paint.tinting_strength.max(MIN_CONCENTRATION);
            let (k, s) = self.paint_curves(paint);
            k_mix.scaled_add(concentration, &k);
            s_mix.scaled_add(concentration, &s);
        }
        (k_mix, s_mix)
    }
}

/// Default luminosity-weighted band mapping. Rows are X, Y, Z; columns are the
/// short, mid and long bands. Each row sums to 1 so a flat spectrum is neutral.
pub fn default_band_matrix() -> Matrix3<f64> {
    Matrix3::new(
        0.20, 0.30, 0.50, //
        0.10, 0.70, 0.20, //
        0.90, 0.10, 0.00,
    )
}

/// Per-channel Lab average weighted by volume share
pub fn mix_simple(paints: &[Paint], ratios: &[f64]) -> PerceptualColor {
    let weights = normalized(ratios);
    let mut lab = PerceptualColor::new(0.0, 0.0, 0.0);
    for (paint, &w) in paints.iter().zip(weights.iter()) {
        lab.l += paint.lab.l * w;
        lab.a += paint.lab.a * w;
        lab.b += paint.lab.b * w;
    }
    lab
}

/// Volume-weighted K, S and opacity of a mixture
pub fn aggregate_optics(paints: &[Paint], ratios: &[f64]) -> (f64, f64, f64) {
    let weights = normalized(ratios);
    paints
        .iter()
        .zip(weights.iter())
        .fold((0.0, 0.0, 0.0), |(k, s, o), (paint, &w)| {
            (
                k + paint.kubelka_munk.k * w,
                s + paint.kubelka_munk.s * w,
                o + paint.opacity * w,
            )
        })
}

/// Strict caller-contract check on a ratio vector
pub fn check_ratios(paints: &[Paint], ratios: &[f64]) -> Result<(), OptimizationError> {
    if paints.is_empty() {
        return Err(OptimizationError::InvalidRatios("no paints to mix".into()));
    }
    if paints.len() != ratios.len() {
        return Err(OptimizationError::InvalidRatios(format!(
            "{} ratios for {} paints",
            ratios.len(),
            paints.len()
        )));
    }
    if let Some((i, r)) = ratios
        .iter()
        .enumerate()
        .find(|(_, r)| !r.is_finite() || **r < 0.0)
    {
        return Err(OptimizationError::InvalidRatios(format!(
            "ratio {i} is {r}, expected a non-negative finite value"
        )));
    }
    let sum: f64 = ratios.iter().sum();
    if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
        return Err(OptimizationError::InvalidRatios(format!(
            "ratios sum to {sum}, expected 1"
        )));
    }
    Ok(())
}

/// Normalize to Σ = 1; non-positive sums become an even split
fn normalized(ratios: &[f64]) -> Vec<f64> {
    let clean: Vec<f64> = ratios
        .iter()
        .map(|&r| if r.is_finite() { r.max(0.0) } else { 0.0 })
        .collect();
    let sum: f64 = clean.iter().sum();
    if sum <= 0.0 {
        let n = clean.len().max(1) as f64;
        return vec![1.0 / n; clean.len()];
    }
    clean.iter().map(|r| r / sum).collect()
}

fn dominant_finish(paints: &[Paint], weights: &[f64]) -> Finish {
    paints
        .iter()
        .zip(weights.iter())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(paint, _)| paint.finish)
        .unwrap_or_default()
}
