//! Kubelka-Munk transforms for subtractive paint mixing
//!
//! Uses the K/S (absorption/scattering) ratio, with an optional surface
//! reflection correction keyed to the film finish.

use crate::models::Finish;

/// Lower clamp on internal reflectance
pub const MIN_REFLECTANCE: f64 = 0.001;
/// Upper clamp on internal reflectance
pub const MAX_REFLECTANCE: f64 = 0.999;

/// Smallest scattering used in ratios, keeps K/S finite
const MIN_SCATTERING: f64 = 1e-6;

/// Convert reflectance R to Kubelka-Munk K/S ratio
/// Formula: K/S = (1 - R)² / (2R)
#[inline]
pub fn reflectance_to_ks(r: f64) -> f64 {
    let r = r.clamp(MIN_REFLECTANCE, MAX_REFLECTANCE);
    (1.0 - r).powi(2) / (2.0 * r)
}

/// Convert Kubelka-Munk K/S ratio back to reflectance R
/// Formula: R = 1 + K/S - √((K/S)² + 2·K/S)
#[inline]
pub fn ks_to_reflectance(ks: f64) -> f64 {
    if !ks.is_finite() {
        return MIN_REFLECTANCE;
    }
    let ks = ks.max(0.0);
    let r = 1.0 + ks - (ks * ks + 2.0 * ks).sqrt();
    r.clamp(MIN_REFLECTANCE, MAX_REFLECTANCE)
}

/// Strip surface reflection from a measured reflectance
#[inline]
pub fn remove_surface_reflection(measured: f64, finish: Finish) -> f64 {
    let k = finish.surface_reflection();
    let measured = measured.clamp(0.0, 1.0);
    measured * (1.0 - k) / (1.0 - k * measured)
}

/// Add surface reflection back onto an internal reflectance
#[inline]
pub fn apply_surface_reflection(internal: f64, finish: Finish) -> f64 {
    let k = finish.surface_reflection();
    let internal = internal.clamp(0.0, 1.0);
    internal / (1.0 - k + k * internal)
}

/// Measured reflectance to K/S, correcting for the surface first
#[inline]
pub fn reflectance_to_ks_corrected(measured: f64, finish: Finish) -> f64 {
    reflectance_to_ks(remove_surface_reflection(measured, finish))
}

/// K/S to measured reflectance, adding the surface afterwards
#[inline]
pub fn ks_to_reflectance_corrected(ks: f64, finish: Finish) -> f64 {
    apply_surface_reflection(ks_to_reflectance(ks), finish)
}

/// Share of incident light absorbed rather than scattered: K / (K + S)
pub fn hiding_power(k: f64, s: f64) -> f64 {
    let total = k.max(0.0) + s.max(0.0);
    if total <= 0.0 {
        return 0.0;
    }
    k.max(0.0) / total
}

/// Reflectance asymptote of an opaque film: (a - b) / (a + b),
/// with a = (K + S) / S and b = √(a² - 1)
pub fn infinite_reflectance(k: f64, s: f64) -> f64 {
    let s = s.max(MIN_SCATTERING);
    let a = (k.max(0.0) + s) / s;
    let b = (a * a - 1.0).max(0.0).sqrt();
    ((a - b) / (a + b)).clamp(0.0, 1.0)
}

/// Reflectance of a film of finite thickness over a substrate.
///
/// Blends the opaque asymptote with the substrate reflectance, the substrate
/// share decaying exponentially with `(K + S) · thickness`.
pub fn film_reflectance(k: f64, s: f64, thickness: f64, substrate: f64) -> f64 {
    let r_inf = infinite_reflectance(k, s);
    let cover = 1.0 - (-(k.max(0.0) + s.max(0.0)) * thickness.max(0.0)).exp();
    (r_inf * cover + substrate.clamp(0.0, 1.0) * (1.0 - cover)).clamp(0.0, 1.0)
}

/// K/S of a (K, S) pair with scattering floored
#[inline]
pub fn ks_ratio(k: f64, s: f64) -> f64 {
    k.max(0.0) / s.max(MIN_SCATTERING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_round_trip() {
        for i in 1..=99 {
            let r = i as f64 / 100.0;
            let back = ks_to_reflectance(reflectance_to_ks(r));
            assert!((back - r).abs() < 1e-9, "R={r} came back as {back}");
        }
    }

    #[test]
    fn corrected_round_trip_every_finish() {
        for finish in [Finish::Matte, Finish::Satin, Finish::Gloss, Finish::Metallic] {
            for i in 1..=99 {
                let r = i as f64 / 100.0;
                let back =
                    ks_to_reflectance_corrected(reflectance_to_ks_corrected(r, finish), finish);
                assert!((back - r).abs() < 1e-3, "{finish:?}: R={r} came back as {back}");
            }
        }
    }

    #[test]
    fn degenerate_inputs_stay_finite() {
        assert_eq!(ks_to_reflectance(0.0), MAX_REFLECTANCE);
        assert_eq!(ks_to_reflectance(f64::INFINITY), MIN_REFLECTANCE);
        assert_eq!(ks_to_reflectance(f64::NAN), MIN_REFLECTANCE);
        assert!(reflectance_to_ks(0.0).is_finite());
        assert!(infinite_reflectance(0.5, 0.0).is_finite());
        assert_eq!(hiding_power(0.0, 0.0), 0.0);
    }

    #[test]
    fn glossier_finish_reflects_more() {
        let internal = 0.3;
        let matte = apply_surface_reflection(internal, Finish::Matte);
        let metallic = apply_surface_reflection(internal, Finish::Metallic);
        assert!(metallic > matte);
        assert!(matte > internal);
    }

    #[test]
    fn hiding_power_and_asymptote() {
        assert!((hiding_power(0.3, 0.7) - 0.3).abs() < 1e-12);
        // No absorption: a = 1, b = 0, fully reflective
        assert!((infinite_reflectance(0.0, 0.5) - 1.0).abs() < 1e-12);
        assert!(infinite_reflectance(0.9, 0.1) < infinite_reflectance(0.1, 0.9));
    }

    #[test]
    fn thin_film_shows_substrate() {
        let thin = film_reflectance(0.8, 0.2, 0.0, 0.9);
        assert!((thin - 0.9).abs() < 1e-12);
        let thick = film_reflectance(0.8, 0.2, 1_000.0, 0.9);
        assert!((thick - infinite_reflectance(0.8, 0.2)).abs() < 1e-9);
    }
}
