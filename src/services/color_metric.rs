//! Perceptual color difference
//!
//! CIEDE2000 per CIE Technical Report 142-2001, plus the classic CIE76
//! Euclidean distance for lightweight comparisons.

use serde::{Deserialize, Serialize};

use crate::models::PerceptualColor;

/// 25^7
const POW25_7: f64 = 6_103_515_625.0;

/// Parametric factors kL, kC, kH
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaEWeights {
    pub kl: f64,
    pub kc: f64,
    pub kh: f64,
}

impl Default for DeltaEWeights {
    fn default() -> Self {
        Self {
            kl: 1.0,
            kc: 1.0,
            kh: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaEMethod {
    #[default]
    Ciede2000,
    Cie76,
}

/// Intermediate CIEDE2000 terms, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaEBreakdown {
    pub delta_l: f64,
    pub delta_c: f64,
    pub delta_h: f64,
    pub sl: f64,
    pub sc: f64,
    pub sh: f64,
    pub rt: f64,
    pub total: f64,
}

pub fn delta(a: &PerceptualColor, b: &PerceptualColor, method: DeltaEMethod) -> f64 {
    match method {
        DeltaEMethod::Ciede2000 => ciede2000(a, b),
        DeltaEMethod::Cie76 => cie76(a, b),
    }
}

/// CIEDE2000 with kL = kC = kH = 1
pub fn ciede2000(a: &PerceptualColor, b: &PerceptualColor) -> f64 {
    ciede2000_breakdown(a, b, DeltaEWeights::default()).total
}

pub fn ciede2000_weighted(
    a: &PerceptualColor,
    b: &PerceptualColor,
    weights: DeltaEWeights,
) -> f64 {
    ciede2000_breakdown(a, b, weights).total
}

pub fn ciede2000_breakdown(
    lab1: &PerceptualColor,
    lab2: &PerceptualColor,
    weights: DeltaEWeights,
) -> DeltaEBreakdown {
    let c1 = lab1.a.hypot(lab1.b);
    let c2 = lab2.a.hypot(lab2.b);
    let c_mean = (c1 + c2) / 2.0;

    // Desaturation correction near the neutral axis
    let c_mean7 = c_mean.powi(7);
    let g = 0.5 * (1.0 - (c_mean7 / (c_mean7 + POW25_7)).sqrt());
    let a1p = (1.0 + g) * lab1.a;
    let a2p = (1.0 + g) * lab2.a;

    let c1p = a1p.hypot(lab1.b);
    let c2p = a2p.hypot(lab2.b);
    let h1p = hue_angle(a1p, lab1.b);
    let h2p = hue_angle(a2p, lab2.b);

    let achromatic = c1p * c2p == 0.0;

    let delta_lp = lab2.l - lab1.l;
    let delta_cp = c2p - c1p;

    let delta_hp = if achromatic {
        0.0
    } else {
        let dh = h2p - h1p;
        if dh.abs() <= 180.0 {
            dh
        } else if dh > 180.0 {
            dh - 360.0
        } else {
            dh + 360.0
        }
    };
    let delta_big_hp = 2.0 * (c1p * c2p).sqrt() * (delta_hp.to_radians() / 2.0).sin();

    let l_mean = (lab1.l + lab2.l) / 2.0;
    let cp_mean = (c1p + c2p) / 2.0;

    let hp_mean = if achromatic {
        h1p + h2p
    } else if (h1p - h2p).abs() <= 180.0 {
        (h1p + h2p) / 2.0
    } else if h1p + h2p < 360.0 {
        (h1p + h2p + 360.0) / 2.0
    } else {
        (h1p + h2p - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * (hp_mean - 30.0).to_radians().cos()
        + 0.24 * (2.0 * hp_mean).to_radians().cos()
        + 0.32 * (3.0 * hp_mean + 6.0).to_radians().cos()
        - 0.20 * (4.0 * hp_mean - 63.0).to_radians().cos();

    let l_off_sq = (l_mean - 50.0).powi(2);
    let sl = 1.0 + 0.015 * l_off_sq / (20.0 + l_off_sq).sqrt();
    let sc = 1.0 + 0.045 * cp_mean;
    let sh = 1.0 + 0.015 * cp_mean * t;

    let delta_theta = 30.0 * (-((hp_mean - 275.0) / 25.0).powi(2)).exp();
    let cp_mean7 = cp_mean.powi(7);
    let rc = 2.0 * (cp_mean7 / (cp_mean7 + POW25_7)).sqrt();
    let rt = -rc * (2.0 * delta_theta).to_radians().sin();

    let term_l = delta_lp / (weights.kl * sl);
    let term_c = delta_cp / (weights.kc * sc);
    let term_h = delta_big_hp / (weights.kh * sh);

    let total = (term_l * term_l + term_c * term_c + term_h * term_h + rt * term_c * term_h).sqrt();

    DeltaEBreakdown {
        delta_l: delta_lp,
        delta_c: delta_cp,
        delta_h: delta_big_hp,
        sl,
        sc,
        sh,
        rt,
        total,
    }
}

/// CIE76 Euclidean distance in Lab
pub fn cie76(a: &PerceptualColor, b: &PerceptualColor) -> f64 {
    let dl = b.l - a.l;
    let da = b.a - a.a;
    let db = b.b - a.b;
    (dl * dl + da * da + db * db).sqrt()
}

/// Hue angle in degrees, [0, 360)
fn hue_angle(a: f64, b: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        0.0
    } else {
        b.atan2(a).to_degrees().rem_euclid(360.0)
    }
}
