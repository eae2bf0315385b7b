//! Analytic beam kernels: per-energy depth-dose parameterization and lateral
//! scatter widths. Parameters are commissioning-style constants; the depth
//! curve is the classic buildup-times-attenuation form
//! `D(d) = (1 - e^(-beta d)) * e^(-mu d)` normalized to 1 at the buildup
//! depth `d_max = ln(1 + beta/mu) / beta`.

use crate::core::models::beam::EnergyClass;

/// Reference calibration: dose per monitor unit at d_max for a unit-fluence
/// field at the source-axis distance (1 cGy / MU).
pub const GY_PER_MU: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamKernel {
    /// Linear attenuation coefficient in water (1/mm).
    pub mu_mm: f64,
    /// Electron-buildup coefficient (1/mm).
    pub buildup_mm: f64,
    /// Lateral scatter Gaussian width at unit density (mm).
    pub sigma_mm: f64,
    /// Power-law exponent of the Batho-family heterogeneity correction.
    pub batho_exponent: f64,
}

static KERNEL_6MV: BeamKernel = BeamKernel {
    mu_mm: 0.0049,
    buildup_mm: 0.25,
    sigma_mm: 3.0,
    batho_exponent: 0.30,
};

static KERNEL_6FFF: BeamKernel = BeamKernel {
    mu_mm: 0.0052,
    buildup_mm: 0.28,
    sigma_mm: 2.6,
    batho_exponent: 0.30,
};

static KERNEL_10MV: BeamKernel = BeamKernel {
    mu_mm: 0.0044,
    buildup_mm: 0.14,
    sigma_mm: 3.4,
    batho_exponent: 0.28,
};

static KERNEL_10FFF: BeamKernel = BeamKernel {
    mu_mm: 0.0047,
    buildup_mm: 0.16,
    sigma_mm: 3.0,
    batho_exponent: 0.28,
};

static KERNEL_15MV: BeamKernel = BeamKernel {
    mu_mm: 0.0041,
    buildup_mm: 0.115,
    sigma_mm: 3.8,
    batho_exponent: 0.26,
};

impl BeamKernel {
    pub fn for_energy(energy: EnergyClass) -> &'static BeamKernel {
        match energy {
            EnergyClass::Mv6 => &KERNEL_6MV,
            EnergyClass::Mv6Fff => &KERNEL_6FFF,
            EnergyClass::Mv10 => &KERNEL_10MV,
            EnergyClass::Mv10Fff => &KERNEL_10FFF,
            EnergyClass::Mv15 => &KERNEL_15MV,
        }
    }

    /// Depth of maximum dose in unit-density medium (mm).
    pub fn dmax_mm(&self) -> f64 {
        (1.0 + self.buildup_mm / self.mu_mm).ln() / self.buildup_mm
    }

    #[inline]
    fn raw(&self, depth_mm: f64) -> f64 {
        (1.0 - (-self.buildup_mm * depth_mm).exp()) * (-self.mu_mm * depth_mm).exp()
    }

    /// Normalized depth dose: 1.0 at d_max, 0 for negative depth.
    pub fn depth_dose(&self, depth_mm: f64) -> f64 {
        if depth_mm <= 0.0 {
            return 0.0;
        }
        self.raw(depth_mm) / self.raw(self.dmax_mm())
    }

    /// Unnormalized lateral Gaussian at radius `r_mm` for the given width.
    #[inline]
    pub fn lateral(r_mm: f64, sigma_mm: f64) -> f64 {
        (-(r_mm * r_mm) / (2.0 * sigma_mm * sigma_mm)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buildup_depths_match_published_ranges() {
        // 6 MV ~ 15 mm, 10 MV ~ 25 mm, 15 MV ~ 28-30 mm.
        let d6 = BeamKernel::for_energy(EnergyClass::Mv6).dmax_mm();
        let d10 = BeamKernel::for_energy(EnergyClass::Mv10).dmax_mm();
        let d15 = BeamKernel::for_energy(EnergyClass::Mv15).dmax_mm();
        assert!((13.0..=18.0).contains(&d6), "6MV dmax = {d6}");
        assert!((22.0..=28.0).contains(&d10), "10MV dmax = {d10}");
        assert!((27.0..=33.0).contains(&d15), "15MV dmax = {d15}");
        assert!(d6 < d10 && d10 < d15);
    }

    #[test]
    fn depth_dose_peaks_at_dmax() {
        let k = BeamKernel::for_energy(EnergyClass::Mv6);
        let dmax = k.dmax_mm();
        assert!((k.depth_dose(dmax) - 1.0).abs() < 1e-12);
        assert!(k.depth_dose(dmax - 5.0) < 1.0);
        assert!(k.depth_dose(dmax + 50.0) < 1.0);
        assert_eq!(k.depth_dose(-1.0), 0.0);
    }

    #[test]
    fn depth_dose_decays_exponentially_past_buildup() {
        let k = BeamKernel::for_energy(EnergyClass::Mv10);
        let d1 = k.depth_dose(100.0);
        let d2 = k.depth_dose(200.0);
        assert!(d2 < d1);
        // Beyond buildup, the ratio approaches pure attenuation.
        let ratio = d2 / d1;
        let expected = (-k.mu_mm * 100.0).exp();
        assert!((ratio - expected).abs() < 0.01);
    }

    #[test]
    fn fff_beams_build_up_shallower_than_flattened() {
        let flat = BeamKernel::for_energy(EnergyClass::Mv10).dmax_mm();
        let fff = BeamKernel::for_energy(EnergyClass::Mv10Fff).dmax_mm();
        assert!(fff < flat);
    }

    #[test]
    fn lateral_kernel_is_unit_on_axis() {
        assert_eq!(BeamKernel::lateral(0.0, 3.0), 1.0);
        assert!(BeamKernel::lateral(9.0, 3.0) < 0.05);
    }
}
