//! Batho-family power-law heterogeneity correction.
//!
//! Applied by the convolution-family algorithms on top of the radiological
//! depth scaling; the transport solver handles heterogeneity natively and
//! must not apply it.

/// Power-law density correction for the dose at a voxel of `local_density`.
/// Unity in unit-density medium; the exponent is an energy-dependent kernel
/// parameter.
#[inline]
pub(crate) fn batho_correction(local_density: f64, exponent: f64) -> f64 {
    local_density.max(1e-3).powf(exponent)
}
