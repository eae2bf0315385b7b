//! # Algorithm Strategy Set
//!
//! Five interchangeable dose calculation algorithms behind one closed enum.
//! Each maps a beam's primary fluence plus a density volume to a per-beam
//! dose grid on that volume's geometry; they differ in physical model and in
//! the cost/accuracy trade-off:
//!
//! - [`pencil_beam`] - density-scaled superposition of 1-D depth-dose
//!   kernels; fast, accurate only in near-homogeneous media.
//! - [`collapsed_cone`] - TERMA from attenuated primary fluence, transported
//!   along a fixed set of discrete cone directions by ray marching.
//! - [`analytical`] - pencil superposition with separable lateral scatter
//!   kernels and an anisotropic density-gradient correction.
//! - [`boltzmann`] - discrete-ordinates source iteration of the linear
//!   Boltzmann transport equation; handles high-gradient interfaces natively.
//! - [`fast`] - pencil beam on a coarsened grid for interactive feedback
//!   inside the optimizer's inner loop.
//!
//! Algorithm selection is a closed enumeration: adding an algorithm means
//! extending [`DoseAlgorithm`] and the dispatch below, not registering a
//! factory at runtime.

pub(crate) mod analytical;
pub(crate) mod boltzmann;
pub(crate) mod collapsed_cone;
pub(crate) mod fast;
pub(crate) mod heterogeneity;
pub mod kernels;
pub(crate) mod pencil_beam;
pub(crate) mod raytrace;

use serde::Deserialize;

use crate::core::models::beam::Beam;
use crate::core::models::dose::DoseGrid;
use crate::core::models::volume::Volume;
use crate::engine::cancel::CancelToken;
use crate::engine::error::EngineError;

/// The closed set of dose calculation algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DoseAlgorithm {
    PencilBeam,
    CollapsedCone,
    AnisotropicAnalytical,
    GridBoltzmann,
    FastApproximate,
}

impl DoseAlgorithm {
    pub fn label(&self) -> &'static str {
        match self {
            DoseAlgorithm::PencilBeam => "pencil-beam",
            DoseAlgorithm::CollapsedCone => "collapsed-cone",
            DoseAlgorithm::AnisotropicAnalytical => "anisotropic-analytical",
            DoseAlgorithm::GridBoltzmann => "grid-boltzmann",
            DoseAlgorithm::FastApproximate => "fast-approximate",
        }
    }
}

/// Numerical parameters shared by the algorithm implementations. Defaults are
/// configuration, not physics: they may be tightened per plan via
/// `engine::config::DoseConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsOptions {
    /// Ray-marching step for radiological depth and cone transport (mm).
    pub step_mm: f64,
    /// Number of discrete cone/ordinate directions (max 26, lattice-based).
    pub cone_directions: usize,
    /// Relative residual tolerance of the transport solver.
    pub transport_tolerance: f64,
    /// Sweep budget of the transport solver.
    pub transport_max_sweeps: usize,
    /// Fraction of attenuated energy re-emitted as isotropic scatter.
    pub scatter_ratio: f64,
    /// Grid coarsening factor of the fast approximate algorithm.
    pub coarsen_factor: usize,
}

impl Default for PhysicsOptions {
    fn default() -> Self {
        Self {
            step_mm: 1.0,
            cone_directions: 26,
            transport_tolerance: 1e-4,
            transport_max_sweeps: 200,
            scatter_ratio: 0.5,
            coarsen_factor: 4,
        }
    }
}

/// Dose of a single beam on the volume's grid. The common contract of all
/// five strategies; the caller guarantees the beam geometry intersects the
/// volume.
pub(crate) fn compute_beam_dose(
    volume: &Volume,
    beam: &Beam,
    algorithm: DoseAlgorithm,
    options: &PhysicsOptions,
    cancel: &CancelToken,
) -> Result<DoseGrid, EngineError> {
    match algorithm {
        DoseAlgorithm::PencilBeam => pencil_beam::compute(volume, beam, options, cancel),
        DoseAlgorithm::CollapsedCone => collapsed_cone::compute(volume, beam, options, cancel),
        DoseAlgorithm::AnisotropicAnalytical => analytical::compute(volume, beam, options, cancel),
        DoseAlgorithm::GridBoltzmann => boltzmann::compute(volume, beam, options, cancel),
        DoseAlgorithm::FastApproximate => fast::compute(volume, beam, options, cancel),
    }
}

/// Unit direction lattice used by the cone and ordinate transports: the 26
/// neighbor offsets of a voxel, optionally thinned to `count` directions.
pub(crate) fn direction_lattice(count: usize) -> Vec<[i32; 3]> {
    let mut all = Vec::with_capacity(26);
    for a in -1i32..=1 {
        for b in -1i32..=1 {
            for c in -1i32..=1 {
                if a != 0 || b != 0 || c != 0 {
                    all.push([a, b, c]);
                }
            }
        }
    }
    let count = count.clamp(1, all.len());
    if count == all.len() {
        return all;
    }
    // Thin evenly so the subset stays roughly isotropic.
    let stride = all.len() as f64 / count as f64;
    (0..count)
        .map(|i| all[(i as f64 * stride) as usize])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_lattice_has_26_unique_directions() {
        let dirs = direction_lattice(26);
        assert_eq!(dirs.len(), 26);
        for d in &dirs {
            assert_ne!(*d, [0, 0, 0]);
        }
    }

    #[test]
    fn direction_lattice_thins_to_requested_count() {
        assert_eq!(direction_lattice(8).len(), 8);
        assert_eq!(direction_lattice(100).len(), 26);
        assert_eq!(direction_lattice(0).len(), 1);
    }

    #[test]
    fn algorithm_labels_are_kebab_case() {
        assert_eq!(DoseAlgorithm::PencilBeam.label(), "pencil-beam");
        assert_eq!(DoseAlgorithm::GridBoltzmann.label(), "grid-boltzmann");
    }
}
