use itertools::Itertools;

use super::{MetricsError, structure_samples};
use crate::core::models::dose::DoseGrid;
use crate::core::models::structure::Structure;

const DEFAULT_BIN_COUNT: usize = 256;

/// One point on a cumulative DVH curve: the fraction of structure volume
/// receiving at least `dose_gy`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DvhBin {
    pub dose_gy: f64,
    pub volume_fraction: f64,
}

/// Cumulative dose-volume histogram of one structure.
///
/// The curve starts at (0 Gy, 1.0), is monotonically non-increasing in volume
/// fraction, and spans the full dose range present in the structure. Scalar
/// queries (Dx, Vx) interpolate on the sorted sample distribution, so D100
/// equals the minimum dose and D0 the maximum.
#[derive(Debug, Clone)]
pub struct Dvh {
    sorted_samples: Vec<f64>,
    bins: Vec<DvhBin>,
    mean: f64,
}

impl Dvh {
    pub fn new(dose: &DoseGrid, structure: &Structure) -> Result<Self, MetricsError> {
        let samples = structure_samples(dose, structure)?;
        Self::from_samples(samples, structure.name())
    }

    pub fn from_samples(
        mut samples: Vec<f64>,
        structure_name: &str,
    ) -> Result<Self, MetricsError> {
        if samples.is_empty() {
            return Err(MetricsError::EmptyStructure(structure_name.to_string()));
        }
        samples.sort_by(|a, b| a.total_cmp(b));
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let max = *samples.last().unwrap_or(&0.0);

        let bin_count = DEFAULT_BIN_COUNT;
        let top = if max > 0.0 { max } else { 1.0 };
        let mut bins = Vec::with_capacity(bin_count + 1);
        // Walk the sorted samples once; `cursor` counts samples below the level.
        let mut cursor = 0usize;
        for b in 0..=bin_count {
            let level = top * b as f64 / bin_count as f64;
            while cursor < samples.len() && samples[cursor] < level {
                cursor += 1;
            }
            bins.push(DvhBin {
                dose_gy: level,
                volume_fraction: (samples.len() - cursor) as f64 / n,
            });
        }

        Ok(Self {
            sorted_samples: samples,
            bins,
            mean,
        })
    }

    pub fn curve(&self) -> &[DvhBin] {
        &self.bins
    }

    pub fn min_dose(&self) -> f64 {
        self.sorted_samples[0]
    }

    pub fn max_dose(&self) -> f64 {
        self.sorted_samples[self.sorted_samples.len() - 1]
    }

    pub fn mean_dose(&self) -> f64 {
        self.mean
    }

    /// Dx: the dose received by at least `percent`% of the structure volume.
    /// D100 is the minimum dose, D0 the maximum.
    pub fn dose_at_volume(&self, percent: f64) -> f64 {
        let percent = percent.clamp(0.0, 100.0);
        let n = self.sorted_samples.len();
        if n == 1 {
            return self.sorted_samples[0];
        }
        // Position on the ascending sample list: 100% -> min, 0% -> max.
        let pos = (1.0 - percent / 100.0) * (n - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let t = pos - lo as f64;
        self.sorted_samples[lo] * (1.0 - t) + self.sorted_samples[hi] * t
    }

    /// Vx: the fraction of structure volume receiving at least `dose_gy`.
    pub fn volume_at_dose(&self, dose_gy: f64) -> f64 {
        let n = self.sorted_samples.len() as f64;
        let below = self
            .sorted_samples
            .iter()
            .take_while(|&&d| d < dose_gy)
            .count() as f64;
        (n - below) / n
    }

    /// The curve is valid when the volume fraction never increases with dose.
    pub fn is_monotone(&self) -> bool {
        self.bins
            .iter()
            .tuple_windows()
            .all(|(a, b)| b.volume_fraction <= a.volume_fraction + 1e-12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::grid::GridGeometry;
    use nalgebra::{Point3, Vector3};

    fn dvh_from(samples: Vec<f64>) -> Dvh {
        Dvh::from_samples(samples, "TEST").unwrap()
    }

    #[test]
    fn empty_structure_is_an_error() {
        let result = Dvh::from_samples(vec![], "EMPTY");
        assert!(matches!(result, Err(MetricsError::EmptyStructure(_))));
    }

    #[test]
    fn curve_is_monotone_non_increasing() {
        let dvh = dvh_from(vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 10.0]);
        assert!(dvh.is_monotone());
        assert_eq!(dvh.curve()[0].volume_fraction, 1.0);
        let last = dvh.curve().last().unwrap();
        assert!(last.volume_fraction <= 1.0 / 7.0 + 1e-12);
    }

    #[test]
    fn dx_endpoints_match_min_and_max() {
        let dvh = dvh_from(vec![2.0, 8.0, 4.0, 6.0]);
        assert_eq!(dvh.dose_at_volume(100.0), 2.0);
        assert_eq!(dvh.dose_at_volume(0.0), 8.0);
        assert_eq!(dvh.min_dose(), 2.0);
        assert_eq!(dvh.max_dose(), 8.0);
        assert_eq!(dvh.mean_dose(), 5.0);
    }

    #[test]
    fn dx_interpolates_between_samples() {
        let dvh = dvh_from(vec![0.0, 10.0]);
        assert!((dvh.dose_at_volume(50.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn vx_counts_volume_at_or_above_dose() {
        let dvh = dvh_from(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(dvh.volume_at_dose(0.0), 1.0);
        assert_eq!(dvh.volume_at_dose(2.5), 0.5);
        assert_eq!(dvh.volume_at_dose(100.0), 0.0);
    }

    #[test]
    fn dvh_from_dose_grid_uses_structure_mask() {
        let g = GridGeometry::new(
            [4, 4, 4],
            Vector3::new(5.0, 5.0, 5.0),
            Point3::new(-10.0, -10.0, -10.0),
        )
        .unwrap();
        let mut dose = DoseGrid::zeros(g.clone());
        dose.add(1, 1, 1, 10.0);

        let mut mask = vec![false; g.voxel_count()];
        mask[g.linear_index(1, 1, 1)] = true;
        mask[g.linear_index(2, 2, 2)] = true;
        let structure = crate::core::models::structure::Structure::new("PTV", &g, mask).unwrap();

        let dvh = Dvh::new(&dose, &structure).unwrap();
        assert_eq!(dvh.max_dose(), 10.0);
        assert_eq!(dvh.min_dose(), 0.0);
        assert_eq!(dvh.volume_at_dose(5.0), 0.5);
    }
}
