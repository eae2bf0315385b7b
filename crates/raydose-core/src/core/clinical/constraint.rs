use crate::core::metrics::MetricsError;
use crate::core::metrics::dvh::Dvh;
use crate::core::models::ids::StructureId;

/// The dose-volume quantity a hard constraint is placed on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DoseMetric {
    MinDose,
    MeanDose,
    MaxDose,
    /// Dx in Gy for the given volume percentage.
    DoseAtVolume { percent: f64 },
    /// Vx as a volume fraction for the given dose level.
    VolumeAtDose { dose_gy: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    AtMost(f64),
    AtLeast(f64),
}

/// Hard inequality on a dose-volume quantity. A plan violating any constraint
/// is infeasible regardless of its objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub structure: StructureId,
    pub metric: DoseMetric,
    pub bound: Bound,
}

impl Constraint {
    pub fn new(structure: StructureId, metric: DoseMetric, bound: Bound) -> Self {
        Self {
            structure,
            metric,
            bound,
        }
    }

    pub fn evaluate_metric(&self, samples: &[f64]) -> Result<f64, MetricsError> {
        if samples.is_empty() {
            return Err(MetricsError::EmptyStructure(String::new()));
        }
        Ok(match self.metric {
            DoseMetric::MinDose => samples.iter().copied().fold(f64::MAX, f64::min),
            DoseMetric::MeanDose => samples.iter().sum::<f64>() / samples.len() as f64,
            DoseMetric::MaxDose => samples.iter().copied().fold(f64::MIN, f64::max),
            DoseMetric::DoseAtVolume { percent } => {
                Dvh::from_samples(samples.to_vec(), "")?.dose_at_volume(percent)
            }
            DoseMetric::VolumeAtDose { dose_gy } => {
                Dvh::from_samples(samples.to_vec(), "")?.volume_at_dose(dose_gy)
            }
        })
    }

    /// Violation magnitude: zero when satisfied, strictly positive when the
    /// bound is exceeded.
    pub fn violation(&self, samples: &[f64]) -> Result<f64, MetricsError> {
        let value = self.evaluate_metric(samples)?;
        Ok(match self.bound {
            Bound::AtMost(limit) => (value - limit).max(0.0),
            Bound::AtLeast(limit) => (limit - value).max(0.0),
        })
    }
}
