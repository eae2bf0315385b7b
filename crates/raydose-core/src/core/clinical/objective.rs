use crate::core::metrics::MetricsError;
use crate::core::metrics::dvh::Dvh;
use crate::core::models::ids::StructureId;

/// Whether a goal pushes the quantity down (`AtMost`) or up (`AtLeast`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalDirection {
    AtMost,
    AtLeast,
}

/// Scalar dose goal on one structure. Each kind evaluates to a non-negative
/// quadratic penalty from the structure's dose samples.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveKind {
    MeanDose {
        limit_gy: f64,
        direction: GoalDirection,
    },
    MaxDose {
        limit_gy: f64,
    },
    MinDose {
        limit_gy: f64,
    },
    /// Dx: dose received by `percent`% of the structure volume.
    DoseAtVolume {
        percent: f64,
        limit_gy: f64,
        direction: GoalDirection,
    },
    /// Vx: volume fraction receiving at least `dose_gy`.
    VolumeAtDose {
        dose_gy: f64,
        limit_fraction: f64,
        direction: GoalDirection,
    },
    /// Equivalent uniform dose with volume-effect parameter `a` (a != 0).
    Eud {
        a: f64,
        limit_gy: f64,
        direction: GoalDirection,
    },
    /// Tumor control probability (logistic model); penalized for falling
    /// below `target` probability.
    Tcp {
        d50_gy: f64,
        gamma: f64,
        target: f64,
    },
    /// Normal-tissue complication probability (logistic LKB form); penalized
    /// for exceeding `limit` probability.
    Ntcp {
        td50_gy: f64,
        m: f64,
        limit: f64,
    },
}

/// One weighted objective: a structure, a goal, and its importance.
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub structure: StructureId,
    pub kind: ObjectiveKind,
    pub weight: f64,
}

impl Objective {
    pub fn new(structure: StructureId, kind: ObjectiveKind, weight: f64) -> Self {
        Self {
            structure,
            kind,
            weight,
        }
    }

    /// Weighted quadratic penalty of this objective over a structure's dose
    /// samples. Zero when the goal is met.
    pub fn penalty(&self, samples: &[f64]) -> Result<f64, MetricsError> {
        let shortfall = self.kind.violation(samples)?;
        Ok(self.weight * shortfall * shortfall)
    }
}

impl ObjectiveKind {
    /// Magnitude by which the goal is missed (0 when satisfied).
    pub fn violation(&self, samples: &[f64]) -> Result<f64, MetricsError> {
        let achieved = self.achieved(samples)?;
        Ok(match self {
            ObjectiveKind::MeanDose { limit_gy, direction }
            | ObjectiveKind::DoseAtVolume {
                limit_gy, direction, ..
            }
            | ObjectiveKind::Eud {
                limit_gy, direction, ..
            } => directed_excess(achieved, *limit_gy, *direction),
            ObjectiveKind::MaxDose { limit_gy } => {
                directed_excess(achieved, *limit_gy, GoalDirection::AtMost)
            }
            ObjectiveKind::MinDose { limit_gy } => {
                directed_excess(achieved, *limit_gy, GoalDirection::AtLeast)
            }
            ObjectiveKind::VolumeAtDose {
                limit_fraction,
                direction,
                ..
            } => directed_excess(achieved, *limit_fraction, *direction),
            ObjectiveKind::Tcp { target, .. } => (*target - achieved).max(0.0),
            ObjectiveKind::Ntcp { limit, .. } => (achieved - *limit).max(0.0),
        })
    }

    /// The raw metric value this goal is judged against.
    pub fn achieved(&self, samples: &[f64]) -> Result<f64, MetricsError> {
        if samples.is_empty() {
            return Err(MetricsError::EmptyStructure(String::new()));
        }
        Ok(match self {
            ObjectiveKind::MeanDose { .. } => mean(samples),
            ObjectiveKind::MaxDose { .. } => samples.iter().copied().fold(f64::MIN, f64::max),
            ObjectiveKind::MinDose { .. } => samples.iter().copied().fold(f64::MAX, f64::min),
            ObjectiveKind::DoseAtVolume { percent, .. } => {
                Dvh::from_samples(samples.to_vec(), "")?.dose_at_volume(*percent)
            }
            ObjectiveKind::VolumeAtDose { dose_gy, .. } => {
                Dvh::from_samples(samples.to_vec(), "")?.volume_at_dose(*dose_gy)
            }
            ObjectiveKind::Eud { a, .. } => eud(samples, *a),
            ObjectiveKind::Tcp { d50_gy, gamma, .. } => tcp(eud(samples, 1.0), *d50_gy, *gamma),
            ObjectiveKind::Ntcp { td50_gy, m, .. } => ntcp(eud(samples, 1.0), *td50_gy, *m),
        })
    }
}

fn directed_excess(achieved: f64, limit: f64, direction: GoalDirection) -> f64 {
    match direction {
        GoalDirection::AtMost => (achieved - limit).max(0.0),
        GoalDirection::AtLeast => (limit - achieved).max(0.0),
    }
}

fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Generalized equivalent uniform dose: (mean(d^a))^(1/a).
/// `a` large -> max-dominated (serial organs), `a` = 1 -> mean, `a` negative
/// -> cold-spot-dominated (tumors).
pub fn eud(samples: &[f64], a: f64) -> f64 {
    debug_assert!(a != 0.0, "EUD volume-effect parameter must be non-zero");
    let n = samples.len() as f64;
    // Zero dose with a negative exponent would blow up; treat any cold voxel
    // as driving the EUD to zero, which is the limiting behavior.
    if a < 0.0 && samples.iter().any(|&d| d <= 0.0) {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&d| d.powf(a)).sum();
    (sum / n).powf(1.0 / a)
}

/// Logistic tumor-control probability in the EUD.
pub fn tcp(eud_gy: f64, d50_gy: f64, gamma: f64) -> f64 {
    if eud_gy <= 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + (d50_gy / eud_gy).powf(4.0 * gamma))
}

/// Logistic approximation of the LKB normal-tissue complication probability.
pub fn ntcp(eud_gy: f64, td50_gy: f64, m: f64) -> f64 {
    let t = (eud_gy - td50_gy) / (m * td50_gy);
    1.0 / (1.0 + (-1.6 * t).exp())
}
