//! Per-beam influence precomputation for the fluence optimizer.
//!
//! Plan dose is linear in per-beam weights, so the dose samples of every
//! clinically relevant structure can be precomputed once per beam at unit
//! weight and recombined for any weight vector without re-running the dose
//! engine. The optimizer's inner loop then costs one weighted sum per
//! structure instead of one dose computation.

use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, instrument};

use super::cancel::CancelToken;
use super::config::DoseConfig;
use super::error::EngineError;
use crate::core::clinical::constraint::Constraint;
use crate::core::clinical::objective::Objective;
use crate::core::clinical::score::CostBreakdown;
use crate::core::metrics::structure_samples;
use crate::core::models::beam::Beam;
use crate::core::models::ids::StructureId;
use crate::core::models::plan::Plan;
use crate::core::models::structure::StructureSet;
use crate::core::models::volume::Volume;
use crate::physics;

/// Deduplicated ids of every structure referenced by a goal, in first-use
/// order.
pub(crate) fn goal_structures(
    objectives: &[Objective],
    constraints: &[Constraint],
) -> Vec<StructureId> {
    let mut ids: Vec<StructureId> = Vec::new();
    for id in objectives
        .iter()
        .map(|o| o.structure)
        .chain(constraints.iter().map(|c| c.structure))
    {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Precomputed per-beam, per-structure dose samples at unit beam weight.
pub struct InfluenceModel {
    structure_ids: Vec<StructureId>,
    /// `samples[beam][structure]` follows plan and `structure_ids` order.
    samples: Vec<Vec<Vec<f64>>>,
}

impl InfluenceModel {
    /// Computes one dose grid per beam with the configured (typically fast)
    /// algorithm and gathers the samples of every structure referenced by an
    /// objective or constraint.
    #[instrument(skip_all, fields(beams = plan.beam_count()))]
    pub fn build(
        volume: &Volume,
        plan: &Plan,
        structures: &StructureSet,
        objectives: &[Objective],
        constraints: &[Constraint],
        config: &DoseConfig,
        cancel: &CancelToken,
    ) -> Result<Self, EngineError> {
        let structure_ids = goal_structures(objectives, constraints);

        let beams: Vec<&Beam> = plan.beams_ordered().map(|(_, b)| b).collect();
        super::compute::check_beam_geometry(volume, &beams)?;

        let gather = |beam: &&Beam| -> Result<Vec<Vec<f64>>, EngineError> {
            let dose = physics::compute_beam_dose(
                volume,
                beam,
                config.algorithm,
                &config.physics,
                cancel,
            )?;
            let mut per_structure = Vec::with_capacity(structure_ids.len());
            for &id in &structure_ids {
                let structure = structures.get(id).ok_or_else(|| {
                    EngineError::Internal("goal references an unknown structure".to_string())
                })?;
                per_structure.push(structure_samples(&dose, structure)?);
            }
            Ok(per_structure)
        };

        #[cfg(feature = "parallel")]
        let samples: Vec<Vec<Vec<f64>>> =
            beams.par_iter().map(gather).collect::<Result<_, _>>()?;
        #[cfg(not(feature = "parallel"))]
        let samples: Vec<Vec<Vec<f64>>> = beams.iter().map(gather).collect::<Result<_, _>>()?;

        debug!(
            structures = structure_ids.len(),
            beams = samples.len(),
            "influence model ready"
        );
        Ok(Self {
            structure_ids,
            samples,
        })
    }

    pub fn beam_count(&self) -> usize {
        self.samples.len()
    }

    /// Dose samples of one structure under the given per-beam weights.
    fn combined_samples(&self, structure: StructureId, weights: &[f64]) -> Option<Vec<f64>> {
        let s = self.structure_ids.iter().position(|&id| id == structure)?;
        let n = self.samples.first().map(|b| b[s].len())?;
        let mut combined = vec![0.0; n];
        for (beam, &w) in self.samples.iter().zip(weights) {
            for (acc, &v) in combined.iter_mut().zip(&beam[s]) {
                *acc += w * v;
            }
        }
        Some(combined)
    }

    /// Composite cost of a weight vector, equivalent to scoring the full
    /// weighted dose grid but without recomputing dose.
    pub fn cost(
        &self,
        weights: &[f64],
        objectives: &[Objective],
        constraints: &[Constraint],
    ) -> Result<CostBreakdown, EngineError> {
        let mut cache: HashMap<StructureId, Vec<f64>> = HashMap::new();
        let mut samples_of = |id: StructureId| -> Result<Vec<f64>, EngineError> {
            if let Some(s) = cache.get(&id) {
                return Ok(s.clone());
            }
            let s = self.combined_samples(id, weights).ok_or_else(|| {
                EngineError::Internal("goal references a structure outside the model".to_string())
            })?;
            cache.insert(id, s.clone());
            Ok(s)
        };

        let mut objective_cost = 0.0;
        for objective in objectives {
            let samples = samples_of(objective.structure)?;
            objective_cost += objective.penalty(&samples)?;
        }
        let mut constraint_violations = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            let samples = samples_of(constraint.structure)?;
            constraint_violations.push(constraint.violation(&samples)?);
        }
        Ok(CostBreakdown {
            objective_cost,
            constraint_violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clinical::objective::{GoalDirection, ObjectiveKind};
    use crate::core::models::beam::{EnergyClass, FluenceMap};
    use crate::core::models::grid::GridGeometry;
    use crate::core::models::structure::Structure;
    use crate::physics::DoseAlgorithm;
    use nalgebra::{Point3, Vector3};

    fn setup() -> (Volume, Plan, StructureSet, StructureId) {
        let g = GridGeometry::new(
            [10, 10, 10],
            Vector3::new(5.0, 5.0, 5.0),
            Point3::new(-25.0, -25.0, -25.0),
        )
        .unwrap();
        let volume = Volume::uniform(g.clone(), 1.0).unwrap();

        let mut plan = Plan::new();
        for gantry in [0.0, 180.0] {
            plan.add_beam(
                Beam::new(
                    EnergyClass::Mv6,
                    1000.0,
                    Point3::origin(),
                    gantry,
                    0.0,
                    FluenceMap::uniform(8, 8, 5.0, 1.0).unwrap(),
                    100.0,
                )
                .unwrap(),
            )
            .unwrap();
        }

        let mut structures = StructureSet::new();
        let target = Structure::sphere("PTV", &g, Point3::origin(), 12.0).unwrap();
        let id = structures.insert(target);
        (volume, plan, structures, id)
    }

    fn config() -> DoseConfig {
        DoseConfig {
            algorithm: DoseAlgorithm::PencilBeam,
            grid_spacing_mm: None,
            physics: Default::default(),
            max_divergent_fraction: 1e-3,
        }
    }

    #[test]
    fn cost_is_linear_in_weights() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 0.0,
                direction: GoalDirection::AtLeast,
            },
            1.0,
        )];
        let model = InfluenceModel::build(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &config(),
            &CancelToken::new(),
        )
        .unwrap();

        // With limit 0 and AtLeast direction the penalty is always zero; use
        // the combined samples directly for the linearity check.
        let single = model.combined_samples(id, &[1.0, 0.0]).unwrap();
        let doubled = model.combined_samples(id, &[2.0, 0.0]).unwrap();
        for (a, b) in single.iter().zip(&doubled) {
            assert!((b - 2.0 * a).abs() < 1e-12);
        }
        let both = model.combined_samples(id, &[1.0, 1.0]).unwrap();
        let other = model.combined_samples(id, &[0.0, 1.0]).unwrap();
        for ((s, o), b) in single.iter().zip(&other).zip(&both) {
            assert!((s + o - b).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_weights_give_zero_dose_cost() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MinDose { limit_gy: 10.0 },
            1.0,
        )];
        let model = InfluenceModel::build(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &config(),
            &CancelToken::new(),
        )
        .unwrap();
        let breakdown = model.cost(&[0.0, 0.0], &objectives, &[]).unwrap();
        // Cold target: shortfall is the full 10 Gy, weighted quadratic.
        assert!((breakdown.objective_cost - 100.0).abs() < 1e-9);
    }

    #[test]
    fn cancellation_aborts_the_build() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MinDose { limit_gy: 10.0 },
            1.0,
        )];
        let token = CancelToken::new();
        token.cancel();
        let result = InfluenceModel::build(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &config(),
            &token,
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
