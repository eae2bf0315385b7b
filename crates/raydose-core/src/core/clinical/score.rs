use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::constraint::Constraint;
use super::objective::Objective;
use crate::core::metrics::{MetricsError, structure_samples};
use crate::core::models::dose::DoseGrid;
use crate::core::models::ids::StructureId;
use crate::core::models::structure::StructureSet;

/// Result of scoring one dose distribution against the clinical goals.
///
/// The objective cost and the constraint violations are tracked separately:
/// violations are never folded into the cost, so the optimizer can minimize
/// the objective while feasibility is judged independently.
#[derive(Debug, Clone)]
pub struct CostBreakdown {
    pub objective_cost: f64,
    pub constraint_violations: Vec<f64>,
}

impl CostBreakdown {
    pub fn total_violation(&self) -> f64 {
        self.constraint_violations.iter().sum()
    }

    pub fn is_feasible(&self) -> bool {
        self.constraint_violations.iter().all(|&v| v <= 0.0)
    }
}

/// The single deterministic scoring function combining all objectives and
/// constraints for one dose grid. Structure samples are gathered once per
/// structure and shared across goals.
pub fn composite_cost(
    dose: &DoseGrid,
    structures: &StructureSet,
    objectives: &[Objective],
    constraints: &[Constraint],
) -> Result<CostBreakdown, MetricsError> {
    let mut cache: HashMap<StructureId, Vec<f64>> = HashMap::new();

    let mut objective_cost = 0.0;
    for objective in objectives {
        let samples = samples_for(objective.structure, dose, structures, &mut cache)?;
        objective_cost += objective.penalty(samples)?;
    }

    let mut constraint_violations = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        let samples = samples_for(constraint.structure, dose, structures, &mut cache)?;
        constraint_violations.push(constraint.violation(samples)?);
    }

    Ok(CostBreakdown {
        objective_cost,
        constraint_violations,
    })
}

fn samples_for<'a>(
    id: StructureId,
    dose: &DoseGrid,
    structures: &StructureSet,
    cache: &'a mut HashMap<StructureId, Vec<f64>>,
) -> Result<&'a [f64], MetricsError> {
    match cache.entry(id) {
        Entry::Occupied(entry) => Ok(entry.into_mut().as_slice()),
        Entry::Vacant(entry) => {
            let structure = structures
                .get(id)
                .ok_or_else(|| MetricsError::EmptyStructure("<unknown structure>".to_string()))?;
            let samples = structure_samples(dose, structure)?;
            Ok(entry.insert(samples).as_slice())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clinical::constraint::{Bound, DoseMetric};
    use crate::core::clinical::objective::{GoalDirection, ObjectiveKind};
    use crate::core::models::grid::GridGeometry;
    use crate::core::models::structure::Structure;
    use nalgebra::{Point3, Vector3};

    fn setup() -> (DoseGrid, StructureSet, StructureId) {
        let g = GridGeometry::new(
            [4, 4, 4],
            Vector3::new(5.0, 5.0, 5.0),
            Point3::new(-10.0, -10.0, -10.0),
        )
        .unwrap();
        let mut dose = DoseGrid::zeros(g.clone());
        for index in 0..dose.values().len() {
            dose.values_mut()[index] = 10.0;
        }
        let mut structures = StructureSet::new();
        let mask = vec![true; g.voxel_count()];
        let id = structures.insert(Structure::new("PTV", &g, mask).unwrap());
        (dose, structures, id)
    }

    #[test]
    fn cost_is_zero_when_all_goals_met() {
        let (dose, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 20.0,
                direction: GoalDirection::AtMost,
            },
            1.0,
        )];
        let constraints = vec![Constraint::new(
            id,
            DoseMetric::MaxDose,
            Bound::AtMost(15.0),
        )];
        let breakdown = composite_cost(&dose, &structures, &objectives, &constraints).unwrap();
        assert_eq!(breakdown.objective_cost, 0.0);
        assert!(breakdown.is_feasible());
        assert_eq!(breakdown.total_violation(), 0.0);
    }

    #[test]
    fn violations_stay_separate_from_objective_cost() {
        let (dose, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 5.0,
                direction: GoalDirection::AtMost,
            },
            1.0,
        )];
        let constraints = vec![Constraint::new(
            id,
            DoseMetric::MaxDose,
            Bound::AtMost(8.0),
        )];
        let breakdown = composite_cost(&dose, &structures, &objectives, &constraints).unwrap();
        // Mean 10, limit 5: cost 25. Max 10, limit 8: violation 2, not in cost.
        assert!((breakdown.objective_cost - 25.0).abs() < 1e-12);
        assert!((breakdown.constraint_violations[0] - 2.0).abs() < 1e-12);
        assert!(!breakdown.is_feasible());
    }

    #[test]
    fn scoring_is_deterministic() {
        let (dose, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::Eud {
                a: 2.0,
                limit_gy: 8.0,
                direction: GoalDirection::AtMost,
            },
            3.0,
        )];
        let a = composite_cost(&dose, &structures, &objectives, &[]).unwrap();
        let b = composite_cost(&dose, &structures, &objectives, &[]).unwrap();
        assert_eq!(a.objective_cost, b.objective_cost);
    }
}
