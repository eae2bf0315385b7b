use slotmap::SlotMap;

use super::ModelError;
use super::beam::Beam;
use super::ids::BeamId;

/// Plan lifecycle. A plan is created as a draft, mutated by the optimizer,
/// finalized by the leaf sequencer, and frozen once approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Draft,
    Optimized,
    Sequenced,
    Approved,
}

/// Aggregate of beams plus their fluence/aperture parameters.
///
/// Beam iteration order is the insertion order, kept separately from the
/// slotmap storage so optimization results are deterministic.
#[derive(Debug, Clone)]
pub struct Plan {
    beams: SlotMap<BeamId, Beam>,
    order: Vec<BeamId>,
    status: PlanStatus,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    pub fn new() -> Self {
        Self {
            beams: SlotMap::with_key(),
            order: Vec::new(),
            status: PlanStatus::Draft,
        }
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn add_beam(&mut self, beam: Beam) -> Result<BeamId, ModelError> {
        self.ensure_mutable()?;
        let id = self.beams.insert(beam);
        self.order.push(id);
        Ok(id)
    }

    pub fn beam(&self, id: BeamId) -> Option<&Beam> {
        self.beams.get(id)
    }

    pub fn beam_mut(&mut self, id: BeamId) -> Result<&mut Beam, ModelError> {
        self.ensure_mutable()?;
        self.beams.get_mut(id).ok_or(ModelError::PlanFrozen)
    }

    pub fn beam_ids(&self) -> &[BeamId] {
        &self.order
    }

    pub fn beams_ordered(&self) -> impl Iterator<Item = (BeamId, &Beam)> {
        self.order
            .iter()
            .filter_map(|&id| self.beams.get(id).map(|b| (id, b)))
    }

    pub fn beam_count(&self) -> usize {
        self.order.len()
    }

    /// Total monitor units across all beams.
    pub fn total_meterset_mu(&self) -> f64 {
        self.beams_ordered().map(|(_, b)| b.meterset_mu()).sum()
    }

    pub fn mark_optimized(&mut self) -> Result<(), ModelError> {
        self.ensure_mutable()?;
        self.status = PlanStatus::Optimized;
        Ok(())
    }

    pub fn mark_sequenced(&mut self) -> Result<(), ModelError> {
        self.ensure_mutable()?;
        self.status = PlanStatus::Sequenced;
        Ok(())
    }

    /// Freeze the plan. Any further mutation fails with `PlanFrozen`.
    pub fn approve(&mut self) -> Result<(), ModelError> {
        self.ensure_mutable()?;
        self.status = PlanStatus::Approved;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), ModelError> {
        if self.status == PlanStatus::Approved {
            return Err(ModelError::PlanFrozen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::beam::{EnergyClass, FluenceMap};
    use nalgebra::Point3;

    fn beam() -> Beam {
        Beam::new(
            EnergyClass::Mv6,
            1000.0,
            Point3::origin(),
            0.0,
            0.0,
            FluenceMap::uniform(4, 4, 10.0, 1.0).unwrap(),
            50.0,
        )
        .unwrap()
    }

    #[test]
    fn beams_iterate_in_insertion_order() {
        let mut plan = Plan::new();
        let mut angled = beam();
        angled.gantry_deg = 90.0;
        let a = plan.add_beam(beam()).unwrap();
        let b = plan.add_beam(angled).unwrap();
        let ids: Vec<BeamId> = plan.beams_ordered().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(plan.total_meterset_mu(), 100.0);
    }

    #[test]
    fn approved_plan_rejects_mutation() {
        let mut plan = Plan::new();
        let id = plan.add_beam(beam()).unwrap();
        plan.approve().unwrap();
        assert_eq!(plan.status(), PlanStatus::Approved);
        assert!(matches!(plan.add_beam(beam()), Err(ModelError::PlanFrozen)));
        assert!(matches!(plan.beam_mut(id), Err(ModelError::PlanFrozen)));
        assert!(matches!(plan.approve(), Err(ModelError::PlanFrozen)));
    }

    #[test]
    fn lifecycle_progresses_through_states() {
        let mut plan = Plan::new();
        plan.add_beam(beam()).unwrap();
        assert_eq!(plan.status(), PlanStatus::Draft);
        plan.mark_optimized().unwrap();
        assert_eq!(plan.status(), PlanStatus::Optimized);
        plan.mark_sequenced().unwrap();
        assert_eq!(plan.status(), PlanStatus::Sequenced);
        plan.approve().unwrap();
        assert_eq!(plan.status(), PlanStatus::Approved);
    }
}
