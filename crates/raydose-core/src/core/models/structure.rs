use nalgebra::Point3;
use slotmap::SlotMap;

use super::ModelError;
use super::grid::GridGeometry;
use super::ids::StructureId;

/// Named region of interest as a boolean mask over one volume's voxel grid.
///
/// A structure always shares the grid geometry of the volume it was defined
/// on; the mask length is validated at construction.
#[derive(Debug, Clone)]
pub struct Structure {
    name: String,
    geometry: GridGeometry,
    mask: Vec<bool>,
}

impl Structure {
    pub fn new(
        name: impl Into<String>,
        geometry: &GridGeometry,
        mask: Vec<bool>,
    ) -> Result<Self, ModelError> {
        if mask.len() != geometry.voxel_count() {
            return Err(ModelError::LengthMismatch {
                expected: geometry.voxel_count(),
                actual: mask.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            geometry: geometry.clone(),
            mask,
        })
    }

    /// Rasterize a sphere (center and radius in mm, patient frame).
    pub fn sphere(
        name: impl Into<String>,
        geometry: &GridGeometry,
        center: Point3<f64>,
        radius_mm: f64,
    ) -> Result<Self, ModelError> {
        let dims = geometry.dims();
        let mut mask = vec![false; geometry.voxel_count()];
        let r2 = radius_mm * radius_mm;
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = geometry.voxel_center(i, j, k);
                    if (p - center).norm_squared() <= r2 {
                        mask[geometry.linear_index(i, j, k)] = true;
                    }
                }
            }
        }
        Self::new(name, geometry, mask)
    }

    /// Rasterize an axis-aligned box given min/max corners in mm.
    pub fn cuboid(
        name: impl Into<String>,
        geometry: &GridGeometry,
        min: Point3<f64>,
        max: Point3<f64>,
    ) -> Result<Self, ModelError> {
        let dims = geometry.dims();
        let mut mask = vec![false; geometry.voxel_count()];
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = geometry.voxel_center(i, j, k);
                    if p.x >= min.x
                        && p.x <= max.x
                        && p.y >= min.y
                        && p.y <= max.y
                        && p.z >= min.z
                        && p.z <= max.z
                    {
                        mask[geometry.linear_index(i, j, k)] = true;
                    }
                }
            }
        }
        Self::new(name, geometry, mask)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn voxel_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn voxel_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| if m { Some(i) } else { None })
    }
}

/// Collection of structures with stable ids and deterministic iteration order.
#[derive(Debug, Clone, Default)]
pub struct StructureSet {
    structures: SlotMap<StructureId, Structure>,
    order: Vec<StructureId>,
}

impl StructureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, structure: Structure) -> StructureId {
        let id = self.structures.insert(structure);
        self.order.push(id);
        id
    }

    pub fn get(&self, id: StructureId) -> Option<&Structure> {
        self.structures.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<(StructureId, &Structure)> {
        self.order
            .iter()
            .filter_map(|&id| self.structures.get(id).map(|s| (id, s)))
            .find(|(_, s)| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StructureId, &Structure)> {
        self.order
            .iter()
            .filter_map(|&id| self.structures.get(id).map(|s| (id, s)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
