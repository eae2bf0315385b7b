use std::str::FromStr;

use nalgebra::{Point3, Vector3};
use serde::Deserialize;

use super::ModelError;

/// Nominal accelerating potential of a photon beam, flattened or
/// flattening-filter-free (FFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum EnergyClass {
    #[serde(rename = "6MV")]
    Mv6,
    #[serde(rename = "6FFF")]
    Mv6Fff,
    #[serde(rename = "10MV")]
    Mv10,
    #[serde(rename = "10FFF")]
    Mv10Fff,
    #[serde(rename = "15MV")]
    Mv15,
}

static ENERGY_BY_NAME: phf::Map<&'static str, EnergyClass> = phf::phf_map! {
    "6MV" => EnergyClass::Mv6,
    "6FFF" => EnergyClass::Mv6Fff,
    "10MV" => EnergyClass::Mv10,
    "10FFF" => EnergyClass::Mv10Fff,
    "15MV" => EnergyClass::Mv15,
};

impl EnergyClass {
    pub fn label(&self) -> &'static str {
        match self {
            EnergyClass::Mv6 => "6MV",
            EnergyClass::Mv6Fff => "6FFF",
            EnergyClass::Mv10 => "10MV",
            EnergyClass::Mv10Fff => "10FFF",
            EnergyClass::Mv15 => "15MV",
        }
    }

    pub fn is_flattening_filter_free(&self) -> bool {
        matches!(self, EnergyClass::Mv6Fff | EnergyClass::Mv10Fff)
    }
}

impl FromStr for EnergyClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ENERGY_BY_NAME
            .get(s.trim().to_ascii_uppercase().as_str())
            .copied()
            .ok_or_else(|| ModelError::UnknownEnergy(s.to_string()))
    }
}

/// One MLC leaf pair: left and right leaf edges in mm at the isocenter plane.
/// A fully closed pair has `left == right`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafPair {
    pub left: f64,
    pub right: f64,
}

impl LeafPair {
    pub fn closed() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
        }
    }

    pub fn opening_mm(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }
}

/// One machine state in a beam's delivery sequence: angles, aperture shape,
/// and the cumulative meterset reached at this point.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPoint {
    pub gantry_deg: f64,
    pub collimator_deg: f64,
    pub leaf_pairs: Vec<LeafPair>,
    /// Cumulative monitor units delivered up to and including this point.
    pub meterset_mu: f64,
}

/// 2-D fluence distribution across a beam's aperture plane, discretized into
/// bixels centered on the beam axis at the isocenter distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FluenceMap {
    nx: usize,
    ny: usize,
    bixel_mm: f64,
    values: Vec<f64>,
}

impl FluenceMap {
    pub fn new(nx: usize, ny: usize, bixel_mm: f64, values: Vec<f64>) -> Result<Self, ModelError> {
        if values.len() != nx * ny {
            return Err(ModelError::LengthMismatch {
                expected: nx * ny,
                actual: values.len(),
            });
        }
        for (index, &value) in values.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::InvalidFluence { index, value });
            }
        }
        Ok(Self {
            nx,
            ny,
            bixel_mm,
            values,
        })
    }

    pub fn uniform(nx: usize, ny: usize, bixel_mm: f64, value: f64) -> Result<Self, ModelError> {
        Self::new(nx, ny, bixel_mm, vec![value; nx * ny])
    }

    /// Fluence delivered by a control-point sequence, rasterized at the
    /// isocenter plane in monitor units. Row `j` is shaped by leaf pair `j`;
    /// each point's aperture delivers the meterset increment since the
    /// previous point (step-and-shoot convention).
    pub fn from_control_points(
        nx: usize,
        ny: usize,
        bixel_mm: f64,
        points: &[ControlPoint],
    ) -> Result<Self, ModelError> {
        let mut map = Self::uniform(nx, ny, bixel_mm, 0.0)?;
        let mut previous = 0.0;
        for cp in points {
            let segment_mu = cp.meterset_mu - previous;
            previous = cp.meterset_mu;
            if segment_mu <= 0.0 {
                continue;
            }
            for (j, pair) in cp.leaf_pairs.iter().enumerate().take(ny) {
                for i in 0..nx {
                    let x = map.bixel_x(i);
                    if x >= pair.left && x < pair.right {
                        let v = map.get(i, j) + segment_mu;
                        map.set(i, j, v);
                    }
                }
            }
        }
        Ok(map)
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn bixel_mm(&self) -> f64 {
        self.bixel_mm
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[j * self.nx + i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[j * self.nx + i] = value.max(0.0);
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values {
            *v = (*v * factor).max(0.0);
        }
    }

    /// Physical x-extent of row center for bixel column `i` (mm, aperture plane).
    #[inline]
    pub fn bixel_x(&self, i: usize) -> f64 {
        (i as f64 + 0.5 - self.nx as f64 / 2.0) * self.bixel_mm
    }

    /// Physical y-extent of row center for bixel row `j` (mm, aperture plane).
    #[inline]
    pub fn bixel_y(&self, j: usize) -> f64 {
        (j as f64 + 0.5 - self.ny as f64 / 2.0) * self.bixel_mm
    }

    /// Bilinear fluence at an aperture-plane position (mm); zero outside the map.
    pub fn value_at(&self, x_mm: f64, y_mm: f64) -> f64 {
        let fx = x_mm / self.bixel_mm + self.nx as f64 / 2.0 - 0.5;
        let fy = y_mm / self.bixel_mm + self.ny as f64 / 2.0 - 0.5;
        if fx < -0.5 || fy < -0.5 || fx > self.nx as f64 - 0.5 || fy > self.ny as f64 - 0.5 {
            return 0.0;
        }
        let fx = fx.clamp(0.0, self.nx as f64 - 1.0);
        let fy = fy.clamp(0.0, self.ny as f64 - 1.0);
        let i0 = fx.floor() as usize;
        let j0 = fy.floor() as usize;
        let i1 = (i0 + 1).min(self.nx - 1);
        let j1 = (j0 + 1).min(self.ny - 1);
        let tx = fx - i0 as f64;
        let ty = fy - j0 as f64;

        let top = self.get(i0, j0) * (1.0 - tx) + self.get(i1, j0) * tx;
        let bottom = self.get(i0, j1) * (1.0 - tx) + self.get(i1, j1) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

/// Geometric description of one radiation source: energy class, source-axis
/// distance, isocenter, angles, aperture fluence, and the ordered delivery
/// sequence of control points.
#[derive(Debug, Clone)]
pub struct Beam {
    pub energy: EnergyClass,
    pub sad_mm: f64,
    pub isocenter: Point3<f64>,
    pub gantry_deg: f64,
    pub collimator_deg: f64,
    pub fluence: FluenceMap,
    control_points: Vec<ControlPoint>,
}

impl Beam {
    /// Create a beam with a single open control point delivering `meterset_mu`
    /// through the full fluence extent.
    pub fn new(
        energy: EnergyClass,
        sad_mm: f64,
        isocenter: Point3<f64>,
        gantry_deg: f64,
        collimator_deg: f64,
        fluence: FluenceMap,
        meterset_mu: f64,
    ) -> Result<Self, ModelError> {
        if !(sad_mm > 0.0) {
            return Err(ModelError::InvalidSad(energy));
        }
        let (_, ny) = fluence.dims();
        let half = fluence.bixel_mm() * fluence.dims().0 as f64 / 2.0;
        let open = ControlPoint {
            gantry_deg,
            collimator_deg,
            leaf_pairs: vec![
                LeafPair {
                    left: -half,
                    right: half,
                };
                ny
            ],
            meterset_mu,
        };
        let mut beam = Self {
            energy,
            sad_mm,
            isocenter,
            gantry_deg,
            collimator_deg,
            fluence,
            control_points: Vec::new(),
        };
        beam.set_control_points(vec![open])?;
        Ok(beam)
    }

    /// Replace the control-point sequence, enforcing beam invariants:
    /// at least one point, non-decreasing cumulative meterset, and
    /// non-crossing leaf pairs.
    pub fn set_control_points(&mut self, points: Vec<ControlPoint>) -> Result<(), ModelError> {
        if points.is_empty() {
            return Err(ModelError::NoControlPoints);
        }
        let mut previous = 0.0;
        for (index, cp) in points.iter().enumerate() {
            if cp.meterset_mu < previous {
                return Err(ModelError::DecreasingMeterset {
                    index,
                    previous,
                    value: cp.meterset_mu,
                });
            }
            previous = cp.meterset_mu;
            for (pair_index, pair) in cp.leaf_pairs.iter().enumerate() {
                if pair.left > pair.right {
                    return Err(ModelError::CrossedLeaves {
                        index: pair_index,
                        left: pair.left,
                        right: pair.right,
                    });
                }
            }
        }
        self.control_points = points;
        Ok(())
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    /// Total monitor units delivered by this beam.
    pub fn meterset_mu(&self) -> f64 {
        self.control_points
            .last()
            .map(|cp| cp.meterset_mu)
            .unwrap_or(0.0)
    }

    /// Source position in patient coordinates. The gantry rotates about the
    /// patient z axis; at gantry 0 the source sits on the +y axis and the
    /// beam travels along -y.
    pub fn source_position(&self) -> Point3<f64> {
        let g = self.gantry_deg.to_radians();
        self.isocenter + Vector3::new(g.sin(), g.cos(), 0.0) * self.sad_mm
    }

    /// Unit vector from the source toward the isocenter.
    pub fn axis(&self) -> Vector3<f64> {
        (self.isocenter - self.source_position()).normalize()
    }
}
