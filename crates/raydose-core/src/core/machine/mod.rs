//! Machine commissioning data: treatment-machine limits loaded from TOML and
//! the Hounsfield-to-density calibration curve loaded from CSV.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::core::models::beam::EnergyClass;
use crate::physics::DoseAlgorithm;

#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid commissioning data: {0}")]
    Invalid(String),
}

/// Mechanical and dosimetric limits of one treatment machine, plus the set of
/// dose algorithms commissioned for it.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineModel {
    pub name: String,
    pub energies: Vec<EnergyClass>,
    pub max_field_mm: f64,
    pub leaf_width_mm: f64,
    pub leaf_pairs: usize,
    pub max_leaf_speed_mm_s: f64,
    pub dose_rate_mu_min: f64,
    pub max_segments: usize,
    pub min_segment_area_mm2: f64,
    pub commissioned: Vec<DoseAlgorithm>,
}

impl MachineModel {
    pub fn load(path: &Path) -> Result<Self, DataLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| DataLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let model: MachineModel =
            toml::from_str(&content).map_err(|e| DataLoadError::Toml {
                path: path.to_string_lossy().to_string(),
                source: e,
            })?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), DataLoadError> {
        if self.energies.is_empty() {
            return Err(DataLoadError::Invalid(format!(
                "machine '{}' lists no energies",
                self.name
            )));
        }
        if self.leaf_pairs == 0 || !(self.leaf_width_mm > 0.0) {
            return Err(DataLoadError::Invalid(format!(
                "machine '{}' has an invalid MLC definition",
                self.name
            )));
        }
        if !(self.dose_rate_mu_min > 0.0) || !(self.max_leaf_speed_mm_s > 0.0) {
            return Err(DataLoadError::Invalid(format!(
                "machine '{}' has non-positive delivery rates",
                self.name
            )));
        }
        Ok(())
    }

    pub fn supports_algorithm(&self, algorithm: DoseAlgorithm) -> bool {
        self.commissioned.contains(&algorithm)
    }

    pub fn supports_energy(&self, energy: EnergyClass) -> bool {
        self.energies.contains(&energy)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationPoint {
    pub hounsfield: f64,
    pub density: f64,
}

/// Piecewise-linear Hounsfield-to-relative-electron-density calibration
/// curve, clamped at both ends.
#[derive(Debug, Clone)]
pub struct CalibrationCurve {
    points: Vec<CalibrationPoint>,
}

impl CalibrationCurve {
    pub fn from_points(mut points: Vec<CalibrationPoint>) -> Result<Self, DataLoadError> {
        if points.len() < 2 {
            return Err(DataLoadError::Invalid(
                "calibration curve needs at least two points".to_string(),
            ));
        }
        points.sort_by(|a, b| a.hounsfield.total_cmp(&b.hounsfield));
        for p in &points {
            if !p.density.is_finite() || p.density < 0.0 {
                return Err(DataLoadError::Invalid(format!(
                    "calibration density {} at HU {} is invalid",
                    p.density, p.hounsfield
                )));
            }
        }
        Ok(Self { points })
    }

    pub fn load_csv(path: &Path) -> Result<Self, DataLoadError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| DataLoadError::Csv {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let mut points = Vec::new();
        for result in reader.deserialize::<CalibrationPoint>() {
            let record = result.map_err(|e| DataLoadError::Csv {
                path: path.to_string_lossy().to_string(),
                source: e,
            })?;
            points.push(record);
        }
        Self::from_points(points)
    }

    /// Relative electron density for a Hounsfield value.
    pub fn density_for(&self, hounsfield: f64) -> f64 {
        let first = &self.points[0];
        let last = &self.points[self.points.len() - 1];
        if hounsfield <= first.hounsfield {
            return first.density;
        }
        if hounsfield >= last.hounsfield {
            return last.density;
        }
        for pair in self.points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if hounsfield >= a.hounsfield && hounsfield <= b.hounsfield {
                let t = (hounsfield - a.hounsfield) / (b.hounsfield - a.hounsfield);
                return a.density + t * (b.density - a.density);
            }
        }
        last.density
    }
}
