//! Beam-geometry projection and radiological path-length ray marching.

use nalgebra::{Point3, Vector3};

use crate::core::models::beam::Beam;
use crate::core::models::grid::GridGeometry;
use crate::core::models::volume::Volume;

/// Orthonormal beam coordinate frame: source position, beam axis, and the
/// aperture-plane basis with collimator rotation applied.
#[derive(Debug, Clone)]
pub(crate) struct BeamFrame {
    pub source: Point3<f64>,
    pub axis: Vector3<f64>,
    pub u: Vector3<f64>,
    pub v: Vector3<f64>,
    pub sad_mm: f64,
}

/// Projection of a point into beam coordinates: depth along the axis from the
/// source, aperture-plane position scaled to the isocenter distance, and the
/// inverse-square fluence factor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BeamCoords {
    pub depth_mm: f64,
    pub x_mm: f64,
    pub y_mm: f64,
    pub inverse_square: f64,
}

impl BeamFrame {
    pub fn new(beam: &Beam) -> Self {
        let source = beam.source_position();
        let axis = beam.axis();
        let mut u = axis.cross(&Vector3::z());
        if u.norm() < 1e-9 {
            u = axis.cross(&Vector3::x());
        }
        let u = u.normalize();
        let v = axis.cross(&u);

        let c = beam.collimator_deg.to_radians();
        let (sin_c, cos_c) = (c.sin(), c.cos());
        Self {
            source,
            axis,
            u: u * cos_c + v * sin_c,
            v: v * cos_c - u * sin_c,
            sad_mm: beam.sad_mm,
        }
    }

    /// `None` for points at or behind the source plane.
    pub fn project(&self, p: &Point3<f64>) -> Option<BeamCoords> {
        let rel = p - self.source;
        let depth = rel.dot(&self.axis);
        if depth <= 1.0 {
            return None;
        }
        let scale = self.sad_mm / depth;
        Some(BeamCoords {
            depth_mm: depth,
            x_mm: rel.dot(&self.u) * scale,
            y_mm: rel.dot(&self.v) * scale,
            inverse_square: scale * scale,
        })
    }
}

/// Slab-method intersection of a ray with a grid's bounding box. Returns the
/// entry/exit parameters `(t0, t1)` along `dir` (not necessarily unit), or
/// `None` when the ray misses.
pub(crate) fn clip_ray(
    geometry: &GridGeometry,
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
) -> Option<(f64, f64)> {
    let (lo, hi) = geometry.aabb();
    let mut t0 = 0.0f64;
    let mut t1 = f64::INFINITY;
    for axis in 0..3 {
        let d = dir[axis];
        if d.abs() < 1e-12 {
            if origin[axis] < lo[axis] || origin[axis] > hi[axis] {
                return None;
            }
            continue;
        }
        let mut ta = (lo[axis] - origin[axis]) / d;
        let mut tb = (hi[axis] - origin[axis]) / d;
        if ta > tb {
            std::mem::swap(&mut ta, &mut tb);
        }
        t0 = t0.max(ta);
        t1 = t1.min(tb);
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

/// Water-equivalent depth from the volume surface to `target` along the ray
/// from `source`, by fixed-step midpoint marching over the density field.
pub(crate) fn radiological_depth(
    volume: &Volume,
    source: &Point3<f64>,
    target: &Point3<f64>,
    step_mm: f64,
) -> f64 {
    let dir = target - source;
    let distance = dir.norm();
    if distance < 1e-9 {
        return 0.0;
    }
    let unit = dir / distance;
    let Some((t0, t1)) = clip_ray(volume.geometry(), source, &unit) else {
        return 0.0;
    };
    let start = t0.max(0.0);
    let end = t1.min(distance);
    if end <= start {
        return 0.0;
    }

    let mut depth = 0.0;
    let mut t = start;
    while t < end {
        let step = step_mm.min(end - t);
        let mid = source + unit * (t + step * 0.5);
        depth += volume.density_at(&mid) * step;
        t += step;
    }
    depth
}
