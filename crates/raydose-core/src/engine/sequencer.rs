//! Step-and-shoot MLC leaf sequencing.
//!
//! Bortfeld-style level decomposition: the relative fluence is quantized
//! into equal-height levels, and segments are extracted by repeatedly
//! opening, per row, the leftmost contiguous run of bixels that still owe a
//! level. Consecutive identical apertures are merged. Segments below the
//! machine's minimum area are suppressed (their fluence goes undelivered),
//! and the reconstruction is checked against the requested fluence: residual
//! error above the tolerance, or a segment count above the machine budget,
//! is `UndeliverableFluence`.

use tracing::{debug, instrument};

use super::config::SequencerConfig;
use super::error::EngineError;
use crate::core::machine::MachineModel;
use crate::core::models::beam::{ControlPoint, FluenceMap, LeafPair};
use crate::core::models::plan::Plan;

/// Decompose one beam's fluence into deliverable control points.
///
/// The returned sequence carries cumulative meterset; the aperture of each
/// point delivers the increment since the previous point.
#[instrument(skip_all, fields(mu = meterset_mu))]
pub fn sequence_fluence(
    fluence: &FluenceMap,
    meterset_mu: f64,
    gantry_deg: f64,
    collimator_deg: f64,
    machine: &MachineModel,
    config: &SequencerConfig,
) -> Result<Vec<ControlPoint>, EngineError> {
    let (nx, ny) = fluence.dims();
    let bixel = fluence.bixel_mm();
    let peak = fluence.max();
    if peak <= 0.0 || meterset_mu <= 0.0 {
        return Ok(vec![ControlPoint {
            gantry_deg,
            collimator_deg,
            leaf_pairs: vec![LeafPair::closed(); ny],
            meterset_mu: 0.0,
        }]);
    }

    let levels = config.levels.max(1);
    let level_height = peak / levels as f64;
    // Levels still owed per bixel.
    let mut owed: Vec<u32> = fluence
        .values()
        .iter()
        .map(|&v| (v / level_height).round() as u32)
        .collect();

    struct Segment {
        pairs: Vec<LeafPair>,
        mu: f64,
    }
    let mut segments: Vec<Segment> = Vec::new();
    let level_mu = level_height * meterset_mu;
    let min_area = machine.min_segment_area_mm2;

    while owed.iter().any(|&n| n > 0) {
        let mut pairs = Vec::with_capacity(ny);
        let mut area = 0.0;
        for j in 0..ny {
            // Leftmost contiguous run of bixels still owing a level.
            let row = &owed[j * nx..(j + 1) * nx];
            let start = row.iter().position(|&n| n > 0);
            let pair = match start {
                Some(i0) => {
                    let len = row[i0..].iter().take_while(|&&n| n > 0).count();
                    LeafPair {
                        left: fluence.bixel_x(i0) - bixel / 2.0,
                        right: fluence.bixel_x(i0 + len - 1) + bixel / 2.0,
                    }
                }
                None => LeafPair::closed(),
            };
            area += pair.opening_mm() * machine.leaf_width_mm;
            pairs.push(pair);
        }

        // Settle the owed levels whether or not the segment is emitted, so
        // the decomposition always terminates.
        for (j, pair) in pairs.iter().enumerate() {
            for i in 0..nx {
                let x = fluence.bixel_x(i);
                if x >= pair.left && x < pair.right && owed[j * nx + i] > 0 {
                    owed[j * nx + i] -= 1;
                }
            }
        }

        if area < min_area {
            debug!(area_mm2 = area, "suppressing sub-minimum segment");
            continue;
        }
        match segments.last_mut() {
            Some(last) if last.pairs == pairs => last.mu += level_mu,
            _ => segments.push(Segment {
                pairs,
                mu: level_mu,
            }),
        }
        if segments.len() > machine.max_segments {
            return Err(EngineError::UndeliverableFluence {
                reason: format!(
                    "decomposition needs more than the {} allowed segments",
                    machine.max_segments
                ),
            });
        }
    }

    let mut points = Vec::with_capacity(segments.len());
    let mut cumulative = 0.0;
    for segment in &segments {
        cumulative += segment.mu;
        points.push(ControlPoint {
            gantry_deg,
            collimator_deg,
            leaf_pairs: segment.pairs.clone(),
            meterset_mu: cumulative,
        });
    }
    if points.is_empty() {
        return Err(EngineError::UndeliverableFluence {
            reason: "every segment fell below the minimum aperture area".to_string(),
        });
    }

    // Reconstruction check against the requested (absolute) fluence.
    let reconstructed = FluenceMap::from_control_points(nx, ny, bixel, &points)?;
    let mut target_total = 0.0;
    let mut residual = 0.0;
    for (index, &f) in fluence.values().iter().enumerate() {
        let want = f * meterset_mu;
        target_total += want;
        residual += (reconstructed.values()[index] - want).abs();
    }
    let error = residual / target_total;
    if error > config.max_error_fraction {
        return Err(EngineError::UndeliverableFluence {
            reason: format!(
                "residual fluence error {:.1}% exceeds the {:.1}% tolerance",
                error * 100.0,
                config.max_error_fraction * 100.0
            ),
        });
    }
    debug!(
        segments = points.len(),
        error_fraction = error,
        "fluence sequenced"
    );
    Ok(points)
}

/// Estimated delivery time of a control-point sequence: beam-on time at the
/// machine's dose rate plus leaf travel between segments at maximum speed.
pub fn delivery_time_s(points: &[ControlPoint], machine: &MachineModel) -> f64 {
    let mut total = 0.0;
    let mut previous_mu = 0.0;
    for (index, cp) in points.iter().enumerate() {
        total += (cp.meterset_mu - previous_mu) / machine.dose_rate_mu_min * 60.0;
        previous_mu = cp.meterset_mu;
        if index > 0 {
            let travel = points[index - 1]
                .leaf_pairs
                .iter()
                .zip(&cp.leaf_pairs)
                .map(|(a, b)| (a.left - b.left).abs().max((a.right - b.right).abs()))
                .fold(0.0, f64::max);
            total += travel / machine.max_leaf_speed_mm_s;
        }
    }
    total
}

/// Sequence every beam of a plan in place and advance its lifecycle.
pub fn sequence_plan(
    plan: &mut Plan,
    machine: &MachineModel,
    config: &SequencerConfig,
) -> Result<(), EngineError> {
    for &id in plan.beam_ids().to_vec().iter() {
        let beam = plan
            .beam(id)
            .ok_or_else(|| EngineError::Internal("beam vanished from plan".to_string()))?;
        let points = sequence_fluence(
            &beam.fluence,
            beam.meterset_mu(),
            beam.gantry_deg,
            beam.collimator_deg,
            machine,
            config,
        )?;
        let (nx, ny) = beam.fluence.dims();
        let bixel = beam.fluence.bixel_mm();
        // The plan's fluence becomes the deliverable one, so downstream dose
        // reflects what the machine will actually deliver.
        let mut delivered = FluenceMap::from_control_points(nx, ny, bixel, &points)?;
        let beam = plan.beam_mut(id)?;
        beam.set_control_points(points)?;
        let meterset = beam.meterset_mu();
        if meterset > 0.0 {
            delivered.scale(1.0 / meterset);
        }
        beam.fluence = delivered;
    }
    plan.mark_sequenced()?;
    Ok(())
}
