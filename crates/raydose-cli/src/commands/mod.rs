pub mod compute;
pub mod optimize;

use crate::error::Result;
use raydose::workflows::evaluate::StructureReport;
use std::path::Path;
use tracing::info;

/// Write the cumulative DVH curves of every structure to one CSV file with
/// columns `structure,dose_gy,volume_fraction`.
pub(crate) fn write_dvh_csv(path: &Path, reports: &[StructureReport]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| {
        crate::error::CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        }
    })?;
    writer
        .write_record(["structure", "dose_gy", "volume_fraction"])
        .map_err(anyhow::Error::from)?;
    for report in reports {
        for bin in report.dvh.curve() {
            writer
                .write_record([
                    report.name.as_str(),
                    &format!("{:.6}", bin.dose_gy),
                    &format!("{:.6}", bin.volume_fraction),
                ])
                .map_err(anyhow::Error::from)?;
        }
    }
    writer.flush()?;
    info!("DVH curves written to {}", path.display());
    Ok(())
}

/// One summary line per structure on stdout.
pub(crate) fn print_structure_summary(reports: &[StructureReport]) {
    for report in reports {
        println!(
            "  {:<16} mean {:>7.3} Gy   min {:>7.3} Gy   max {:>7.3} Gy   D95 {:>7.3} Gy",
            report.name,
            report.dvh.mean_dose(),
            report.dvh.min_dose(),
            report.dvh.max_dose(),
            report.dvh.dose_at_volume(95.0),
        );
    }
}
