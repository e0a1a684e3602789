//! CSV report writers
//!
//! Column naming in the per-phase report: lag-dependent columns carry the lag
//! depth as suffix (`SHIFT_TGT_50`, `VAR1_COEFF_100`, `FIRST_STAGE_MAX_200`,
//! `SECOND_STAGE_FRACTION_GT_0.4_400`). Undefined values are blank cells.

use std::path::Path;

use chrono::NaiveDateTime;
use tracing::info;

use super::StorageError;
use crate::config::PipelineConfig;
use crate::types::{
    CorrelationReport, DegradationMode, Installation, LagColumns, PhaseMatch, PhaseTable, Provenance,
    MAX_SLOTS, PARAMETER_NAMES,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ID_HEADER: [&str; 3] = ["engine_id", "aircraft_id", "engine_position"];

fn num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn yes_no(value: bool) -> String {
    let label = if value { "YES" } else { "NO" };
    label.to_string()
}

fn time(value: Option<NaiveDateTime>) -> String {
    value.map(|t| t.format(TIME_FORMAT).to_string()).unwrap_or_default()
}

fn id_cells(installation: &Installation) -> Vec<String> {
    vec![
        installation.engine_id.clone(),
        installation.aircraft_id.clone(),
        installation.engine_position.to_string(),
    ]
}

fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    csv::Writer::from_path(path).map_err(|e| StorageError::csv(path, e))
}

/// Header of the per-phase report for the given configuration.
pub fn phase_report_header(config: &PipelineConfig) -> Vec<String> {
    let mut header: Vec<String> = ID_HEADER.iter().map(|s| (*s).to_string()).collect();
    header.extend(["timestamp", "sister_id", "provenance"].map(String::from));
    header.extend(PARAMETER_NAMES.iter().map(|p| (*p).to_string()));
    header.extend(["DAYS_SINCE_PREV", "SHOP_VISIT", "SISTER_CHANGE"].map(String::from));
    header.extend(PARAMETER_NAMES.iter().map(|p| format!("TREND_{p}")));

    for &lag in &config.lags.depths {
        header.extend(PARAMETER_NAMES.iter().map(|p| format!("SHIFT_{p}_{lag}")));
        header.push(format!("OBSERVED_MAG_{lag}"));
        for k in 1..=MAX_SLOTS {
            header.push(format!("VAR{k}_IDENTIFIER_{lag}"));
            header.push(format!("VAR{k}_COEFF_{lag}"));
            header.push(format!("VAR{k}_MAG_{lag}"));
        }
        header.push(format!("REL_ERR_{lag}"));
        header.push(format!("RESIDUAL_MAG_{lag}"));
        header.push(format!("FIRST_STAGE_DAMAGE_{lag}"));
        header.push(format!("SECOND_STAGE_DAMAGE_{lag}"));
    }
    for &lag in &config.lags.depths {
        for mode in DegradationMode::ALL {
            let prefix = mode.column_prefix();
            header.push(format!("{prefix}_MAX_{lag}"));
            header.push(format!("{prefix}_MEAN_{lag}"));
            for t in &config.exceedance.thresholds {
                header.push(format!("{prefix}_FRACTION_GT_{t}_{lag}"));
            }
        }
    }
    header.push("EVIDENCE_COUNT".to_string());
    header
}

fn lag_cells(columns: Option<&LagColumns>, out: &mut Vec<String>) {
    let shift = columns.and_then(|c| c.shift);
    out.extend((0..PARAMETER_NAMES.len()).map(|i| num(shift.map(|s| s[i]))));
    out.push(num(columns.and_then(|c| c.observed_magnitude)));

    let attribution = columns.and_then(|c| c.attribution.as_ref());
    for k in 0..MAX_SLOTS {
        match attribution.and_then(|a| a.slots.get(k)) {
            Some(slot) => {
                out.push(slot.identifier.clone());
                out.push(slot.coefficient.to_string());
                out.push(slot.magnitude.to_string());
            }
            None => out.extend(std::iter::repeat(String::new()).take(3)),
        }
    }
    out.push(num(attribution.map(|a| a.relative_error)));
    out.push(num(attribution.map(|a| a.residual_magnitude)));
    out.push(num(columns.and_then(|c| c.first_stage_damage)));
    out.push(num(columns.and_then(|c| c.second_stage_damage)));
}

pub fn write_phase_report(path: &Path, table: &PhaseTable, config: &PipelineConfig) -> Result<(), StorageError> {
    let mut writer = create_writer(path)?;
    writer
        .write_record(phase_report_header(config))
        .map_err(|e| StorageError::csv(path, e))?;

    let n_thresholds = config.exceedance.thresholds.len();
    for row in table.rows() {
        let mut cells = id_cells(&row.installation);
        cells.push(time(Some(row.timestamp)));
        cells.push(row.sister_id.clone().unwrap_or_default());
        cells.push(
            match row.provenance {
                Provenance::New => "new",
                Provenance::Historical => "historical",
            }
            .to_string(),
        );
        cells.extend(row.deviation.iter().map(|v| num(*v)));
        match row.flags {
            Some(f) => cells.extend([f.days_since_prev.to_string(), yes_no(f.shop_visit), yes_no(f.sister_change)]),
            None => cells.extend(std::iter::repeat(String::new()).take(3)),
        }
        cells.extend((0..PARAMETER_NAMES.len()).map(|i| num(row.trend.map(|t| t[i]))));

        for &lag in &config.lags.depths {
            lag_cells(row.lag(lag), &mut cells);
        }
        for &lag in &config.lags.depths {
            for mode in DegradationMode::ALL {
                match row.lag(lag).and_then(|c| c.stats(mode)) {
                    Some(stats) => {
                        cells.push(stats.rolling_max.to_string());
                        cells.push(stats.rolling_mean.to_string());
                        cells.extend((0..n_thresholds).map(|i| num(stats.fractions.get(i).copied())));
                    }
                    None => cells.extend(std::iter::repeat(String::new()).take(2 + n_thresholds)),
                }
            }
        }
        cells.push(row.evidence_count.map(|c| c.to_string()).unwrap_or_default());

        writer.write_record(&cells).map_err(|e| StorageError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StorageError::io(path, e))?;
    info!(phase = %table.phase(), rows = table.len(), path = %path.display(), "Phase report written");
    Ok(())
}

fn match_cells(m: Option<&PhaseMatch>) -> [String; 2] {
    [
        time(m.map(|m| m.timestamp)),
        m.and_then(|m| m.evidence_count).map(|c| c.to_string()).unwrap_or_default(),
    ]
}

/// One row per take-off observation with its matched climb and cruise.
pub fn write_merged_report(path: &Path, report: &CorrelationReport) -> Result<(), StorageError> {
    let mut writer = create_writer(path)?;
    let mut header: Vec<&str> = ID_HEADER.to_vec();
    header.extend([
        "TAKEOFF_TIME",
        "TAKEOFF_EVIDENCE",
        "CLIMB_TIME",
        "CLIMB_EVIDENCE",
        "CRUISE_TIME",
        "CRUISE_EVIDENCE",
        "MERGE_SUM",
        "DN_FIRE",
    ]);
    writer.write_record(&header).map_err(|e| StorageError::csv(path, e))?;

    for event in &report.events {
        let mut cells = id_cells(&event.installation);
        cells.extend(match_cells(Some(&event.takeoff)));
        cells.extend(match_cells(event.climb.as_ref()));
        cells.extend(match_cells(event.cruise.as_ref()));
        cells.push(event.merge_sum.map(|s| s.to_string()).unwrap_or_default());
        cells.push(yes_no(event.fired));
        writer.write_record(&cells).map_err(|e| StorageError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StorageError::io(path, e))?;
    info!(events = report.events.len(), path = %path.display(), "Merged report written");
    Ok(())
}

/// One row per installation seen at take-off.
pub fn write_summary_report(path: &Path, report: &CorrelationReport) -> Result<(), StorageError> {
    let mut writer = create_writer(path)?;
    let mut header: Vec<&str> = ID_HEADER.to_vec();
    header.extend(["DN_FIRED", "DN_FIRES", "FIRST_DN_FIRE", "LAST_DN_FIRE"]);
    writer.write_record(&header).map_err(|e| StorageError::csv(path, e))?;

    for summary in &report.summaries {
        let mut cells = id_cells(&summary.installation);
        cells.push(yes_no(summary.fired));
        cells.push(summary.fire_count.to_string());
        cells.push(time(summary.first_fire));
        cells.push(time(summary.last_fire));
        writer.write_record(&cells).map_err(|e| StorageError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StorageError::io(path, e))?;
    info!(installations = report.summaries.len(), path = %path.display(), "Summary report written");
    Ok(())
}
