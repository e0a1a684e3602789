//! Cross-phase temporal correlator
//!
//! Joins the take-off, climb and cruise evidence streams of each installation:
//!
//! ```text
//! take-off t0 ──► first climb  c  with c > t0 and c − t0 < climb_window
//!             └─► first cruise r  with r > c  and r − t0 < cruise_window
//! merge_sum = ev(t0) + ev(c) + ev(r)     (only for a complete triple)
//! fired     = merge_sum ≥ combined_threshold
//! ```
//!
//! This is the single synchronization point across phases: it runs after all
//! three phase tables are final.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use tracing::info;

use crate::config::CorrelationConfig;
use crate::types::{
    CorrelationReport, Installation, InstallationSummary, MergedEvent, PhaseMatch, PhaseTable,
};

pub struct CrossPhaseCorrelator;

impl CrossPhaseCorrelator {
    pub fn correlate(
        takeoff: &PhaseTable,
        climb: &PhaseTable,
        cruise: &PhaseTable,
        config: &CorrelationConfig,
    ) -> CorrelationReport {
        let climb_window = Duration::minutes(config.climb_window_minutes);
        let cruise_window = Duration::minutes(config.cruise_window_minutes);
        let climbs = Self::matches_by_installation(climb);
        let cruises = Self::matches_by_installation(cruise);
        let empty: Vec<PhaseMatch> = Vec::new();

        let mut report = CorrelationReport::default();
        for (installation, takeoffs) in Self::matches_by_installation(takeoff) {
            let inst_climbs = climbs.get(&installation).unwrap_or(&empty);
            let inst_cruises = cruises.get(&installation).unwrap_or(&empty);

            let mut summary = InstallationSummary {
                installation: installation.clone(),
                fired: false,
                fire_count: 0,
                first_fire: None,
                last_fire: None,
            };

            for t in takeoffs {
                let climb_match = Self::first_after(inst_climbs, t.timestamp)
                    .filter(|c| c.timestamp - t.timestamp < climb_window);
                let cruise_match = climb_match.and_then(|c| {
                    Self::first_after(inst_cruises, c.timestamp)
                        .filter(|r| r.timestamp - t.timestamp < cruise_window)
                });

                let merge_sum = match (climb_match, cruise_match) {
                    (Some(c), Some(r)) => t
                        .evidence_count
                        .zip(c.evidence_count)
                        .zip(r.evidence_count)
                        .map(|((a, b), r)| a + b + r),
                    _ => None,
                };
                let fired = merge_sum.is_some_and(|s| s >= config.combined_threshold);

                if fired {
                    summary.fired = true;
                    summary.fire_count += 1;
                    summary.first_fire.get_or_insert(t.timestamp);
                    summary.last_fire = Some(t.timestamp);
                }

                report.events.push(MergedEvent {
                    installation: installation.clone(),
                    takeoff: t,
                    climb: climb_match,
                    cruise: cruise_match,
                    merge_sum,
                    fired,
                });
            }
            report.summaries.push(summary);
        }

        info!(
            events = report.events.len(),
            installations = report.summaries.len(),
            fired = report.fired_installations().count(),
            "Cross-phase correlation complete"
        );
        report
    }

    /// Time-ordered observations per installation.
    fn matches_by_installation(table: &PhaseTable) -> BTreeMap<Installation, Vec<PhaseMatch>> {
        let mut out: BTreeMap<Installation, Vec<PhaseMatch>> = BTreeMap::new();
        for row in table.rows() {
            out.entry(row.installation.clone()).or_default().push(PhaseMatch {
                timestamp: row.timestamp,
                evidence_count: row.evidence_count,
            });
        }
        out
    }

    /// Earliest observation strictly after `after`. `series` must be time-ordered.
    fn first_after(series: &[PhaseMatch], after: NaiveDateTime) -> Option<PhaseMatch> {
        let i = series.partition_point(|m| m.timestamp <= after);
        series.get(i).copied()
    }
}
