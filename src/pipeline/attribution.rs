//! Signature Attribution Solver
//!
//! Decomposes each lagged shift vector onto the phase's signature library by
//! constrained least squares over small signature subsets.
//!
//! ## Search
//!
//! ```text
//! for k in 1..=3:
//!     for combination in C(K, k), lexicographic index order:
//!         coeffs   = argmin ‖A·c − observed‖     (A = 9×k directions, SVD solve)
//!         rel_err  = ‖observed − A·coeffs‖ / ‖observed‖
//!         accept   if rel_err < max_relative_error
//!                  and Σ|coeff × norm| < magnitude_multiplier × ‖observed‖
//!         keep     if rel_err < best rel_err so far
//! ```
//!
//! The enumeration order is the tie-break: among exactly equal errors the
//! earliest combination wins, so fewer signatures are preferred over more.
//! A combination whose solve fails is logged and skipped; the remaining
//! combinations are still tried.
//!
//! ## Parallelism
//!
//! Every (row, lag) fit is independent. Jobs run on the pipeline's rayon pool;
//! each worker holds an `Arc<FitContext>` built once per phase and returns a
//! result keyed by row index, merged afterwards in key order.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::config::AttributionConfig;
use crate::types::{
    Attribution, AttributionSlot, FlightPhase, ParamArray, PhaseTable, SignatureLibrary, Vector9,
    MAX_SLOTS, N_PARAMS,
};

use super::stage::{RowPatch, SkipReason, Stage, StageContext};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("least-squares solve failed for combination {combination:?}: {message}")]
    Solve {
        combination: Vec<usize>,
        message: &'static str,
    },

    #[error("non-finite coefficients for combination {0:?}")]
    NonFinite(Vec<usize>),
}

// ============================================================================
// Fit Context
// ============================================================================

/// Immutable inputs shared by every fit of one phase.
#[derive(Debug)]
pub struct FitContext {
    identifiers: Vec<String>,
    directions: Vec<Vector9>,
    norms: Vec<f64>,
    combinations: Vec<Vec<usize>>,
    max_relative_error: f64,
    magnitude_multiplier: f64,
}

/// Outcome of fitting one shift vector.
#[derive(Debug, Clone, PartialEq)]
pub struct LagFit {
    /// ‖observed‖, `None` when the shift itself is undefined
    pub observed_magnitude: Option<f64>,
    /// Winning combination, `None` when nothing was accepted
    pub attribution: Option<Attribution>,
}

impl LagFit {
    pub fn undefined() -> Self {
        Self {
            observed_magnitude: None,
            attribution: None,
        }
    }
}

impl FitContext {
    pub fn new(library: &SignatureLibrary, config: &AttributionConfig) -> Self {
        let sigs = library.signatures();
        Self {
            identifiers: sigs.iter().map(|s| s.identifier.clone()).collect(),
            directions: sigs.iter().map(|s| Vector9::from_column_slice(&s.direction)).collect(),
            norms: sigs.iter().map(|s| s.norm).collect(),
            combinations: enumerate_combinations(sigs.len(), MAX_SLOTS),
            max_relative_error: config.max_relative_error,
            magnitude_multiplier: config.magnitude_multiplier,
        }
    }

    pub fn combinations(&self) -> &[Vec<usize>] {
        &self.combinations
    }

    /// Fit one shift vector. `None` input yields an undefined result.
    pub fn fit(&self, shift: Option<&ParamArray>) -> LagFit {
        let Some(shift) = shift else {
            return LagFit::undefined();
        };
        let observed = DVector::from_column_slice(shift);
        let observed_norm = observed.norm();
        if observed_norm == 0.0 {
            return LagFit {
                observed_magnitude: Some(0.0),
                attribution: None,
            };
        }

        let mut best: Option<Attribution> = None;
        for combination in &self.combinations {
            let (coeffs, residual) = match self.solve(combination, &observed) {
                Ok(solved) => solved,
                Err(e) => {
                    warn!(error = %e, "Skipping signature combination");
                    continue;
                }
            };
            let relative_error = residual / observed_norm;
            if relative_error >= self.max_relative_error {
                continue;
            }

            let slots: Vec<AttributionSlot> = combination
                .iter()
                .zip(coeffs.iter())
                .map(|(&j, &c)| AttributionSlot {
                    identifier: self.identifiers[j].clone(),
                    coefficient: c,
                    magnitude: (c * self.norms[j]).abs(),
                })
                .collect();
            let total: f64 = slots.iter().map(|s| s.magnitude).sum();
            if total >= self.magnitude_multiplier * observed_norm {
                continue;
            }

            let improves = best
                .as_ref()
                .map_or(true, |b| relative_error < b.relative_error);
            if improves {
                best = Some(Attribution {
                    slots,
                    relative_error,
                    residual_magnitude: residual,
                });
            }
        }

        LagFit {
            observed_magnitude: Some(observed_norm),
            attribution: best,
        }
    }

    /// Minimum-norm least-squares coefficients and the residual norm.
    fn solve(&self, combination: &[usize], observed: &DVector<f64>) -> Result<(DVector<f64>, f64), FitError> {
        let design = DMatrix::from_fn(N_PARAMS, combination.len(), |r, c| {
            self.directions[combination[c]][r]
        });
        let svd = design.clone().svd(true, true);
        let eps = svd.singular_values.max() * N_PARAMS as f64 * f64::EPSILON;
        let coeffs = svd.solve(observed, eps).map_err(|message| FitError::Solve {
            combination: combination.to_vec(),
            message,
        })?;
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(FitError::NonFinite(combination.to_vec()));
        }
        let residual = (observed - &design * &coeffs).norm();
        Ok((coeffs, residual))
    }
}

/// All index combinations of size 1..=max_k over `n` items, in increasing size
/// then lexicographic order.
pub fn enumerate_combinations(n: usize, max_k: usize) -> Vec<Vec<usize>> {
    fn extend(start: usize, n: usize, k: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            extend(i + 1, n, k, current, out);
            current.pop();
        }
    }

    let mut out = Vec::new();
    for k in 1..=max_k.min(n) {
        extend(0, n, k, &mut Vec::with_capacity(k), &mut out);
    }
    out
}

// ============================================================================
// Stage
// ============================================================================

pub struct AttributionSolver;

struct FitJob {
    row: usize,
    lag: usize,
    shift: Option<ParamArray>,
}

impl Stage for AttributionSolver {
    const NAME: &'static str = "attribution";
    type Patch = BTreeMap<usize, LagFit>;

    fn compute(
        &self,
        table: &PhaseTable,
        phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<Self::Patch>, SkipReason> {
        let library = ctx.libraries.get(phase)?;
        let fit_ctx = Arc::new(FitContext::new(library, &ctx.config.attribution));
        let depths = &ctx.config.lags.depths;

        let jobs: Vec<FitJob> = table
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_new())
            .flat_map(|(row, r)| {
                depths.iter().map(move |&lag| FitJob {
                    row,
                    lag,
                    shift: r.lag(lag).and_then(|c| c.shift),
                })
            })
            .collect();

        let results: Vec<(usize, usize, LagFit)> = ctx.pool.install(|| {
            jobs.par_iter()
                .map_with(Arc::clone(&fit_ctx), |fc, job| (job.row, job.lag, fc.fit(job.shift.as_ref())))
                .collect()
        });

        let mut by_row: BTreeMap<usize, BTreeMap<usize, LagFit>> = BTreeMap::new();
        for (row, lag, fit) in results {
            by_row.entry(row).or_default().insert(lag, fit);
        }

        Ok(by_row.into_iter().collect())
    }

    fn apply(&self, table: &mut PhaseTable, row: usize, patch: Self::Patch) {
        let record = &mut table.rows_mut()[row];
        for (lag, fit) in patch {
            let columns = record.lag_mut(lag);
            columns.observed_magnitude = fit.observed_magnitude;
            columns.attribution = fit.attribution;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::test_support::{daily_series, with_config, with_pool_size};
    use crate::types::{Signature, SignatureLibraries};

    fn basis(i: usize) -> ParamArray {
        let mut d = [0.0; N_PARAMS];
        d[i] = 1.0;
        d
    }

    fn library(directions: &[(&str, ParamArray)]) -> SignatureLibrary {
        SignatureLibrary::new(
            directions
                .iter()
                .map(|(id, d)| Signature::from_direction(*id, *d))
                .collect(),
        )
        .unwrap()
    }

    /// Four skewed, non-orthogonal signatures.
    fn skewed_library() -> SignatureLibrary {
        library(&[
            ("IPC ETA", [0.5, -0.3, 0.2, 0.6, 0.1, 0.0, 0.2, -0.1, 0.4]),
            ("HPC ETA", [0.1, 0.4, -0.5, 0.2, 0.6, 0.1, 0.0, 0.3, -0.2]),
            ("HPT ETA", [-0.2, 0.1, 0.3, -0.4, 0.2, 0.7, -0.3, 0.1, 0.2]),
            ("LPT ETA", [0.3, 0.3, 0.3, 0.1, -0.2, -0.1, 0.6, 0.4, 0.1]),
        ])
    }

    #[test]
    fn test_combinations_order() {
        let combos = enumerate_combinations(4, 3);
        assert_eq!(combos.len(), 4 + 6 + 4);
        assert_eq!(combos[0], vec![0]);
        assert_eq!(combos[3], vec![3]);
        assert_eq!(combos[4], vec![0, 1]);
        assert_eq!(combos[9], vec![2, 3]);
        assert_eq!(combos[10], vec![0, 1, 2]);
        assert_eq!(combos[13], vec![1, 2, 3]);
        assert_eq!(enumerate_combinations(2, 3).len(), 3);
    }

    #[test]
    fn test_exact_single_signature_multiple() {
        let lib = skewed_library();
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let c = -1.75;
        let target = lib.signatures()[2].direction.map(|v| v * c);

        let fit = ctx.fit(Some(&target));
        let attribution = fit.attribution.expect("exact multiple must be attributed");
        assert_eq!(attribution.slots.len(), 1);
        assert_eq!(attribution.slots[0].identifier, "HPT ETA");
        assert!((attribution.slots[0].coefficient - c).abs() < 1e-9);
        assert!(attribution.relative_error < 1e-9);
        let expected_norm = Vector9::from_column_slice(&target).norm();
        assert!((fit.observed_magnitude.unwrap() - expected_norm).abs() < 1e-12);
    }

    #[test]
    fn test_two_signature_mix_uses_both() {
        let lib = skewed_library();
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let a = lib.signatures()[0].direction;
        let b = lib.signatures()[3].direction;
        let mut target = [0.0; N_PARAMS];
        for i in 0..N_PARAMS {
            target[i] = 1.2 * a[i] + 0.8 * b[i];
        }
        let attribution = ctx.fit(Some(&target)).attribution.unwrap();
        let ids: Vec<_> = attribution.slots.iter().map(|s| s.identifier.as_str()).collect();
        assert_eq!(ids, vec!["IPC ETA", "LPT ETA"]);
        assert!((attribution.slots[0].coefficient - 1.2).abs() < 1e-9);
        assert!((attribution.slots[1].coefficient - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_shift_is_not_attributed() {
        let lib = library(&[("IPC ETA", basis(0))]);
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let fit = ctx.fit(Some(&basis(1)));
        assert!(fit.attribution.is_none());
        assert_eq!(fit.observed_magnitude, Some(1.0));
    }

    #[test]
    fn test_magnitude_cap_rejects_cancelling_pair() {
        // e1 = 100·(e0 + 0.01·e1) − 100·e0 fits exactly but with huge contributions
        let mut near = basis(0);
        near[1] = 0.01;
        let lib = library(&[("A", basis(0)), ("B", near)]);
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let fit = ctx.fit(Some(&basis(1)));
        assert!(fit.attribution.is_none());
    }

    #[test]
    fn test_zero_and_undefined_shift() {
        let lib = skewed_library();
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let zero = ctx.fit(Some(&[0.0; N_PARAMS]));
        assert_eq!(zero.observed_magnitude, Some(0.0));
        assert!(zero.attribution.is_none());
        assert_eq!(ctx.fit(None), LagFit::undefined());
    }

    #[test]
    fn test_duplicate_direction_prefers_first() {
        let lib = library(&[("FIRST", basis(4)), ("SECOND", basis(4))]);
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let target = basis(4).map(|v| v * 3.0);
        let attribution = ctx.fit(Some(&target)).attribution.unwrap();
        assert_eq!(attribution.slots.len(), 1);
        assert_eq!(attribution.slots[0].identifier, "FIRST");
    }

    #[test]
    fn test_strictly_smaller_error_replaces_earlier_fit() {
        // B leans off A by half the observed off-axis component, so it fits
        // strictly better than A even though both errors are below 1e-12
        let mut lean = basis(0);
        lean[1] = 0.5e-12;
        let lib = library(&[("A", basis(0)), ("B", lean)]);
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let mut target = basis(0);
        target[1] = 1e-12;

        let attribution = ctx.fit(Some(&target)).attribution.unwrap();
        let ids: Vec<_> = attribution.slots.iter().map(|s| s.identifier.as_str()).collect();
        assert_ne!(ids, vec!["A"], "A alone leaves a 1e-12 error");
        assert!(attribution.relative_error < 0.75e-12, "{}", attribution.relative_error);
    }

    #[test]
    fn test_failed_combination_does_not_discard_fit() {
        // TINY needs a coefficient beyond f64::MAX, so its solve fails
        let tiny = basis(0).map(|v| v * 1e-160);
        let lib = library(&[("TINY", tiny), ("UNIT", basis(0))]);
        let ctx = FitContext::new(&lib, &AttributionConfig::default());
        let target = basis(0).map(|v| v * 1e150);
        assert!(ctx.solve(&[0], &DVector::from_column_slice(&target)).is_err());

        let fit = ctx.fit(Some(&target));
        let attribution = fit.attribution.expect("UNIT still fits");
        assert_eq!(attribution.slots.len(), 1);
        assert_eq!(attribution.slots[0].identifier, "UNIT");
        assert!((attribution.slots[0].coefficient - 1e150).abs() < 1e138);
    }

    fn shifted_table(n: usize) -> PhaseTable {
        let lib = skewed_library();
        let mut rows = daily_series("E1", &vec![0.0; n]);
        for (i, row) in rows.iter_mut().enumerate() {
            let sig = &lib.signatures()[i % lib.len()];
            let scale = 0.25 + (i % 7) as f64 * 0.1;
            let mut shift = sig.direction.map(|v| v * scale);
            shift[i % N_PARAMS] += 0.01 * (i % 3) as f64;
            row.lag_mut(50).shift = Some(shift);
            row.lag_mut(100).shift = if i % 5 == 0 { None } else { Some(shift.map(|v| -v)) };
        }
        PhaseTable::new(FlightPhase::Cruise, rows)
    }

    fn solve_with_threads(threads: usize) -> PhaseTable {
        let mut config = PipelineConfig::default();
        config.lags.depths = vec![50, 100];
        let mut libs = SignatureLibraries::new();
        libs.insert(FlightPhase::Cruise, skewed_library());
        with_pool_size(&config, &libs, threads, |ctx| {
            AttributionSolver.run(shifted_table(60), FlightPhase::Cruise, ctx).into_table()
        })
    }

    #[test]
    fn test_results_independent_of_pool_size() {
        let single = solve_with_threads(1);
        let many = solve_with_threads(4);
        assert_eq!(single, many);
        assert!(single.rows().iter().any(|r| r.lag(50).is_some_and(|l| l.attribution.is_some())));
        assert!(single.rows()[0].lag(100).unwrap().observed_magnitude.is_none());
    }

    #[test]
    fn test_missing_library_skips_stage() {
        let table = shifted_table(3);
        let out = with_config(&PipelineConfig::default(), &SignatureLibraries::new(), |ctx| {
            AttributionSolver.run(table.clone(), FlightPhase::Cruise, ctx)
        });
        assert!(!out.is_completed());
        assert_eq!(out.into_table(), table);
    }
}
