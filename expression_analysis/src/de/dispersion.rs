//! Dispersion estimation shared across genes
//!
//! Three steps, following the standard negative-binomial workflow:
//! gene-wise moment estimates pooled within experimental groups (so a
//! genuine group effect does not masquerade as biological noise), a
//! parametric mean-dispersion trend `alpha(mu) = a1/mu + a0` fit by
//! iterated least squares, and log-space shrinkage of the gene-wise
//! values toward the trend. Genes far above the trend keep their own
//! estimate so genuine outliers are not shrunk into false positives.

use ndarray::{Array1, ArrayView2, Axis};
use tracing::debug;

use crate::data::SampleDesign;
use crate::error::{AnalysisError, Result};

pub const MIN_DISP: f64 = 1e-8;
pub const MAX_DISP: f64 = 10.0;

/// Final per-gene dispersions for the GLM, from size-factor-normalized
/// counts. `n_coefs` is the number of model coefficients, used for the
/// sampling-variance estimate of the gene-wise values.
pub fn estimate_dispersions(
    norm_counts: ArrayView2<f64>,
    design: &SampleDesign,
    n_coefs: usize,
) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = norm_counts.dim();
    if n_samples <= n_coefs {
        return Err(AnalysisError::InvalidDesign {
            reason: format!(
                "{n_samples} samples cannot support {n_coefs} coefficients plus dispersion"
            ),
        });
    }

    let groups = [
        design.group_indices(design.control_label()),
        design.group_indices(design.treated_label()),
    ];
    if groups.iter().any(|g| g.len() < 2) {
        return Err(AnalysisError::InvalidDesign {
            reason: "dispersion estimation needs at least 2 replicates per group".to_string(),
        });
    }

    let means: Vec<f64> = norm_counts
        .axis_iter(Axis(0))
        .map(|row| row.sum() / n_samples as f64)
        .collect();
    let gene_wise: Vec<f64> = (0..n_genes)
        .map(|g| pooled_moment_estimate(norm_counts, g, &groups))
        .collect();

    let (a0, a1) = fit_parametric_trend(&means, &gene_wise)?;
    debug!("Dispersion trend: alpha(mu) = {a1:.4}/mu + {a0:.4}");

    // Sampling variance of a log dispersion estimate, via the trigamma
    // approximation on (n - p) residual degrees of freedom
    let df = (n_samples - n_coefs) as f64;
    let sampling_var = trigamma(df / 2.0).max(1e-4);

    // Prior width from the spread of log residuals around the trend
    let log_residuals: Vec<f64> = means
        .iter()
        .zip(gene_wise.iter())
        .filter(|(&m, &a)| m > 0.0 && a > MIN_DISP * 10.0)
        .map(|(&m, &a)| (a.ln() - trend_at(a0, a1, m).ln()))
        .collect();
    let prior_var = (variance(&log_residuals) - sampling_var).max(0.25);

    let outlier_sd = 2.0 * (prior_var + sampling_var).sqrt();
    let mut n_outliers = 0usize;

    let shrunk: Vec<f64> = means
        .iter()
        .zip(gene_wise.iter())
        .map(|(&m, &alpha)| {
            if m <= 0.0 {
                return trend_at(a0, a1, 1.0).clamp(MIN_DISP, MAX_DISP);
            }
            let log_gene = alpha.ln();
            let log_trend = trend_at(a0, a1, m).ln();
            if log_gene - log_trend > outlier_sd {
                // Dispersion outlier: trust the gene-wise estimate
                n_outliers += 1;
                return alpha;
            }
            // Posterior mode of a normal prior around the trend
            let map = (log_gene / sampling_var + log_trend / prior_var)
                / (1.0 / sampling_var + 1.0 / prior_var);
            map.exp().clamp(MIN_DISP, MAX_DISP)
        })
        .collect();

    if n_outliers > 0 {
        debug!("{n_outliers} of {n_genes} genes kept as dispersion outliers");
    }
    Ok(Array1::from_vec(shrunk))
}

/// Moment estimator of the NB dispersion for one gene, pooled over the
/// within-group moments so the group effect itself contributes nothing.
fn pooled_moment_estimate(norm_counts: ArrayView2<f64>, gene: usize, groups: &[Vec<usize>]) -> f64 {
    let mut weighted = 0.0;
    let mut total_df = 0.0;
    for members in groups {
        let n = members.len() as f64;
        let mean: f64 = members.iter().map(|&j| norm_counts[[gene, j]]).sum::<f64>() / n;
        if mean <= 0.0 {
            continue;
        }
        let var: f64 = members
            .iter()
            .map(|&j| (norm_counts[[gene, j]] - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let alpha = ((var - mean) / (mean * mean)).clamp(MIN_DISP, MAX_DISP);
        weighted += (n - 1.0) * alpha;
        total_df += n - 1.0;
    }
    if total_df > 0.0 {
        (weighted / total_df).clamp(MIN_DISP, MAX_DISP)
    } else {
        MIN_DISP
    }
}

fn trend_at(a0: f64, a1: f64, mu: f64) -> f64 {
    (a0 + a1 / mu).clamp(MIN_DISP, MAX_DISP)
}

/// Fit `alpha = a0 + a1/mu` by least squares, iteratively discarding
/// genes far off the current fit. Falls back to a flat trend at the
/// median gene-wise dispersion when the fit degenerates.
fn fit_parametric_trend(means: &[f64], gene_wise: &[f64]) -> Result<(f64, f64)> {
    let mut usable: Vec<(f64, f64)> = means
        .iter()
        .zip(gene_wise.iter())
        .filter(|(&m, &a)| m > 0.5 && a > MIN_DISP * 10.0)
        .map(|(&m, &a)| (m, a))
        .collect();

    if usable.len() < 10 {
        let mut all: Vec<f64> = gene_wise.to_vec();
        let fallback = crate::stats::median_in_place(&mut all).max(MIN_DISP);
        return Ok((fallback, 0.0));
    }

    let mut a0 = 0.01;
    let mut a1 = 1.0;
    for _ in 0..10 {
        // OLS of alpha on 1/mu
        let n = usable.len() as f64;
        let sx: f64 = usable.iter().map(|(m, _)| 1.0 / m).sum();
        let sy: f64 = usable.iter().map(|(_, a)| *a).sum();
        let sxx: f64 = usable.iter().map(|(m, _)| (1.0 / m) * (1.0 / m)).sum();
        let sxy: f64 = usable.iter().map(|(m, a)| a / m).sum();

        let denom = n * sxx - sx * sx;
        if denom.abs() < 1e-12 {
            break;
        }
        let new_a1 = ((n * sxy - sx * sy) / denom).max(0.0);
        let new_a0 = ((sy - new_a1 * sx) / n).max(MIN_DISP);

        let delta = (new_a0 - a0).abs() + (new_a1 - a1).abs();
        a0 = new_a0;
        a1 = new_a1;
        if delta < 1e-8 {
            break;
        }

        // Trim genes far off the fit before the next pass
        let before = usable.len();
        usable.retain(|&(m, alpha)| {
            let ratio = alpha / trend_at(a0, a1, m);
            (1e-4..=15.0).contains(&ratio)
        });
        if usable.len() == before || usable.len() < 10 {
            break;
        }
    }
    Ok((a0, a1))
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0)
}

/// Asymptotic trigamma, accurate enough for the half-integer degrees of
/// freedom seen here.
fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut value = 0.0;
    // Recurrence to push the argument above 6 before the expansion
    while x < 6.0 {
        value += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    value + inv * (1.0 + inv / 2.0 + inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 / 42.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use ndarray::Array2;

    fn six_vs_six() -> SampleDesign {
        let ids: Vec<String> = (1..=6)
            .map(|i| format!("ctrl_{i}"))
            .chain((1..=6).map(|i| format!("remy_{i}")))
            .collect();
        SampleDesign::from_sample_ids(&ids, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn dispersions_are_positive_and_bounded() {
        let design = six_vs_six();
        let mut counts = Array2::zeros((30, 12));
        for g in 0..30 {
            for j in 0..12 {
                let base = 20.0 + g as f64 * 10.0;
                counts[[g, j]] = base + ((g * 7 + j * 3) % 11) as f64;
            }
        }
        let disp = estimate_dispersions(counts.view(), &design, 2).unwrap();
        assert_eq!(disp.len(), 30);
        assert!(disp.iter().all(|&a| (MIN_DISP..=MAX_DISP).contains(&a)));
    }

    #[test]
    fn group_shift_does_not_inflate_dispersion() {
        let design = six_vs_six();
        let mut counts = Array2::zeros((20, 12));
        for g in 0..20 {
            for j in 0..12 {
                let base = 100.0 + g as f64;
                // Gene 0 is strongly induced; replicates stay tight
                let effect = if g == 0 && j >= 6 { 8.0 } else { 1.0 };
                counts[[g, j]] = base * effect + (j % 3) as f64;
            }
        }
        let disp = estimate_dispersions(counts.view(), &design, 2).unwrap();
        // The induced gene must not look noisier than its flat peers
        assert!(
            disp[0] < 0.01,
            "group effect leaked into dispersion: {}",
            disp[0]
        );
    }

    #[test]
    fn noisy_gene_gets_larger_dispersion_than_flat_gene() {
        let design = six_vs_six();
        let mut counts = Array2::zeros((40, 12));
        for g in 0..40 {
            for j in 0..12 {
                counts[[g, j]] = 100.0 + ((g + j) % 3) as f64;
            }
        }
        // One wildly overdispersed gene, noisy within both groups
        for j in 0..12 {
            counts[[0, j]] = if j % 2 == 0 { 20.0 } else { 400.0 };
        }
        let disp = estimate_dispersions(counts.view(), &design, 2).unwrap();
        assert!(disp[0] > disp[5] * 5.0, "outlier {} vs flat {}", disp[0], disp[5]);
    }

    #[test]
    fn too_few_samples_is_an_error() {
        let ids = vec!["ctrl_1".to_string(), "ctrl_2".to_string(), "remy_1".to_string(), "remy_2".to_string()];
        let design = SampleDesign::from_sample_ids(&ids, &AnalysisConfig::default()).unwrap();
        let counts = Array2::from_elem((5, 4), 10.0);
        assert!(estimate_dispersions(counts.view(), &design, 4).is_err());
    }

    #[test]
    fn single_replicate_group_is_rejected() {
        let ids = vec!["ctrl_1".to_string(), "remy_1".to_string(), "remy_2".to_string()];
        let design = SampleDesign::from_sample_ids(&ids, &AnalysisConfig::default()).unwrap();
        let counts = Array2::from_elem((5, 3), 10.0);
        assert!(estimate_dispersions(counts.view(), &design, 1).is_err());
    }

    #[test]
    fn trigamma_matches_known_values() {
        // trigamma(1) = pi^2/6
        assert!((trigamma(1.0) - std::f64::consts::PI.powi(2) / 6.0).abs() < 1e-8);
        // trigamma(5) = pi^2/6 - sum_{k=1..4} 1/k^2
        let expected = std::f64::consts::PI.powi(2) / 6.0
            - (1.0 + 1.0 / 4.0 + 1.0 / 9.0 + 1.0 / 16.0);
        assert!((trigamma(5.0) - expected).abs() < 1e-8);
    }
}
