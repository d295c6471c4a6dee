//! Unwanted-variation estimation from replicate differences
//!
//! Batch and other technical variance not explained by the experimental
//! grouping is estimated as latent sample-level factors and handed to
//! the model as regressors, instead of dropping samples or genes.
//! Centering each gene within its group leaves a residual matrix whose
//! structure cannot come from the group factor; the leading
//! eigenvectors of its sample-by-sample covariance are the nuisance
//! covariates.

use ndarray::{Array2, ArrayView2};
use tracing::{debug, info};

use crate::data::SampleDesign;
use crate::error::{AnalysisError, Result};
use crate::stats::jacobi_eigen;

/// Estimate `k` latent covariates (one column per factor, unit norm)
/// from size-factor-normalized counts. Rows follow the design's sample
/// order.
pub fn estimate_unwanted_variation(
    norm_counts: ArrayView2<f64>,
    design: &SampleDesign,
    k: usize,
) -> Result<Array2<f64>> {
    let (n_genes, n_samples) = norm_counts.dim();
    if n_samples != design.n_samples() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} sample columns", design.n_samples()),
            got: format!("{n_samples}"),
        });
    }
    let n_groups = 2;
    if k == 0 || k > n_samples.saturating_sub(n_groups) {
        return Err(AnalysisError::FactorAnalysisFailed {
            reason: format!("k = {k} is outside 1..={}", n_samples - n_groups),
        });
    }

    // Samples x genes, log scale
    let mut residuals = Array2::zeros((n_samples, n_genes));
    for g in 0..n_genes {
        for j in 0..n_samples {
            residuals[[j, g]] = (norm_counts[[g, j]] + 1.0).log2();
        }
    }

    // Replicate-difference basis: remove each gene's group mean
    for level in [design.control_label(), design.treated_label()] {
        let members = design.group_indices(level);
        let m = members.len() as f64;
        for g in 0..n_genes {
            let mean: f64 = members.iter().map(|&j| residuals[[j, g]]).sum::<f64>() / m;
            for &j in &members {
                residuals[[j, g]] -= mean;
            }
        }
    }

    // Factor-analyze the residual structure via its sample covariance
    let mut covariance = Array2::zeros((n_samples, n_samples));
    for a in 0..n_samples {
        for b in a..n_samples {
            let dot: f64 = (0..n_genes)
                .map(|g| residuals[[a, g]] * residuals[[b, g]])
                .sum();
            covariance[[a, b]] = dot;
            covariance[[b, a]] = dot;
        }
    }

    let (eigenvalues, eigenvectors) = jacobi_eigen(&covariance);
    debug!(
        "Residual spectrum (top 4): {:?}",
        eigenvalues.iter().take(4).collect::<Vec<_>>()
    );
    if eigenvalues[k - 1] <= 1e-10 {
        return Err(AnalysisError::FactorAnalysisFailed {
            reason: format!("residual covariance has rank below k = {k}"),
        });
    }

    let mut w = Array2::zeros((n_samples, k));
    for factor in 0..k {
        // Deterministic sign: largest-magnitude loading is positive
        let column = eigenvectors.column(factor);
        let flip = column
            .iter()
            .cloned()
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(std::cmp::Ordering::Equal))
            .map(|v| if v < 0.0 { -1.0 } else { 1.0 })
            .unwrap_or(1.0);
        for j in 0..n_samples {
            w[[j, factor]] = column[j] * flip;
        }
    }

    info!(
        "Estimated {k} unwanted-variation factor(s); leading factor explains {:.1}% of residual variance",
        100.0 * eigenvalues[0] / eigenvalues.sum().max(f64::MIN_POSITIVE)
    );
    Ok(w)
}
