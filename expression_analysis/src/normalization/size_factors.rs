//! Library-size normalization via the median-of-ratios method

use ndarray::{Array1, Array2, ArrayView2, Axis};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::stats::median_in_place;

/// Per-sample size factors: each sample's median ratio to the per-gene
/// geometric-mean reference, computed over genes with all-positive
/// counts. Accounts for sequencing depth and composition together.
pub fn estimate_size_factors(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(AnalysisError::NormalizationFailed {
            reason: "count matrix is empty".to_string(),
        });
    }

    let mut geo_means = Vec::new();
    let mut reference_genes = Vec::new();
    for (i, row) in counts.axis_iter(Axis(0)).enumerate() {
        if row.iter().all(|&x| x > 0.0) {
            let log_sum: f64 = row.iter().map(|&x| x.ln()).sum();
            geo_means.push((log_sum / n_samples as f64).exp());
            reference_genes.push(i);
        }
    }
    if reference_genes.is_empty() {
        return Err(AnalysisError::NormalizationFailed {
            reason: "no genes with all non-zero counts for the reference".to_string(),
        });
    }
    debug!("Size-factor reference uses {} genes", reference_genes.len());

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let mut ratios: Vec<f64> = reference_genes
            .iter()
            .zip(geo_means.iter())
            .map(|(&i, &gm)| counts[[i, j]] / gm)
            .collect();
        size_factors[j] = median_in_place(&mut ratios);
    }

    if size_factors.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
        return Err(AnalysisError::NormalizationFailed {
            reason: "invalid size factors computed".to_string(),
        });
    }
    Ok(size_factors)
}

/// Divide every sample column by its size factor.
pub fn normalize_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (j, &sf) in size_factors.iter().enumerate() {
        normalized.column_mut(j).mapv_inplace(|x| x / sf);
    }
    normalized
}
