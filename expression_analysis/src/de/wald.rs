//! Wald test on the fitted group coefficient

use statrs::distribution::{ContinuousCDF, Normal};

use super::glm::GlmResults;

const LN2: f64 = std::f64::consts::LN_2;

#[derive(Debug, Clone)]
pub struct WaldOutcome {
    /// log2 fold change of the contrast (treated vs control).
    pub log2_fold_change: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalue: Vec<f64>,
}

/// Per-gene Wald statistics for the group contrast. Genes with zero
/// base mean or a failed fit come back as NaN across the board and are
/// excluded from multiplicity correction downstream.
pub fn wald_test(fits: &GlmResults, group_coef: usize, base_means: &[f64]) -> WaldOutcome {
    let n_genes = fits.beta.nrows();
    let normal = Normal::new(0.0, 1.0).unwrap();

    let mut log2_fold_change = Vec::with_capacity(n_genes);
    let mut lfc_se = Vec::with_capacity(n_genes);
    let mut stat = Vec::with_capacity(n_genes);
    let mut pvalue = Vec::with_capacity(n_genes);

    for g in 0..n_genes {
        let testable = base_means[g] > 0.0 && fits.converged[g];
        let beta = fits.beta[[g, group_coef]];
        let se = fits.standard_errors[[g, group_coef]];

        if !testable || !se.is_finite() || se <= 0.0 {
            // Keep the (possibly zero) effect estimate but mark the test missing
            log2_fold_change.push(if base_means[g] > 0.0 { beta / LN2 } else { 0.0 });
            lfc_se.push(f64::NAN);
            stat.push(f64::NAN);
            pvalue.push(f64::NAN);
            continue;
        }

        let z = beta / se;
        log2_fold_change.push(beta / LN2);
        lfc_se.push(se / LN2);
        stat.push(z);
        pvalue.push((2.0 * normal.cdf(-z.abs())).min(1.0));
    }

    WaldOutcome {
        log2_fold_change,
        lfc_se,
        stat,
        pvalue,
    }
}
