//! Model matrix for the per-gene negative-binomial GLM

use ndarray::Array2;

use crate::data::SampleDesign;
use crate::error::{AnalysisError, Result};
use crate::stats::jacobi_eigen;

/// Design matrix with intercept, treated-group indicator and the
/// estimated nuisance covariates. The reference (denominator) level is
/// the control group, so the group coefficient is directly the
/// treated-vs-control log fold change.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub x: Array2<f64>,
    pub coef_names: Vec<String>,
    /// Column index of the group-contrast coefficient.
    pub group_coef: usize,
}

pub fn build_design_matrix(design: &SampleDesign) -> Result<DesignMatrix> {
    let n_samples = design.n_samples();
    let covariates = design.covariates();
    let n_coefs = 2 + covariates.len();

    let mut x = Array2::zeros((n_samples, n_coefs));
    for (i, group) in design.groups().iter().enumerate() {
        x[[i, 0]] = 1.0;
        if group == design.treated_label() {
            x[[i, 1]] = 1.0;
        }
        for (c, (_, values)) in covariates.iter().enumerate() {
            x[[i, 2 + c]] = values[i];
        }
    }

    let mut coef_names = vec![
        "Intercept".to_string(),
        format!(
            "group_{}_vs_{}",
            design.treated_label(),
            design.control_label()
        ),
    ];
    coef_names.extend(covariates.iter().map(|(name, _)| name.clone()));

    check_full_rank(&x)?;
    Ok(DesignMatrix {
        x,
        coef_names,
        group_coef: 1,
    })
}

/// The model cannot be fit when columns are linearly dependent; check
/// the spectrum of X'X before any per-gene work starts.
fn check_full_rank(x: &Array2<f64>) -> Result<()> {
    let p = x.ncols();
    let mut xtx = Array2::zeros((p, p));
    for a in 0..p {
        for b in 0..p {
            xtx[[a, b]] = x.column(a).dot(&x.column(b));
        }
    }
    let (eigenvalues, _) = jacobi_eigen(&xtx);
    let tol = eigenvalues[0].abs().max(1.0) * x.nrows() as f64 * f64::EPSILON;
    if eigenvalues.iter().any(|&e| e.abs() <= tol) {
        return Err(AnalysisError::InvalidDesign {
            reason: "model matrix is not full rank; a covariate is confounded \
                     with the group factor or constant"
                .to_string(),
        });
    }
    Ok(())
}
