//! Principal-component projection of samples

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use plotters::prelude::*;
use tracing::info;

use super::palette::group_color;
use crate::data::SampleDesign;
use crate::error::{AnalysisError, Result};
use crate::stats::jacobi_eigen;

/// Sample scores on the top two principal components of the
/// gene-centered log abundance matrix, plus % variance explained.
pub fn pca_scores(log_matrix: ArrayView2<f64>) -> Result<(Vec<(f64, f64)>, f64, f64)> {
    let (n_genes, n_samples) = log_matrix.dim();
    if n_samples < 3 || n_genes == 0 {
        return Err(AnalysisError::DimensionMismatch {
            expected: "at least 3 samples and 1 gene".to_string(),
            got: format!("{n_genes} genes x {n_samples} samples"),
        });
    }

    // Center each gene across samples
    let mut centered = log_matrix.to_owned();
    for mut row in centered.rows_mut() {
        let mean = row.sum() / n_samples as f64;
        row.mapv_inplace(|x| x - mean);
    }

    // Dual covariance: samples x samples
    let mut covariance = Array2::zeros((n_samples, n_samples));
    for a in 0..n_samples {
        for b in a..n_samples {
            let dot: f64 = (0..n_genes).map(|g| centered[[g, a]] * centered[[g, b]]).sum();
            covariance[[a, b]] = dot;
            covariance[[b, a]] = dot;
        }
    }

    let (eigenvalues, eigenvectors) = jacobi_eigen(&covariance);
    let total: f64 = eigenvalues.iter().filter(|&&l| l > 0.0).sum();
    if total <= 0.0 {
        return Err(AnalysisError::FactorAnalysisFailed {
            reason: "log abundance matrix has no variance".to_string(),
        });
    }

    let scale1 = eigenvalues[0].max(0.0).sqrt();
    let scale2 = eigenvalues[1].max(0.0).sqrt();
    let scores: Vec<(f64, f64)> = (0..n_samples)
        .map(|j| (eigenvectors[[j, 0]] * scale1, eigenvectors[[j, 1]] * scale2))
        .collect();

    Ok((
        scores,
        100.0 * eigenvalues[0] / total,
        100.0 * eigenvalues[1].max(0.0) / total,
    ))
}

/// Scatter of samples in PC1/PC2, coloured by experimental group.
pub fn plot_pca(path: &Path, log_matrix: ArrayView2<f64>, design: &SampleDesign) -> Result<()> {
    let (scores, pct1, pct2) = pca_scores(log_matrix)?;

    let err = |e| AnalysisError::Render {
        figure: "pca".to_string(),
        reason: format!("{e}"),
    };

    let span = scores
        .iter()
        .flat_map(|&(x, y)| [x.abs(), y.abs()])
        .fold(1e-9f64, f64::max)
        * 1.15;

    let path_str = path.to_string_lossy().to_string();
    let root = BitMapBackend::new(&path_str, (760, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("PCA of log2 abundances", ("sans-serif bold", 24))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-span..span, -span..span)
        .map_err(err)?;

    chart
        .configure_mesh()
        .x_desc(format!("PC1 ({pct1:.1}% variance)"))
        .y_desc(format!("PC2 ({pct2:.1}% variance)"))
        .axis_desc_style(("sans-serif", 20))
        .label_style(("sans-serif", 15))
        .draw()
        .map_err(err)?;

    for level in [design.control_label(), design.treated_label()] {
        let is_control = level == design.control_label();
        let colour = group_color(is_control);
        let members = design.group_indices(level);
        chart
            .draw_series(
                members
                    .iter()
                    .map(|&j| Circle::new(scores[j], 6, colour.filled())),
            )
            .map_err(err)?
            .label(level.to_string())
            .legend(move |(x, y)| Circle::new((x + 10, y), 6, colour.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 16))
        .position(SeriesLabelPosition::UpperRight)
        .draw()
        .map_err(err)?;

    root.present().map_err(err)?;
    info!("Wrote {}", path.display());
    Ok(())
}
