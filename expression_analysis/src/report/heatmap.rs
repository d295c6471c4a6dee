//! Fixed-order annotated heatmaps
//!
//! Rows keep the curated list's order (no re-clustering), values are
//! row-scaled z-scores clamped to the shared diverging breakpoints, and
//! an annotation strip on the left colours each row by its lineage or
//! module label.

use std::path::Path;

use ndarray::ArrayView2;
use plotters::prelude::*;
use tracing::info;

use super::palette::{annotation_color, diverging_color};
use crate::error::{AnalysisError, Result};

const CELL_H: u32 = 18;
const LEFT: u32 = 130;
const STRIP_W: u32 = 14;
const TOP: u32 = 46;
const BOTTOM: u32 = 70;
const RIGHT: u32 = 190;

/// Draw one heatmap. `matrix` holds the selected genes in display
/// order (rows) by the bundle's samples (columns); `annotations` is the
/// per-row strip label.
pub fn plot_annotated_heatmap(
    path: &Path,
    title: &str,
    matrix: ArrayView2<f64>,
    gene_labels: &[String],
    annotations: &[String],
    sample_ids: &[String],
) -> Result<()> {
    let (n_rows, n_cols) = matrix.dim();
    if n_rows == 0 {
        return Err(AnalysisError::Render {
            figure: title.to_string(),
            reason: "no genes to draw".to_string(),
        });
    }
    if gene_labels.len() != n_rows || annotations.len() != n_rows || sample_ids.len() != n_cols {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{n_rows} labels and {n_cols} samples"),
            got: format!(
                "{} labels, {} annotations, {} samples",
                gene_labels.len(),
                annotations.len(),
                sample_ids.len()
            ),
        });
    }

    let scaled = row_zscores(matrix);

    let cell_w: u32 = 26;
    let width = LEFT + STRIP_W + cell_w * n_cols as u32 + RIGHT;
    let height = TOP + CELL_H * n_rows as u32 + BOTTOM;

    let path_str = path.to_string_lossy().to_string();
    let root = BitMapBackend::new(&path_str, (width, height)).into_drawing_area();
    let err = |e| AnalysisError::Render {
        figure: title.to_string(),
        reason: format!("{e}"),
    };
    root.fill(&WHITE).map_err(err)?;

    let title_font = ("sans-serif", 22).into_font();
    let label_font = ("sans-serif", 13).into_font();
    root.draw(&Text::new(title.to_string(), (LEFT as i32, 14), title_font.clone()))
        .map_err(err)?;

    // Annotation strip colours, by first appearance
    let mut strip_labels: Vec<&str> = Vec::new();
    for a in annotations {
        if !strip_labels.contains(&a.as_str()) {
            strip_labels.push(a);
        }
    }

    for r in 0..n_rows {
        let y0 = (TOP + r as u32 * CELL_H) as i32;
        let y1 = y0 + CELL_H as i32 - 1;

        // Gene label
        root.draw(&Text::new(
            gene_labels[r].clone(),
            (6, y0 + 3),
            label_font.clone(),
        ))
        .map_err(err)?;

        // Strip cell
        let strip_idx = strip_labels
            .iter()
            .position(|&l| l == annotations[r])
            .unwrap_or(0);
        root.draw(&Rectangle::new(
            [
                (LEFT as i32, y0),
                ((LEFT + STRIP_W) as i32 - 2, y1),
            ],
            annotation_color(strip_idx).filled(),
        ))
        .map_err(err)?;

        // Expression cells
        for c in 0..n_cols {
            let x0 = (LEFT + STRIP_W + c as u32 * cell_w) as i32;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + cell_w as i32 - 1, y1)],
                diverging_color(scaled[[r, c]]).filled(),
            ))
            .map_err(err)?;
        }
    }

    // Sample labels under the grid
    let base_y = (TOP + CELL_H * n_rows as u32 + 6) as i32;
    for (c, sample) in sample_ids.iter().enumerate() {
        let x = (LEFT + STRIP_W + c as u32 * cell_w) as i32;
        root.draw(&Text::new(sample.clone(), (x, base_y), label_font.clone()))
            .map_err(err)?;
    }

    // Strip legend on the right
    let legend_x = (width - RIGHT + 16) as i32;
    for (i, label) in strip_labels.iter().enumerate() {
        let y = TOP as i32 + i as i32 * 20;
        root.draw(&Rectangle::new(
            [(legend_x, y), (legend_x + 12, y + 12)],
            annotation_color(i).filled(),
        ))
        .map_err(err)?;
        root.draw(&Text::new(
            label.to_string(),
            (legend_x + 18, y),
            label_font.clone(),
        ))
        .map_err(err)?;
    }

    root.present().map_err(err)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Row-wise z-scores; constant rows become zeros rather than NaN.
fn row_zscores(matrix: ArrayView2<f64>) -> ndarray::Array2<f64> {
    let (n_rows, n_cols) = matrix.dim();
    let mut out = ndarray::Array2::zeros((n_rows, n_cols));
    for r in 0..n_rows {
        let row = matrix.row(r);
        let mean = row.sum() / n_cols as f64;
        let var = row.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>()
            / (n_cols as f64 - 1.0).max(1.0);
        let sd = var.sqrt();
        for c in 0..n_cols {
            out[[r, c]] = if sd > 0.0 { (matrix[[r, c]] - mean) / sd } else { 0.0 };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn zscores_center_and_scale_each_row() {
        let m = array![[1.0, 2.0, 3.0], [5.0, 5.0, 5.0]];
        let z = row_zscores(m.view());
        assert!((z.row(0).sum()).abs() < 1e-12);
        assert!(z[[0, 2]] > 0.0 && z[[0, 0]] < 0.0);
        // Constant row maps to zeros, not NaN
        assert!(z.row(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn renders_a_small_heatmap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hm.png");
        let m = array![[1.0, 5.0], [4.0, 2.0]];
        plot_annotated_heatmap(
            &path,
            "Markers",
            m.view(),
            &["Mbp".to_string(), "Pdgfra".to_string()],
            &["mature".to_string(), "OPC".to_string()],
            &["ctrl_1".to_string(), "remy_1".to_string()],
        )
        .unwrap();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn empty_gene_set_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hm.png");
        let m = ndarray::Array2::<f64>::zeros((0, 2));
        assert!(plot_annotated_heatmap(&path, "x", m.view(), &[], &[], &[
            "a".to_string(),
            "b".to_string()
        ])
        .is_err());
    }
}
