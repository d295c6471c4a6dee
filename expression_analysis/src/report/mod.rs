//! Terminal figure outputs: PCA, heatmaps and the GO bar chart
//!
//! Everything here consumes the normalized log abundance matrix and the
//! curated tables; nothing is ever read back in.

pub mod go_bar;
pub mod heatmap;
pub mod palette;
pub mod pca;

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, Axis};
use polars::frame::DataFrame;
use tracing::warn;

use crate::error::Result;
use crate::tables::require_column;

pub use go_bar::plot_go_bars;
pub use heatmap::plot_annotated_heatmap;
pub use pca::plot_pca;

/// Display-name to bundle-row lookup, from the annotation table that is
/// aligned to the bundle's gene order. First occurrence wins for
/// duplicated symbols.
pub fn gene_name_index(annotation: &DataFrame) -> Result<HashMap<String, usize>> {
    let names = require_column(annotation, "gene annotation", "gene_name")?.str()?;
    let mut index = HashMap::new();
    for (row, name) in names.into_iter().enumerate() {
        if let Some(name) = name {
            index.entry(name.to_string()).or_insert(row);
        }
    }
    Ok(index)
}

/// Rows selected for one heatmap, in curated-list order.
pub struct HeatmapRows {
    pub rows: Vec<usize>,
    pub labels: Vec<String>,
    pub annotations: Vec<String>,
}

/// Resolve curated (gene, annotation-label) pairs against the bundle;
/// genes absent after filtering are skipped with a warning.
pub fn select_rows(
    curated: &[(String, String)],
    index: &HashMap<String, usize>,
    figure: &str,
) -> HeatmapRows {
    let mut selected = HeatmapRows {
        rows: Vec::new(),
        labels: Vec::new(),
        annotations: Vec::new(),
    };
    let mut missing = 0usize;
    for (gene, annotation) in curated {
        match index.get(gene) {
            Some(&row) => {
                selected.rows.push(row);
                selected.labels.push(gene.clone());
                selected.annotations.push(annotation.clone());
            }
            None => missing += 1,
        }
    }
    if missing > 0 {
        warn!("{figure}: {missing} curated genes not present after filtering");
    }
    selected
}

/// Matrix restricted to the selected rows, display order.
pub fn extract_rows(matrix: ArrayView2<f64>, rows: &[usize]) -> Array2<f64> {
    matrix.select(Axis(0), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn name_index_resolves_first_occurrence() {
        let annotation = DataFrame::new(vec![Column::from(Series::new(
            PlSmallStr::from("gene_name"),
            vec![Some("Mbp"), None, Some("Plp1"), Some("Mbp")],
        ))])
        .unwrap();
        let index = gene_name_index(&annotation).unwrap();
        assert_eq!(index.get("Mbp"), Some(&0));
        assert_eq!(index.get("Plp1"), Some(&2));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn select_rows_skips_missing_genes() {
        let mut index = HashMap::new();
        index.insert("Mbp".to_string(), 4);
        let curated = vec![
            ("Mbp".to_string(), "mature".to_string()),
            ("Ghost".to_string(), "none".to_string()),
        ];
        let rows = select_rows(&curated, &index, "markers");
        assert_eq!(rows.rows, vec![4]);
        assert_eq!(rows.labels, vec!["Mbp".to_string()]);
    }
}
