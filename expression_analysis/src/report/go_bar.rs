//! GO-term enrichment bar chart

use std::path::Path;

use plotters::prelude::*;
use polars::prelude::*;
use tracing::info;

use super::palette::annotation_color;
use crate::error::{AnalysisError, Result};
use crate::tables::require_column;

const BAR_H: u32 = 24;

/// Horizontal bars of enrichment scores for the rows flagged
/// `include`, grouped and coloured by module. Order is fixed: modules
/// by first appearance in the file, terms by descending score within a
/// module.
pub fn plot_go_bars(path: &Path, go_terms: &DataFrame) -> Result<()> {
    let terms = require_column(go_terms, "GO terms", "term")?.str()?.clone();
    let scores = require_column(go_terms, "GO terms", "score")?
        .cast(&DataType::Float64)?
        .f64()?
        .clone();
    let modules = require_column(go_terms, "GO terms", "module")?.str()?.clone();
    let include = require_column(go_terms, "GO terms", "include")?
        .cast(&DataType::Boolean)?
        .bool()?
        .clone();

    let mut rows: Vec<(String, f64, String)> = Vec::new();
    for i in 0..go_terms.height() {
        if include.get(i) != Some(true) {
            continue;
        }
        if let (Some(t), Some(s), Some(m)) = (terms.get(i), scores.get(i), modules.get(i)) {
            rows.push((t.to_string(), s, m.to_string()));
        }
    }
    if rows.is_empty() {
        return Err(AnalysisError::Render {
            figure: "go_terms".to_string(),
            reason: "no GO terms flagged for inclusion".to_string(),
        });
    }

    let mut module_order: Vec<String> = Vec::new();
    for (_, _, m) in &rows {
        if !module_order.contains(m) {
            module_order.push(m.clone());
        }
    }
    rows.sort_by(|a, b| {
        let ma = module_order.iter().position(|m| *m == a.2).unwrap_or(0);
        let mb = module_order.iter().position(|m| *m == b.2).unwrap_or(0);
        ma.cmp(&mb)
            .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
    });

    let max_score = rows.iter().map(|r| r.1).fold(0.0f64, f64::max).max(1e-9);
    let n = rows.len();

    let err = |e| AnalysisError::Render {
        figure: "go_terms".to_string(),
        reason: format!("{e}"),
    };

    let height = 110 + BAR_H * n as u32;
    let path_str = path.to_string_lossy().to_string();
    let root = BitMapBackend::new(&path_str, (980, height)).into_drawing_area();
    root.fill(&WHITE).map_err(err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("GO-term enrichment", ("sans-serif bold", 24))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(320)
        .build_cartesian_2d(0.0..max_score * 1.08, 0..n as i32)
        .map_err(err)?;

    let term_labels: Vec<String> = rows.iter().map(|r| r.0.clone()).collect();
    chart
        .configure_mesh()
        .disable_y_mesh()
        .x_desc("Enrichment score")
        .axis_desc_style(("sans-serif", 20))
        .label_style(("sans-serif", 14))
        .y_labels(n)
        .y_label_formatter(&|y: &i32| {
            // Bars grow upward from their index; label the owning term
            let idx = n as i32 - 1 - *y;
            term_labels
                .get(idx as usize)
                .cloned()
                .unwrap_or_default()
        })
        .draw()
        .map_err(err)?;

    for (module_idx, module) in module_order.iter().enumerate() {
        let colour = annotation_color(module_idx);
        chart
            .draw_series(rows.iter().enumerate().filter(|(_, r)| r.2 == *module).map(
                |(i, r)| {
                    let y = n as i32 - 1 - i as i32;
                    Rectangle::new([(0.0, y), (r.1, y + 1)], colour.filled())
                },
            ))
            .map_err(err)?
            .label(module.clone())
            .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 14, y + 6)], colour.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 16))
        .position(SeriesLabelPosition::LowerRight)
        .draw()
        .map_err(err)?;

    root.present().map_err(err)?;
    info!("Wrote {} ({} terms)", path.display(), n);
    Ok(())
}
