//! Assembly and filtering of the differential-expression result table

use polars::prelude::*;
use tracing::info;

use super::wald::WaldOutcome;
use crate::data::{AbundanceBundle, SampleDesign};
use crate::error::Result;
use crate::tables::{assert_join_preserved, require_column};

/// One row per tested gene, annotation fields joined by gene id.
pub fn build_results_table(
    gene_ids: &[String],
    base_means: &[f64],
    wald: &WaldOutcome,
    padj: &[f64],
    annotation: &DataFrame,
) -> Result<DataFrame> {
    let stats = DataFrame::new(vec![
        Column::from(Series::new(PlSmallStr::from("gene_id"), gene_ids.to_vec())),
        Column::from(Series::new(PlSmallStr::from("base_mean"), base_means.to_vec())),
        Column::from(Series::new(
            PlSmallStr::from("log2_fold_change"),
            wald.log2_fold_change.clone(),
        )),
        Column::from(Series::new(PlSmallStr::from("lfc_se"), wald.lfc_se.clone())),
        Column::from(Series::new(PlSmallStr::from("stat"), wald.stat.clone())),
        Column::from(Series::new(PlSmallStr::from("pvalue"), wald.pvalue.clone())),
        Column::from(Series::new(PlSmallStr::from("padj"), padj.to_vec())),
    ])?;

    let joined = stats.join(
        annotation,
        ["gene_id"],
        ["gene_id"],
        JoinArgs::new(JoinType::Left),
        None,
    )?;
    assert_join_preserved("differential-expression results", gene_ids.len(), &joined)?;
    Ok(joined)
}

/// Per-gene expressed flag from the *raw* abundance table: the mean of
/// log2(tpm + pseudocount) must exceed the threshold in at least one
/// group. Statistical significance alone is cheap with many replicates
/// even at the detection floor, so this filter is independent of the
/// model output.
pub fn expressed_mask(
    bundle: &AbundanceBundle,
    design: &SampleDesign,
    pseudocount: f64,
    log2_abundance_min: f64,
) -> Vec<bool> {
    let log_tpm = bundle.log2_tpm(pseudocount);
    let control = design.group_indices(design.control_label());
    let treated = design.group_indices(design.treated_label());

    (0..bundle.n_genes())
        .map(|g| {
            let mean_of = |cols: &[usize]| {
                cols.iter().map(|&j| log_tpm[[g, j]]).sum::<f64>() / cols.len() as f64
            };
            mean_of(&control) > log2_abundance_min || mean_of(&treated) > log2_abundance_min
        })
        .collect()
}

/// The authoritative significant set: adjusted p below the cutoff, no
/// missing fields, and expressed per the abundance filter. Both
/// conditions must hold independently.
pub fn significant_genes(
    results: &DataFrame,
    expressed: &[bool],
    padj_max: f64,
) -> Result<DataFrame> {
    let n = results.height();
    let numeric = ["base_mean", "log2_fold_change", "lfc_se", "stat", "pvalue", "padj"];

    let mut complete = vec![true; n];
    for name in numeric {
        let column = require_column(results, "differential-expression results", name)?
            .cast(&DataType::Float64)?;
        let values = column.f64()?;
        for (i, v) in values.into_iter().enumerate() {
            match v {
                Some(x) if x.is_finite() => {}
                _ => complete[i] = false,
            }
        }
    }

    let padj = require_column(results, "differential-expression results", "padj")?.f64()?;
    let mask: Vec<bool> = (0..n)
        .map(|i| {
            complete[i]
                && expressed[i]
                && padj.get(i).map(|p| p < padj_max).unwrap_or(false)
        })
        .collect();

    let filtered = results.filter(&BooleanChunked::from_slice(
        PlSmallStr::from("significant"),
        &mask,
    ))?;
    info!(
        "Significant set: {} of {} genes (padj < {padj_max} and expressed)",
        filtered.height(),
        n
    );
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use ndarray::Array2;
    use polars::prelude::*;

    fn annotation(ids: &[&str]) -> DataFrame {
        DataFrame::new(vec![
            Column::from(Series::new(
                PlSmallStr::from("gene_id"),
                ids.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )),
            Column::from(Series::new(
                PlSmallStr::from("gene_name"),
                ids.iter().map(|s| format!("name_{s}")).collect::<Vec<_>>(),
            )),
        ])
        .unwrap()
    }

    fn wald(n: usize) -> WaldOutcome {
        WaldOutcome {
            log2_fold_change: vec![1.0; n],
            lfc_se: vec![0.2; n],
            stat: vec![5.0; n],
            pvalue: vec![1e-6; n],
        }
    }

    /// Five genes straddling both thresholds: the significant set is
    /// exactly the intersection of the p-value and abundance filters.
    #[test]
    fn significant_set_is_the_filter_intersection() {
        let ids = ["g1", "g2", "g3", "g4", "g5"];
        let gene_ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();

        let mut w = wald(5);
        // g3: missing padj via NaN p-value chain; g4: non-significant padj
        w.pvalue[2] = f64::NAN;
        let padj = vec![0.01, 0.02, f64::NAN, 0.5, 0.001];
        // g2 fails the abundance filter, everything else passes
        let expressed = vec![true, false, true, true, true];

        let results =
            build_results_table(&gene_ids, &[50.0; 5], &w, &padj, &annotation(&ids)).unwrap();
        let significant = significant_genes(&results, &expressed, 0.05).unwrap();

        let kept: Vec<&str> = significant
            .column("gene_id")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(kept, vec!["g1", "g5"]);
    }

    #[test]
    fn expressed_mask_uses_group_means_of_log_abundance() {
        // Two genes, 2 vs 2 samples. Threshold 6.5 on log2(tpm + 0.5).
        // g1: control mean below, treated mean above -> expressed
        // g2: both groups below -> not expressed
        let tpm = ndarray::array![
            [10.0, 12.0, 200.0, 220.0],
            [10.0, 12.0, 30.0, 20.0],
        ];
        let dim = tpm.dim();
        let bundle = AbundanceBundle::new(
            Array2::from_elem(dim, 5.0),
            Array2::from_elem(dim, 100.0),
            tpm,
            vec!["g1".into(), "g2".into()],
            vec!["ctrl_1".into(), "ctrl_2".into(), "remy_1".into(), "remy_2".into()],
        )
        .unwrap();
        let design = SampleDesign::from_sample_ids(
            &bundle.sample_ids().to_vec(),
            &AnalysisConfig::default(),
        )
        .unwrap();

        let mask = expressed_mask(&bundle, &design, 0.5, 6.5);
        assert_eq!(mask, vec![true, false]);
    }

    #[test]
    fn annotation_join_is_keyed_not_positional() {
        let gene_ids = vec!["g2".to_string(), "g1".to_string()];
        // Annotation listed in the opposite order
        let results = build_results_table(
            &gene_ids,
            &[10.0, 20.0],
            &wald(2),
            &[0.01, 0.01],
            &annotation(&["g1", "g2"]),
        )
        .unwrap();

        let names: Vec<&str> = results
            .column("gene_name")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(names, vec!["name_g2", "name_g1"]);
    }
}
