//! Low-expression filtering and length guards

use polars::prelude::*;
use tracing::info;

use crate::data::{AbundanceBundle, SampleDesign};
use crate::error::Result;
use crate::stats::median_in_place;

/// Retain a gene iff its median raw count within at least one group
/// exceeds `min_median`. Genes induced in only one condition survive;
/// genes indistinguishable from zero-inflated noise in both do not.
///
/// Returns the filtered bundle plus the keep mask (bundle order), which
/// callers use to subset the annotation table identically.
pub fn filter_by_group_median(
    bundle: &AbundanceBundle,
    design: &SampleDesign,
    min_median: f64,
) -> Result<(AbundanceBundle, Vec<bool>)> {
    let counts = bundle.counts();
    let control = design.group_indices(design.control_label());
    let treated = design.group_indices(design.treated_label());

    let keep: Vec<bool> = (0..bundle.n_genes())
        .map(|g| {
            let mut a: Vec<f64> = control.iter().map(|&j| counts[[g, j]]).collect();
            let mut b: Vec<f64> = treated.iter().map(|&j| counts[[g, j]]).collect();
            median_in_place(&mut a) > min_median || median_in_place(&mut b) > min_median
        })
        .collect();

    let filtered = bundle.retain_genes(&keep)?;
    info!(
        "Expression filter: kept {} of {} genes (median > {} in at least one group)",
        filtered.n_genes(),
        bundle.n_genes(),
        min_median
    );
    Ok((filtered, keep))
}

/// Subset an annotation table with the same mask used on the bundle.
pub fn filter_annotation(annotation: &DataFrame, keep: &[bool]) -> Result<DataFrame> {
    let mask = BooleanChunked::from_slice(PlSmallStr::from("keep"), keep);
    Ok(annotation.filter(&mask)?)
}

/// Clamp zero effective lengths to 1 so length-normalized models never
/// divide by zero. Applied unconditionally, not just to filtered genes.
pub fn clamp_zero_lengths(bundle: &AbundanceBundle) -> Result<(AbundanceBundle, usize)> {
    let mut lengths = bundle.lengths().to_owned();
    let mut clamped = 0usize;
    for value in lengths.iter_mut() {
        if *value == 0.0 {
            *value = 1.0;
            clamped += 1;
        }
    }
    if clamped > 0 {
        info!("Clamped {clamped} zero gene lengths to 1");
    }
    Ok((bundle.with_lengths(lengths)?, clamped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use ndarray::Array2;
    use polars::prelude::*;

    fn bundle_with_counts(counts: Array2<f64>, genes: &[&str], samples: &[&str]) -> AbundanceBundle {
        let dim = counts.dim();
        AbundanceBundle::new(
            counts,
            Array2::from_elem(dim, 100.0),
            Array2::from_elem(dim, 1.0),
            genes.iter().map(|s| s.to_string()).collect(),
            samples.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    fn design_for(samples: &[&str]) -> SampleDesign {
        let ids: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
        SampleDesign::from_sample_ids(&ids, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn retained_set_is_exactly_predictable() {
        // Per-group medians:
        //   g_keep_a:     ctrl 5, remy 0  -> kept (control side)
        //   g_keep_b:     ctrl 0, remy 9  -> kept (induced in one condition)
        //   g_drop:       ctrl 3, remy 3  -> dropped (3 is not > 3)
        //   g_zero:       ctrl 0, remy 0  -> dropped
        let counts = ndarray::array![
            [5.0, 5.0, 6.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 9.0, 9.0, 8.0],
            [3.0, 3.0, 3.0, 3.0, 3.0, 3.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ];
        let bundle = bundle_with_counts(
            counts,
            &["g_keep_a", "g_keep_b", "g_drop", "g_zero"],
            &["ctrl_1", "ctrl_2", "ctrl_3", "remy_1", "remy_2", "remy_3"],
        );
        let design = design_for(&["ctrl_1", "ctrl_2", "ctrl_3", "remy_1", "remy_2", "remy_3"]);

        let (filtered, keep) = filter_by_group_median(&bundle, &design, 3.0).unwrap();
        assert_eq!(keep, vec![true, true, false, false]);
        assert_eq!(
            filtered.gene_ids(),
            &["g_keep_a".to_string(), "g_keep_b".to_string()]
        );
        // Invariant: all three matrices share the filtered shape
        assert_eq!(filtered.counts().dim(), (2, 6));
        assert_eq!(filtered.lengths().dim(), (2, 6));
        assert_eq!(filtered.tpm().dim(), (2, 6));
    }

    #[test]
    fn annotation_mask_matches_bundle_mask() {
        let annotation = DataFrame::new(vec![Column::from(Series::new(
            PlSmallStr::from("gene_id"),
            vec!["a", "b", "c"],
        ))])
        .unwrap();
        let filtered = filter_annotation(&annotation, &[true, false, true]).unwrap();
        assert_eq!(filtered.height(), 2);
    }

    #[test]
    fn clamp_touches_only_zero_lengths() {
        let counts = ndarray::array![[4.0, 4.0], [4.0, 4.0]];
        let mut lengths = Array2::from_elem((2, 2), 250.0);
        lengths[[1, 0]] = 0.0;
        let bundle = AbundanceBundle::new(
            counts.clone(),
            lengths,
            Array2::from_elem((2, 2), 1.0),
            vec!["g1".into(), "g2".into()],
            vec!["ctrl_1".into(), "remy_1".into()],
        )
        .unwrap();

        let (clamped, n) = clamp_zero_lengths(&bundle).unwrap();
        assert_eq!(n, 1);
        assert_eq!(clamped.lengths()[[1, 0]], 1.0);
        assert_eq!(clamped.lengths()[[0, 0]], 250.0);
        assert_eq!(clamped.lengths()[[1, 1]], 250.0);
    }
}
