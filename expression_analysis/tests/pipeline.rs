//! End-to-end pipeline tests on synthetic count data

use ndarray::Array2;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use expression_analysis::annotation::{gc_vector, join_annotation};
use expression_analysis::config::AnalysisConfig;
use expression_analysis::data::{AbundanceBundle, SampleDesign};
use expression_analysis::de::results::{expressed_mask, significant_genes};
use expression_analysis::de::run_differential_expression;
use expression_analysis::filter::{clamp_zero_lengths, filter_annotation, filter_by_group_median};
use expression_analysis::normalization::{
    estimate_size_factors, normalize_counts, within_lane_full_quantile,
};
use expression_analysis::ruv::estimate_unwanted_variation;

const N_GENES: usize = 300;
/// Strongly induced in the remyelinating group.
const DIFFERENTIAL: [usize; 2] = [14, 44];
/// Below the median-count filter in both groups.
const NEAR_ZERO: [usize; 3] = [297, 298, 299];
const FOLD: f64 = 8.0;

fn sample_names() -> Vec<String> {
    (1..=6)
        .map(|i| format!("ctrl_{i}"))
        .chain((1..=6).map(|i| format!("remy_{i}")))
        .collect()
}

/// 300 genes x 12 samples. GC rises monotonically with the gene index
/// and the base expression cycles with period 30, so every GC stratum
/// carries the same base distribution (as real data does, in
/// expectation). Two genes are induced eight-fold in the remyelinating
/// group; three sit at the detection floor; the rest are flat up to
/// seeded jitter.
fn synthetic_bundle(sample_ids: &[String]) -> AbundanceBundle {
    let mut rng = StdRng::seed_from_u64(7);
    let n_samples = sample_ids.len();

    let mut counts = Array2::zeros((N_GENES, n_samples));
    let mut tpm = Array2::zeros((N_GENES, n_samples));
    let mut lengths = Array2::zeros((N_GENES, n_samples));

    for g in 0..N_GENES {
        let base = 30.0 + (g % 30) as f64 * 9.0;
        for (j, sample) in sample_ids.iter().enumerate() {
            let treated = sample.starts_with("remy");
            let effect = if DIFFERENTIAL.contains(&g) && treated {
                FOLD
            } else {
                1.0
            };
            let jitter: f64 = rng.gen_range(0.95..1.05);
            counts[[g, j]] = if NEAR_ZERO.contains(&g) {
                rng.gen_range(0..=2) as f64
            } else {
                (base * effect * jitter).round()
            };
            // Abundances well above the expressed cutoff for the two
            // differential genes, straddling it for the rest
            tpm[[g, j]] = if DIFFERENTIAL.contains(&g) {
                250.0 * effect
            } else if g % 2 == 0 {
                150.0
            } else {
                20.0
            };
            lengths[[g, j]] = if g == 5 { 0.0 } else { 1000.0 + g as f64 };
        }
    }

    AbundanceBundle::new(
        counts,
        lengths,
        tpm,
        (0..N_GENES).map(|g| format!("gene_{g:03}")).collect(),
        sample_ids.to_vec(),
    )
    .unwrap()
}

fn synthetic_annotation(gene_ids: &[String]) -> DataFrame {
    let n = gene_ids.len();
    DataFrame::new(vec![
        Column::from(Series::new(PlSmallStr::from("gene_id"), gene_ids.to_vec())),
        Column::from(Series::new(
            PlSmallStr::from("gene_name"),
            gene_ids
                .iter()
                .map(|id| format!("Sym{id}"))
                .collect::<Vec<_>>(),
        )),
        Column::from(Series::new(
            PlSmallStr::from("biotype"),
            vec!["protein_coding"; n],
        )),
        Column::from(Series::new(
            PlSmallStr::from("description"),
            vec!["synthetic gene"; n],
        )),
        Column::from(Series::new(
            PlSmallStr::from("gc_content"),
            (0..n)
                .map(|g| {
                    let idx: usize = gene_ids[g][5..].parse().unwrap();
                    30.0 + idx as f64 * 0.1
                })
                .collect::<Vec<f64>>(),
        )),
    ])
    .unwrap()
}

/// Run stages 3-6 the way the binary does and return the significant
/// gene ids, sorted.
fn run_to_significant(bundle: &AbundanceBundle, cfg: &AnalysisConfig) -> Vec<String> {
    let design = SampleDesign::from_sample_ids(&bundle.sample_ids().to_vec(), cfg).unwrap();
    let design = design.align_to(bundle.sample_ids()).unwrap();

    let annotation_table = synthetic_annotation(bundle.gene_ids());
    let annotation = join_annotation(bundle.gene_ids(), &annotation_table).unwrap();

    let (bundle, keep) = filter_by_group_median(bundle, &design, cfg.count_median_min).unwrap();
    let annotation = filter_annotation(&annotation, &keep).unwrap();
    let (bundle, _) = clamp_zero_lengths(&bundle).unwrap();

    let gc = gc_vector(&annotation).unwrap();
    let gc_counts = within_lane_full_quantile(bundle.counts(), &gc, cfg.gc_bins).unwrap();
    let bundle = bundle.with_counts(gc_counts).unwrap();

    let size_factors = estimate_size_factors(bundle.counts()).unwrap();
    let normalized = normalize_counts(bundle.counts(), &size_factors);
    let w = estimate_unwanted_variation(normalized.view(), &design, cfg.ruv_k).unwrap();
    let design = design.with_covariates(&w).unwrap();

    let results = run_differential_expression(&bundle, &design, &annotation).unwrap();
    let expressed = expressed_mask(&bundle, &design, cfg.pseudocount, cfg.log2_abundance_min);
    let significant = significant_genes(&results, &expressed, cfg.padj_max).unwrap();

    let mut ids: Vec<String> = significant
        .column("gene_id")
        .unwrap()
        .str()
        .unwrap()
        .into_no_null_iter()
        .map(|s| s.to_string())
        .collect();
    ids.sort();
    ids
}

#[test]
fn recovers_exactly_the_differential_genes() {
    let cfg = AnalysisConfig::default();
    let bundle = synthetic_bundle(&sample_names());

    let significant = run_to_significant(&bundle, &cfg);
    assert_eq!(
        significant,
        vec!["gene_014".to_string(), "gene_044".to_string()],
        "significant set should be exactly the two induced genes"
    );
}

#[test]
fn bundle_invariant_holds_through_filtering_stages() {
    let cfg = AnalysisConfig::default();
    let bundle = synthetic_bundle(&sample_names());
    let design = SampleDesign::from_sample_ids(&bundle.sample_ids().to_vec(), &cfg).unwrap();

    let (filtered, keep) = filter_by_group_median(&bundle, &design, cfg.count_median_min).unwrap();
    let n_kept = keep.iter().filter(|&&k| k).count();

    // The three detection-floor genes are the only casualties
    assert_eq!(n_kept, N_GENES - NEAR_ZERO.len());
    assert!(!keep[297] && !keep[298] && !keep[299]);

    assert_eq!(filtered.n_genes(), n_kept);
    assert_eq!(filtered.counts().dim(), filtered.lengths().dim());
    assert_eq!(filtered.counts().dim(), filtered.tpm().dim());
    assert_eq!(filtered.gene_ids().len(), n_kept);
    assert_eq!(filtered.sample_ids(), bundle.sample_ids());

    // The zero lengths introduced for gene_005 get clamped, nothing else moves
    let (clamped, n) = clamp_zero_lengths(&filtered).unwrap();
    assert_eq!(n, 12);
    assert!(clamped.lengths().iter().all(|&l| l > 0.0));
    assert_eq!(clamped.counts(), filtered.counts());
}

#[test]
fn differential_stage_is_idempotent() {
    let cfg = AnalysisConfig::default();
    let bundle = synthetic_bundle(&sample_names());

    let first = run_to_significant(&bundle, &cfg);
    let second = run_to_significant(&bundle, &cfg);
    assert_eq!(first, second);
}

#[test]
fn sample_permutation_leaves_results_unchanged() {
    let cfg = AnalysisConfig::default();
    let ordered = sample_names();
    let bundle = synthetic_bundle(&ordered);

    // Interleave the groups and rebuild the bundle in that column order
    let permutation: Vec<usize> = vec![6, 0, 7, 1, 8, 2, 9, 3, 10, 4, 11, 5];
    let permuted_ids: Vec<String> = permutation.iter().map(|&j| ordered[j].clone()).collect();

    let n_genes = bundle.n_genes();
    let reorder = |m: ndarray::ArrayView2<f64>| {
        let mut out = Array2::zeros((n_genes, permutation.len()));
        for (new_j, &old_j) in permutation.iter().enumerate() {
            for g in 0..n_genes {
                out[[g, new_j]] = m[[g, old_j]];
            }
        }
        out
    };
    let permuted = AbundanceBundle::new(
        reorder(bundle.counts()),
        reorder(bundle.lengths()),
        reorder(bundle.tpm()),
        bundle.gene_ids().to_vec(),
        permuted_ids,
    )
    .unwrap();

    assert_eq!(
        run_to_significant(&bundle, &cfg),
        run_to_significant(&permuted, &cfg)
    );
}
