use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use expression_analysis::annotation::{annotate_genes, gc_vector, join_annotation};
use expression_analysis::config::AnalysisConfig;
use expression_analysis::data::{AbundanceBundle, SampleDesign};
use expression_analysis::de::results::{expressed_mask, significant_genes};
use expression_analysis::de::run_differential_expression;
use expression_analysis::filter::{clamp_zero_lengths, filter_annotation, filter_by_group_median};
use expression_analysis::genesets::{
    marker_rows, pathway_rows_for, read_go_terms, read_marker_list, read_pathway_list,
    PathwayCategory,
};
use expression_analysis::normalization::{
    estimate_size_factors, normalize_counts, within_lane_full_quantile,
};
use expression_analysis::report::{
    extract_rows, gene_name_index, plot_annotated_heatmap, plot_go_bars, plot_pca, select_rows,
};
use expression_analysis::ruv::estimate_unwanted_variation;
use expression_analysis::tables::write_csv;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting remyelination RNA-seq analysis");
    let cfg = AnalysisConfig::load(std::path::Path::new("./config.json"))
        .context("loading configuration")?;

    // 1. Abundance loader
    let bundle = AbundanceBundle::load_or_import(&cfg.bundle_path, &cfg.quant_dir)
        .context("loading abundance bundle")?;
    let design = SampleDesign::from_sample_ids(&bundle.sample_ids().to_vec(), &cfg)
        .context("building sample design")?;
    // Re-assert the design/bundle alignment by id, never by position
    let design = design
        .align_to(bundle.sample_ids())
        .context("aligning design to bundle samples")?;
    info!(
        "{} genes x {} samples ({} {}, {} {})",
        bundle.n_genes(),
        bundle.n_samples(),
        design.group_indices(design.control_label()).len(),
        design.control_label(),
        design.group_indices(design.treated_label()).len(),
        design.treated_label()
    );

    // 2. Gene annotator (cache-first, pinned archive release)
    let annotation_table =
        annotate_genes(bundle.gene_ids(), &cfg).context("annotating genes")?;
    let annotation = join_annotation(bundle.gene_ids(), &annotation_table)
        .context("joining annotation to bundle genes")?;

    // 3. Expression filter + length guard
    let (bundle, keep) = filter_by_group_median(&bundle, &design, cfg.count_median_min)
        .context("filtering low-expression genes")?;
    let annotation = filter_annotation(&annotation, &keep).context("subsetting annotation")?;
    let (bundle, _) = clamp_zero_lengths(&bundle).context("clamping zero lengths")?;

    // 4. GC-bias normalizer
    let gc = gc_vector(&annotation).context("extracting GC covariate")?;
    let gc_counts = within_lane_full_quantile(bundle.counts(), &gc, cfg.gc_bins)
        .context("GC full-quantile normalization")?;
    let bundle = bundle.with_counts(gc_counts).context("updating working counts")?;

    // 5. Unwanted-variation estimator
    let size_factors =
        estimate_size_factors(bundle.counts()).context("estimating size factors")?;
    let normalized = normalize_counts(bundle.counts(), &size_factors);
    let w = estimate_unwanted_variation(normalized.view(), &design, cfg.ruv_k)
        .context("estimating unwanted variation")?;
    let design = design.with_covariates(&w).context("extending design")?;
    tracing::debug!("Extended design:\n{:?}", design.to_dataframe()?);

    // 6. Differential expression
    let results = run_differential_expression(&bundle, &design, &annotation)
        .context("fitting differential-expression model")?;
    let expressed = expressed_mask(&bundle, &design, cfg.pseudocount, cfg.log2_abundance_min);
    let significant =
        significant_genes(&results, &expressed, cfg.padj_max).context("filtering results")?;

    if let Some(path) = &cfg.significant_csv {
        write_csv(&significant, path).context("exporting significant genes")?;
        info!("Exported significant table to {}", path.display());
    }

    // 7. Reports
    std::fs::create_dir_all(&cfg.figure_dir).context("creating figure directory")?;
    let log_abundance = bundle.log2_tpm(cfg.pseudocount);

    plot_pca(
        &cfg.figure_dir.join("pca.png"),
        log_abundance.view(),
        &design,
    )
    .context("rendering PCA")?;

    let name_index = gene_name_index(&annotation).context("indexing gene names")?;

    let markers = read_marker_list(&cfg.marker_list).context("reading marker list")?;
    let marker_selection = select_rows(&marker_rows(&markers)?, &name_index, "marker heatmap");
    plot_annotated_heatmap(
        &cfg.figure_dir.join("heatmap_markers.png"),
        "Lineage markers",
        extract_rows(log_abundance.view(), &marker_selection.rows).view(),
        &marker_selection.labels,
        &marker_selection.annotations,
        bundle.sample_ids(),
    )
    .context("rendering marker heatmap")?;

    let pathways = read_pathway_list(&cfg.pathway_list).context("reading pathway list")?;
    for category in PathwayCategory::ALL {
        let curated = pathway_rows_for(&pathways, category)?;
        let selection = select_rows(&curated, &name_index, category.title());
        if selection.rows.is_empty() {
            tracing::warn!("No genes left for category '{}', skipping", category.title());
            continue;
        }
        plot_annotated_heatmap(
            &cfg.figure_dir.join(format!("{}.png", category.file_stem())),
            category.title(),
            extract_rows(log_abundance.view(), &selection.rows).view(),
            &selection.labels,
            &selection.annotations,
            bundle.sample_ids(),
        )
        .with_context(|| format!("rendering heatmap for {}", category.title()))?;
    }

    let go_terms = read_go_terms(&cfg.go_terms).context("reading GO terms")?;
    plot_go_bars(&cfg.figure_dir.join("go_terms.png"), &go_terms)
        .context("rendering GO bar chart")?;

    info!(
        "Analysis complete: {} significant genes, figures in {}",
        significant.height(),
        cfg.figure_dir.display()
    );
    Ok(())
}
