//! Run configuration
//!
//! Every dataset-tuned constant lives here rather than inline in the
//! pipeline, with the literal defaults the analysis was published with.
//! An optional `config.json` next to the binary overrides individual
//! fields; absent fields keep their defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Directory of per-sample quantification files (one TSV per sample).
    pub quant_dir: PathBuf,
    /// Persisted abundance bundle; imported from `quant_dir` when absent.
    pub bundle_path: PathBuf,
    /// Flat annotation cache keyed by gene id; written on first fetch.
    pub annotation_cache: PathBuf,

    /// Pinned Ensembl archive-release host. The archive pin keeps the
    /// annotation result fixed even after the current release moves on.
    pub biomart_url: String,
    pub biomart_dataset: String,

    /// Curated reference inputs authored outside this pipeline.
    pub marker_list: PathBuf,
    pub pathway_list: PathBuf,
    pub go_terms: PathBuf,

    pub figure_dir: PathBuf,
    /// Optional CSV export of the final significant-gene table.
    pub significant_csv: Option<PathBuf>,

    /// Explicit sample -> group assignment. When empty, samples are
    /// assigned by name prefix (`control_prefix` / `treated_prefix`).
    pub sample_groups: BTreeMap<String, String>,
    pub control_label: String,
    pub treated_label: String,
    pub control_prefix: String,
    pub treated_prefix: String,

    /// A gene is kept when its median raw count within at least one
    /// group exceeds this value.
    pub count_median_min: f64,
    /// BH-adjusted p-value cutoff for the significant set.
    pub padj_max: f64,
    /// Mean log2(TPM + pseudocount) a gene must exceed in at least one
    /// group to count as expressed.
    pub log2_abundance_min: f64,
    /// Rank of the unwanted-variation factor analysis.
    pub ruv_k: usize,
    /// Number of GC-content strata for within-lane normalization.
    pub gc_bins: usize,
    /// Offset applied before log2 so zero counts stay finite.
    pub pseudocount: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            quant_dir: PathBuf::from("./data/quant"),
            bundle_path: PathBuf::from("./data/abundance_bundle.bin"),
            annotation_cache: PathBuf::from("./data/gene_annotation.csv"),
            biomart_url: "https://nov2020.archive.ensembl.org".to_string(),
            biomart_dataset: "mmusculus_gene_ensembl".to_string(),
            marker_list: PathBuf::from("./data/marker_genes.csv"),
            pathway_list: PathBuf::from("./data/pathway_genes.csv"),
            go_terms: PathBuf::from("./data/go_terms.csv"),
            figure_dir: PathBuf::from("./figures"),
            significant_csv: Some(PathBuf::from("./results/significant_genes.csv")),
            sample_groups: BTreeMap::new(),
            control_label: "control".to_string(),
            treated_label: "remyelinating".to_string(),
            control_prefix: "ctrl".to_string(),
            treated_prefix: "remy".to_string(),
            count_median_min: 3.0,
            padj_max: 0.05,
            log2_abundance_min: 6.5,
            ruv_k: 1,
            gc_bins: 10,
            pseudocount: 0.5,
        }
    }
}

impl AnalysisConfig {
    /// Load `config.json` if present, otherwise fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let raw = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        } else {
            info!("No {} found, using default configuration", path.display());
            Ok(Self::default())
        }
    }
}
