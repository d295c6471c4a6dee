//! The abundance bundle: three aligned gene-by-sample matrices
//!
//! Counts, effective lengths and TPM abundances always share one gene
//! order and one sample order. Every filtering operation goes through
//! [`AbundanceBundle::retain_genes`] so the three matrices can never
//! drift apart.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbundanceBundle {
    counts: Array2<f64>,
    lengths: Array2<f64>,
    tpm: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl AbundanceBundle {
    pub fn new(
        counts: Array2<f64>,
        lengths: Array2<f64>,
        tpm: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let dim = counts.dim();
        if lengths.dim() != dim || tpm.dim() != dim {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{:?} for all three matrices", dim),
                got: format!("lengths {:?}, tpm {:?}", lengths.dim(), tpm.dim()),
            });
        }
        if gene_ids.len() != dim.0 {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} gene ids", dim.0),
                got: format!("{}", gene_ids.len()),
            });
        }
        if sample_ids.len() != dim.1 {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} sample ids", dim.1),
                got: format!("{}", sample_ids.len()),
            });
        }
        for (name, m) in [("counts", &counts), ("lengths", &lengths), ("tpm", &tpm)] {
            if m.iter().any(|&x| x < 0.0 || !x.is_finite()) {
                return Err(AnalysisError::InvalidBundle {
                    reason: format!("{name} matrix contains negative or non-finite values"),
                });
            }
        }
        Ok(Self {
            counts,
            lengths,
            tpm,
            gene_ids,
            sample_ids,
        })
    }

    /// Deserialize a previously persisted bundle when present, otherwise
    /// import the per-sample quantification files and persist the result
    /// for the next run.
    pub fn load_or_import(bundle_path: &Path, quant_dir: &Path) -> Result<Self> {
        if bundle_path.exists() {
            info!("Loading persisted abundance bundle from {}", bundle_path.display());
            let reader = BufReader::new(File::open(bundle_path)?);
            let bundle: AbundanceBundle = bincode::deserialize_from(reader)?;
            debug!(
                "Bundle: {} genes x {} samples",
                bundle.n_genes(),
                bundle.n_samples()
            );
            return Ok(bundle);
        }

        info!("No persisted bundle, importing from {}", quant_dir.display());
        let bundle = Self::import_dir(quant_dir)?;

        if let Some(parent) = bundle_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(bundle_path)?);
        bincode::serialize_into(writer, &bundle)?;
        info!("Persisted imported bundle to {}", bundle_path.display());
        Ok(bundle)
    }

    /// Import one quantification TSV per sample (columns `target_id`,
    /// `length`, `est_counts`, `tpm`). Sample ids are the file-name
    /// stems; the first file fixes the gene order and every other file
    /// must match it exactly.
    pub fn import_dir(quant_dir: &Path) -> Result<Self> {
        let mut files: Vec<_> = std::fs::read_dir(quant_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("tsv"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(AnalysisError::InvalidBundle {
                reason: format!("no .tsv quantification files in {}", quant_dir.display()),
            });
        }

        let mut gene_ids: Vec<String> = Vec::new();
        let mut sample_ids: Vec<String> = Vec::new();
        let mut count_cols: Vec<Vec<f64>> = Vec::new();
        let mut length_cols: Vec<Vec<f64>> = Vec::new();
        let mut tpm_cols: Vec<Vec<f64>> = Vec::new();

        for (file_idx, path) in files.iter().enumerate() {
            let sample_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| AnalysisError::InvalidBundle {
                    reason: format!("unusable file name {}", path.display()),
                })?
                .to_string();

            let (ids, lengths, counts, tpms) = read_quant_file(path)?;

            if file_idx == 0 {
                gene_ids = ids;
            } else if ids != gene_ids {
                return Err(AnalysisError::InvalidBundle {
                    reason: format!(
                        "gene ids in {} do not match the first sample's gene order",
                        path.display()
                    ),
                });
            }

            debug!("Imported {} ({} genes)", sample_id, counts.len());
            sample_ids.push(sample_id);
            count_cols.push(counts);
            length_cols.push(lengths);
            tpm_cols.push(tpms);
        }

        let n_genes = gene_ids.len();
        let n_samples = sample_ids.len();
        let mut counts = Array2::zeros((n_genes, n_samples));
        let mut lengths = Array2::zeros((n_genes, n_samples));
        let mut tpm = Array2::zeros((n_genes, n_samples));
        for j in 0..n_samples {
            for i in 0..n_genes {
                counts[[i, j]] = count_cols[j][i];
                lengths[[i, j]] = length_cols[j][i];
                tpm[[i, j]] = tpm_cols[j][i];
            }
        }

        info!("Imported abundance bundle: {} genes x {} samples", n_genes, n_samples);
        Self::new(counts, lengths, tpm, gene_ids, sample_ids)
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<f64> {
        self.counts.view()
    }

    pub fn lengths(&self) -> ArrayView2<f64> {
        self.lengths.view()
    }

    pub fn tpm(&self) -> ArrayView2<f64> {
        self.tpm.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// New bundle restricted to the flagged genes; the mask applies to
    /// counts, lengths and tpm identically, original order preserved.
    pub fn retain_genes(&self, keep: &[bool]) -> Result<Self> {
        if keep.len() != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} mask entries", self.n_genes()),
                got: format!("{}", keep.len()),
            });
        }
        let rows: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();

        let select = |m: &Array2<f64>| m.select(Axis(0), &rows);
        let gene_ids = rows.iter().map(|&i| self.gene_ids[i].clone()).collect();

        Self::new(
            select(&self.counts),
            select(&self.lengths),
            select(&self.tpm),
            gene_ids,
            self.sample_ids.clone(),
        )
    }

    /// Replace the working count matrix (normalization output); lengths
    /// and abundances are untouched.
    pub fn with_counts(&self, counts: Array2<f64>) -> Result<Self> {
        Self::new(
            counts,
            self.lengths.clone(),
            self.tpm.clone(),
            self.gene_ids.clone(),
            self.sample_ids.clone(),
        )
    }

    /// Replace the lengths matrix (zero clamping).
    pub fn with_lengths(&self, lengths: Array2<f64>) -> Result<Self> {
        Self::new(
            self.counts.clone(),
            lengths,
            self.tpm.clone(),
            self.gene_ids.clone(),
            self.sample_ids.clone(),
        )
    }

    /// log2(tpm + pseudocount), the matrix every report consumes.
    pub fn log2_tpm(&self, pseudocount: f64) -> Array2<f64> {
        self.tpm.mapv(|x| (x + pseudocount).log2())
    }
}

fn read_quant_file(path: &Path) -> Result<(Vec<String>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let col = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| AnalysisError::InvalidBundle {
                reason: format!("{} lacks required column '{name}'", path.display()),
            })
    };
    let id_col = col("target_id")?;
    let length_col = col("length")?;
    let counts_col = col("est_counts")?;
    let tpm_col = col("tpm")?;

    let mut ids = Vec::new();
    let mut lengths = Vec::new();
    let mut counts = Vec::new();
    let mut tpms = Vec::new();

    for record in reader.records() {
        let record = record?;
        let field = |idx: usize| -> Result<f64> {
            record
                .get(idx)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| AnalysisError::InvalidBundle {
                    reason: format!("unparseable numeric field in {}", path.display()),
                })
        };
        ids.push(
            record
                .get(id_col)
                .ok_or_else(|| AnalysisError::InvalidBundle {
                    reason: format!("missing target_id in {}", path.display()),
                })?
                .to_string(),
        );
        lengths.push(field(length_col)?);
        counts.push(field(counts_col)?);
        tpms.push(field(tpm_col)?);
    }

    Ok((ids, lengths, counts, tpms))
}
