//! Sample design table: group assignment plus estimated covariates
//!
//! Row order always matches the abundance bundle's sample columns. Any
//! reordering goes through [`SampleDesign::align_to`], which matches by
//! sample id and fails hard when a sample is missing.

use polars::prelude::*;

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone)]
pub struct SampleDesign {
    samples: Vec<String>,
    groups: Vec<String>,
    /// Reference (denominator) level of the contrast.
    control_label: String,
    treated_label: String,
    /// Estimated nuisance covariates, one column per factor.
    covariates: Vec<(String, Vec<f64>)>,
}

impl SampleDesign {
    /// Assign each sample to a group, either from the explicit map in the
    /// configuration or by name prefix. Both configured levels must end
    /// up non-empty.
    pub fn from_sample_ids(sample_ids: &[String], cfg: &AnalysisConfig) -> Result<Self> {
        let mut groups = Vec::with_capacity(sample_ids.len());
        for id in sample_ids {
            let group = if !cfg.sample_groups.is_empty() {
                cfg.sample_groups
                    .get(id)
                    .cloned()
                    .ok_or_else(|| AnalysisError::InvalidDesign {
                        reason: format!("sample '{id}' missing from sample_groups"),
                    })?
            } else if id.starts_with(&cfg.control_prefix) {
                cfg.control_label.clone()
            } else if id.starts_with(&cfg.treated_prefix) {
                cfg.treated_label.clone()
            } else {
                return Err(AnalysisError::InvalidDesign {
                    reason: format!(
                        "sample '{id}' matches neither prefix '{}' nor '{}'",
                        cfg.control_prefix, cfg.treated_prefix
                    ),
                });
            };
            if group != cfg.control_label && group != cfg.treated_label {
                return Err(AnalysisError::InvalidDesign {
                    reason: format!("sample '{id}' assigned to unknown group '{group}'"),
                });
            }
            groups.push(group);
        }

        let design = Self {
            samples: sample_ids.to_vec(),
            groups,
            control_label: cfg.control_label.clone(),
            treated_label: cfg.treated_label.clone(),
            covariates: Vec::new(),
        };

        for level in [&design.control_label, &design.treated_label] {
            if design.group_indices(level).is_empty() {
                return Err(AnalysisError::InvalidDesign {
                    reason: format!("group '{level}' has no samples"),
                });
            }
        }
        Ok(design)
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.samples
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn control_label(&self) -> &str {
        &self.control_label
    }

    pub fn treated_label(&self) -> &str {
        &self.treated_label
    }

    pub fn covariates(&self) -> &[(String, Vec<f64>)] {
        &self.covariates
    }

    /// Column indices of the samples in the named group.
    pub fn group_indices(&self, level: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| (g == level).then_some(i))
            .collect()
    }

    /// New design extended with estimated covariate columns `ruv_w1..wk`.
    pub fn with_covariates(&self, w: &ndarray::Array2<f64>) -> Result<Self> {
        if w.nrows() != self.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} covariate rows", self.n_samples()),
                got: format!("{}", w.nrows()),
            });
        }
        let mut extended = self.clone();
        for k in 0..w.ncols() {
            extended
                .covariates
                .push((format!("ruv_w{}", k + 1), w.column(k).to_vec()));
        }
        Ok(extended)
    }

    /// Reorder this design to match the given sample order, matching by
    /// id rather than position.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        let mut samples = Vec::with_capacity(sample_ids.len());
        let mut groups = Vec::with_capacity(sample_ids.len());
        let mut covariates: Vec<(String, Vec<f64>)> = self
            .covariates
            .iter()
            .map(|(name, _)| (name.clone(), Vec::with_capacity(sample_ids.len())))
            .collect();

        for id in sample_ids {
            let pos = self
                .samples
                .iter()
                .position(|s| s == id)
                .ok_or_else(|| AnalysisError::InvalidDesign {
                    reason: format!("sample '{id}' not present in design table"),
                })?;
            samples.push(self.samples[pos].clone());
            groups.push(self.groups[pos].clone());
            for (slot, (_, values)) in covariates.iter_mut().zip(self.covariates.iter()) {
                slot.1.push(values[pos]);
            }
        }

        if samples.len() != self.samples.len() {
            return Err(AnalysisError::JoinRowMismatch {
                table: "sample design".to_string(),
                expected: self.samples.len(),
                got: samples.len(),
            });
        }

        Ok(Self {
            samples,
            groups,
            control_label: self.control_label.clone(),
            treated_label: self.treated_label.clone(),
            covariates,
        })
    }

    /// Tabular view, mainly for logging and the exported run summary.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = vec![
            Column::from(Series::new(
                PlSmallStr::from("sample_id"),
                self.samples.clone(),
            )),
            Column::from(Series::new(PlSmallStr::from("group"), self.groups.clone())),
        ];
        for (name, values) in &self.covariates {
            columns.push(Column::from(Series::new(
                PlSmallStr::from(name.as_str()),
                values.clone(),
            )));
        }
        Ok(DataFrame::new(columns)?)
    }
}
