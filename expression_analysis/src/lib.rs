//! Exploratory differential-expression analysis of a bulk RNA-seq
//! remyelination experiment
//!
//! The pipeline is a strictly sequential batch run: load precomputed
//! transcript abundances, annotate genes against a pinned archive
//! release, filter low-expression genes, remove GC-content bias,
//! estimate unwanted variation from replicate differences, fit a
//! negative-binomial GLM for the group contrast, and render the
//! figures. Each stage takes the previous stage's output value and
//! returns a new one; nothing is mutated in place across stages.

pub mod annotation;
pub mod config;
pub mod data;
pub mod de;
pub mod error;
pub mod filter;
pub mod genesets;
pub mod normalization;
pub mod report;
pub mod ruv;
pub mod stats;
pub mod tables;

pub use config::AnalysisConfig;
pub use data::{AbundanceBundle, SampleDesign};
pub use error::{AnalysisError, Result};
