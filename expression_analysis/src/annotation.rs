//! Gene annotation: cache-first lookup with a remote BioMart fallback
//!
//! The remote endpoint is a pinned Ensembl *archive* release, so the
//! same gene-id set always yields the same table; the current release
//! drifting forward cannot silently change annotation results. The
//! first successful fetch is written to a flat CSV cache and every
//! later run reads only the cache.

use std::path::Path;
use std::thread;
use std::time::Duration;

use polars::prelude::*;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::tables::{assert_join_preserved, read_csv, require_column, write_csv};

const CHUNK: usize = 400;
const MAX_ATTEMPTS: u32 = 3;

/// Annotate the given genes: read the cache when present, otherwise
/// query the archive service and write the cache.
pub fn annotate_genes(gene_ids: &[String], cfg: &AnalysisConfig) -> Result<DataFrame> {
    if cfg.annotation_cache.exists() {
        info!(
            "Reading gene annotation cache {}",
            cfg.annotation_cache.display()
        );
        return read_cache(&cfg.annotation_cache);
    }

    info!(
        "Annotation cache missing, querying {} ({} genes)",
        cfg.biomart_url,
        gene_ids.len()
    );
    let annotation = fetch_annotation(gene_ids, cfg)?;
    write_csv(&annotation, &cfg.annotation_cache)?;
    info!(
        "Wrote annotation cache {} ({} rows)",
        cfg.annotation_cache.display(),
        annotation.height()
    );
    Ok(annotation)
}

fn read_cache(path: &Path) -> Result<DataFrame> {
    let df = read_csv(path)?;
    for column in ["gene_id", "gene_name", "biotype", "description", "gc_content"] {
        require_column(&df, "annotation cache", column)?;
    }
    Ok(df)
}

/// Left-join the annotation onto the bundle's gene order, keyed by gene
/// id. The result has exactly one row per bundle gene, in bundle order.
pub fn join_annotation(gene_ids: &[String], annotation: &DataFrame) -> Result<DataFrame> {
    let genes = DataFrame::new(vec![Column::from(Series::new(
        PlSmallStr::from("gene_id"),
        gene_ids.to_vec(),
    ))])?;

    let joined = genes.join(
        annotation,
        ["gene_id"],
        ["gene_id"],
        JoinArgs::new(JoinType::Left),
        None,
    )?;
    assert_join_preserved("gene annotation", gene_ids.len(), &joined)?;

    let missing = joined.column("gene_name")?.null_count();
    if missing > 0 {
        warn!("{missing} genes have no annotation entry");
    }
    Ok(joined)
}

/// Per-gene GC percentage aligned to the given annotation table; genes
/// without a GC value come back as NaN and are skipped by the GC-bias
/// normalizer.
pub fn gc_vector(annotation: &DataFrame) -> Result<Vec<f64>> {
    let gc = require_column(annotation, "gene annotation", "gc_content")?
        .cast(&DataType::Float64)?;
    let gc = gc.f64()?;
    let values: Vec<f64> = gc.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();

    let n_missing = values.iter().filter(|v| v.is_nan()).count();
    if n_missing > 0 {
        warn!("{n_missing} genes lack GC content and bypass GC normalization");
    }
    Ok(values)
}

fn fetch_annotation(gene_ids: &[String], cfg: &AnalysisConfig) -> Result<DataFrame> {
    let mut headers = HeaderMap::new();
    headers.insert("Accept", HeaderValue::from_static("text/plain"));
    headers.insert(USER_AGENT, HeaderValue::from_static("expression-analysis/0.1"));
    let client = Client::builder().default_headers(headers).build()?;

    let mut ids = Vec::new();
    let mut names: Vec<Option<String>> = Vec::new();
    let mut biotypes: Vec<Option<String>> = Vec::new();
    let mut descriptions: Vec<Option<String>> = Vec::new();
    let mut gc: Vec<Option<f64>> = Vec::new();

    for chunk in gene_ids.chunks(CHUNK) {
        let query = biomart_query(&cfg.biomart_dataset, chunk);
        let body = request_with_retry(&client, &cfg.biomart_url, &query)?;

        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 5 {
                return Err(AnalysisError::AnnotationService {
                    reason: format!("malformed response line: '{line}'"),
                });
            }
            ids.push(fields[0].to_string());
            names.push(non_empty(fields[1]));
            biotypes.push(non_empty(fields[2]));
            descriptions.push(non_empty(fields[3]));
            gc.push(fields[4].parse::<f64>().ok());
        }
        debug!("Fetched {} annotation rows so far", ids.len());
    }

    if ids.is_empty() {
        return Err(AnalysisError::AnnotationService {
            reason: "annotation service returned no rows".to_string(),
        });
    }

    Ok(DataFrame::new(vec![
        Column::from(Series::new(PlSmallStr::from("gene_id"), ids)),
        Column::from(Series::new(PlSmallStr::from("gene_name"), names)),
        Column::from(Series::new(PlSmallStr::from("biotype"), biotypes)),
        Column::from(Series::new(PlSmallStr::from("description"), descriptions)),
        Column::from(Series::new(PlSmallStr::from("gc_content"), gc)),
    ])?)
}

fn request_with_retry(client: &Client, base_url: &str, query: &str) -> Result<String> {
    let url = format!("{base_url}/biomart/martservice");
    let mut attempts = 0;

    loop {
        let response = client.get(&url).query(&[("query", query)]).send()?;

        if response.status().is_success() {
            return Ok(response.text()?);
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            attempts += 1;
            if attempts >= MAX_ATTEMPTS {
                return Err(AnalysisError::AnnotationService {
                    reason: format!("exceeded maximum retries for {url}"),
                });
            }
            let wait = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            warn!("Rate limited, waiting {wait}s before retrying");
            thread::sleep(Duration::from_secs(wait));
        } else {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(AnalysisError::AnnotationService {
                reason: format!("{url} returned {status}: {text}"),
            });
        }
    }
}

fn biomart_query(dataset: &str, gene_ids: &[String]) -> String {
    let id_list = gene_ids.join(",");
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?><!DOCTYPE Query>"#,
            r#"<Query virtualSchemaName="default" formatter="TSV" header="0" uniqueRows="1">"#,
            r#"<Dataset name="{dataset}" interface="default">"#,
            r#"<Filter name="ensembl_gene_id" value="{ids}"/>"#,
            r#"<Attribute name="ensembl_gene_id"/>"#,
            r#"<Attribute name="external_gene_name"/>"#,
            r#"<Attribute name="gene_biotype"/>"#,
            r#"<Attribute name="description"/>"#,
            r#"<Attribute name="percentage_gene_gc_content"/>"#,
            r#"</Dataset></Query>"#
        ),
        dataset = dataset,
        ids = id_list,
    )
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
