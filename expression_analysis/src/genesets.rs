//! Curated gene lists: lineage markers, pathway membership and GO-term
//! enrichment scores
//!
//! All three tables are authored outside this pipeline and treated as
//! immutable reference data. Pathway categories form a closed set; each
//! variant carries its own rendering configuration instead of string
//! matching at plot time.

use std::path::Path;

use polars::prelude::*;
use tracing::warn;

use crate::error::Result;
use crate::tables::{read_csv, require_column};

/// The known functional categories, one heatmap each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathwayCategory {
    Myelination,
    LipidMetabolism,
    OligodendrocyteDifferentiation,
    CellCycle,
    Inflammation,
    AxonGuidance,
    ExtracellularMatrix,
}

impl PathwayCategory {
    pub const ALL: [PathwayCategory; 7] = [
        PathwayCategory::Myelination,
        PathwayCategory::LipidMetabolism,
        PathwayCategory::OligodendrocyteDifferentiation,
        PathwayCategory::CellCycle,
        PathwayCategory::Inflammation,
        PathwayCategory::AxonGuidance,
        PathwayCategory::ExtracellularMatrix,
    ];

    /// Label used in the curated pathway table.
    pub fn label(self) -> &'static str {
        match self {
            PathwayCategory::Myelination => "myelination",
            PathwayCategory::LipidMetabolism => "lipid_metabolism",
            PathwayCategory::OligodendrocyteDifferentiation => "oligodendrocyte_differentiation",
            PathwayCategory::CellCycle => "cell_cycle",
            PathwayCategory::Inflammation => "inflammation",
            PathwayCategory::AxonGuidance => "axon_guidance",
            PathwayCategory::ExtracellularMatrix => "extracellular_matrix",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.label() == label)
    }

    /// Figure title for this category's heatmap.
    pub fn title(self) -> &'static str {
        match self {
            PathwayCategory::Myelination => "Myelination",
            PathwayCategory::LipidMetabolism => "Lipid metabolism",
            PathwayCategory::OligodendrocyteDifferentiation => "Oligodendrocyte differentiation",
            PathwayCategory::CellCycle => "Cell cycle",
            PathwayCategory::Inflammation => "Inflammation",
            PathwayCategory::AxonGuidance => "Axon guidance",
            PathwayCategory::ExtracellularMatrix => "Extracellular matrix",
        }
    }

    /// File stem of the rendered figure.
    pub fn file_stem(self) -> &'static str {
        match self {
            PathwayCategory::Myelination => "heatmap_myelination",
            PathwayCategory::LipidMetabolism => "heatmap_lipid_metabolism",
            PathwayCategory::OligodendrocyteDifferentiation => "heatmap_olig_differentiation",
            PathwayCategory::CellCycle => "heatmap_cell_cycle",
            PathwayCategory::Inflammation => "heatmap_inflammation",
            PathwayCategory::AxonGuidance => "heatmap_axon_guidance",
            PathwayCategory::ExtracellularMatrix => "heatmap_ecm",
        }
    }
}

/// Marker genes with a lineage label (`gene_name, lineage`).
pub fn read_marker_list(path: &Path) -> Result<DataFrame> {
    let df = read_csv(path)?;
    require_column(&df, "marker list", "gene_name")?;
    require_column(&df, "marker list", "lineage")?;
    Ok(df)
}

/// Pathway genes with category and module labels
/// (`gene_name, category, module`). Rows with an unknown category are
/// dropped with a warning; the closed enum above is the contract.
pub fn read_pathway_list(path: &Path) -> Result<DataFrame> {
    let df = read_csv(path)?;
    require_column(&df, "pathway list", "gene_name")?;
    require_column(&df, "pathway list", "category")?;
    require_column(&df, "pathway list", "module")?;

    let categories = df.column("category")?.str()?;
    let keep: Vec<bool> = categories
        .into_iter()
        .map(|c| c.map(|l| PathwayCategory::from_label(l).is_some()).unwrap_or(false))
        .collect();
    let n_dropped = keep.iter().filter(|&&k| !k).count();
    if n_dropped > 0 {
        warn!("Dropping {n_dropped} pathway rows with unknown category labels");
    }

    let mask = BooleanChunked::from_slice(PlSmallStr::from("known_category"), &keep);
    Ok(df.filter(&mask)?)
}

/// Marker (gene, lineage) pairs in file order.
pub fn marker_rows(df: &DataFrame) -> Result<Vec<(String, String)>> {
    let genes = df.column("gene_name")?.str()?;
    let lineages = df.column("lineage")?.str()?;

    let mut rows = Vec::new();
    for i in 0..df.height() {
        if let (Some(g), Some(l)) = (genes.get(i), lineages.get(i)) {
            rows.push((g.to_string(), l.to_string()));
        }
    }
    Ok(rows)
}

/// Rows of the pathway table belonging to one category, in file order.
pub fn pathway_rows_for(df: &DataFrame, category: PathwayCategory) -> Result<Vec<(String, String)>> {
    let genes = df.column("gene_name")?.str()?;
    let categories = df.column("category")?.str()?;
    let modules = df.column("module")?.str()?;

    let mut rows = Vec::new();
    for i in 0..df.height() {
        if categories.get(i) == Some(category.label()) {
            if let (Some(g), Some(m)) = (genes.get(i), modules.get(i)) {
                rows.push((g.to_string(), m.to_string()));
            }
        }
    }
    Ok(rows)
}

/// GO-term enrichment scores (`term, score, module, include`).
pub fn read_go_terms(path: &Path) -> Result<DataFrame> {
    let df = read_csv(path)?;
    for column in ["term", "score", "module", "include"] {
        require_column(&df, "GO terms", column)?;
    }
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn category_labels_round_trip() {
        for category in PathwayCategory::ALL {
            assert_eq!(PathwayCategory::from_label(category.label()), Some(category));
        }
        assert_eq!(PathwayCategory::from_label("unheard_of"), None);
    }

    #[test]
    fn unknown_categories_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pathways.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "gene_name,category,module").unwrap();
        writeln!(f, "Mbp,myelination,structural").unwrap();
        writeln!(f, "Plp1,myelination,structural").unwrap();
        writeln!(f, "Xyz1,made_up_category,whatever").unwrap();

        let df = read_pathway_list(&path).unwrap();
        assert_eq!(df.height(), 2);

        let rows = pathway_rows_for(&df, PathwayCategory::Myelination).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("Mbp".to_string(), "structural".to_string()));
    }

    #[test]
    fn marker_list_requires_lineage_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "gene_name,cell_type").unwrap();
        writeln!(f, "Pdgfra,OPC").unwrap();
        assert!(read_marker_list(&path).is_err());
    }
}
