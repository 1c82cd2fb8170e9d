//! In-memory per-chromosome interval index (spec.md §4.B).
//!
//! Two `ArrayBackedIntervalTree`s per chromosome — one for gene intervals,
//! one for exon intervals — support point and range overlap queries
//! returning feature identifiers. Grounded on the teacher's
//! `strucvars::query::genes::GeneRegionDb`, generalized from a single
//! gene-region tree to the gene+exon pair this spec needs and keyed by
//! chromosome name rather than a fixed numeric index.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use bio::data_structures::interval_tree::ArrayBackedIntervalTree;
use serde::{Deserialize, Serialize};

/// The kind of genomic feature a [`FeatureRecord`] describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Gene,
    Exon,
}

/// Strand of a feature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    Plus,
    Minus,
    Unknown,
}

/// One feature (gene or exon), as stored on disk. Coordinates are 0-based
/// half-open (`start..end`) internally, converted from the 1-based
/// inclusive coordinates at the builder/query interface boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub feature_id: String,
    pub chrom: String,
    pub start: i32,
    pub end: i32,
    pub kind: FeatureKind,
    pub strand: Strand,
    pub parent_gene: Option<String>,
}

/// The current on-disk format version for index blobs. Bump whenever the
/// schema of [`FeatureRecord`] or [`IndexFile`] changes; [`load_index_file`]
/// rejects files whose version doesn't match (spec.md §9 "Pickled index
/// files").
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Self-describing, versioned container for a serialized set of feature
/// records (one file for genes, one for exons).
#[derive(Serialize, Deserialize)]
pub struct IndexFile {
    pub format_version: u32,
    pub records: Vec<FeatureRecord>,
}

/// One chromosome's worth of interval tree plus the records it indexes (the
/// records are needed to map tree cursor positions back to feature ids).
struct ChromTree {
    records: Vec<FeatureRecord>,
    tree: ArrayBackedIntervalTree<i32, u32>,
}

impl Default for ChromTree {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            tree: ArrayBackedIntervalTree::new(),
        }
    }
}

impl ChromTree {
    fn overlap_range(&self, range: Range<i32>) -> HashSet<String> {
        self.tree
            .find(range)
            .iter()
            .map(|entry| self.records[*entry.data() as usize].feature_id.clone())
            .collect()
    }
}

/// An immutable, queryable interval index over genes and exons, built once
/// and shared read-only across classifier worker threads.
#[derive(Default)]
pub struct IntervalIndex {
    genes: HashMap<String, ChromTree>,
    exons: HashMap<String, ChromTree>,
}

fn build_chrom_trees(records: Vec<FeatureRecord>) -> HashMap<String, ChromTree> {
    let mut by_chrom: HashMap<String, ChromTree> = HashMap::new();
    for record in records {
        let entry = by_chrom.entry(record.chrom.clone()).or_default();
        let key = record.start..record.end;
        let idx = entry.records.len() as u32;
        entry.tree.insert(key, idx);
        entry.records.push(record);
    }
    for chrom_tree in by_chrom.values_mut() {
        chrom_tree.tree.index();
    }
    by_chrom
}

impl IntervalIndex {
    pub fn from_records(gene_records: Vec<FeatureRecord>, exon_records: Vec<FeatureRecord>) -> Self {
        Self {
            genes: build_chrom_trees(gene_records),
            exons: build_chrom_trees(exon_records),
        }
    }

    /// Load from two on-disk index blobs built by the [`crate::annotation::builder`].
    pub fn load(genes_path: &str, exons_path: &str) -> Result<Self, anyhow::Error> {
        let gene_records = load_index_file(genes_path)?;
        let exon_records = load_index_file(exons_path)?;
        Ok(Self::from_records(gene_records, exon_records))
    }

    /// 1-based inclusive point to the 0-based half-open range the trees use.
    fn point_range(pos: i64) -> Range<i32> {
        let start = (pos - 1) as i32;
        start..(start + 1)
    }

    fn range_range(start_1based: i64, end_1based: i64) -> Range<i32> {
        ((start_1based - 1) as i32)..(end_1based as i32)
    }

    pub fn genes_at(&self, chrom: &str, pos: i64) -> HashSet<String> {
        self.genes
            .get(chrom)
            .map(|t| t.overlap_range(Self::point_range(pos)))
            .unwrap_or_default()
    }

    pub fn genes_in_range(&self, chrom: &str, start: i64, end: i64) -> HashSet<String> {
        self.genes
            .get(chrom)
            .map(|t| t.overlap_range(Self::range_range(start, end)))
            .unwrap_or_default()
    }

    pub fn exons_at(&self, chrom: &str, pos: i64) -> HashSet<String> {
        self.exons
            .get(chrom)
            .map(|t| t.overlap_range(Self::point_range(pos)))
            .unwrap_or_default()
    }

    pub fn exons_in_range(&self, chrom: &str, start: i64, end: i64) -> HashSet<String> {
        self.exons
            .get(chrom)
            .map(|t| t.overlap_range(Self::range_range(start, end)))
            .unwrap_or_default()
    }
}

pub fn load_index_file(path: &str) -> Result<Vec<FeatureRecord>, anyhow::Error> {
    let reader = crate::common::io::open_read_maybe_gz(path)
        .map_err(|e| anyhow::anyhow!("could not open index file {:?}: {}", path, e))?;
    let file: IndexFile = serde_json::from_reader(reader)
        .map_err(|e| anyhow::anyhow!("could not parse index file {:?}: {}", path, e))?;
    if file.format_version != INDEX_FORMAT_VERSION {
        anyhow::bail!(
            "index file {:?} has format version {}, expected {} -- rebuild with `build-annotation`",
            path,
            file.format_version,
            INDEX_FORMAT_VERSION
        );
    }
    Ok(file.records)
}

pub fn write_index_file(path: &std::path::Path, records: &[FeatureRecord]) -> Result<(), anyhow::Error> {
    let file = IndexFile {
        format_version: INDEX_FORMAT_VERSION,
        records: records.to_vec(),
    };
    let writer = std::fs::File::create(path)
        .map_err(|e| anyhow::anyhow!("could not create index file {:?}: {}", path, e))?;
    serde_json::to_writer(std::io::BufWriter::new(writer), &file)
        .map_err(|e| anyhow::anyhow!("could not write index file {:?}: {}", path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(id: &str, chrom: &str, start: i32, end: i32) -> FeatureRecord {
        FeatureRecord {
            feature_id: id.to_owned(),
            chrom: chrom.to_owned(),
            start,
            end,
            kind: FeatureKind::Gene,
            strand: Strand::Plus,
            parent_gene: None,
        }
    }

    #[test]
    fn point_query_matches_direct_scan() {
        let records = vec![
            gene("ABC", "1", 100, 200),
            gene("XYZ", "1", 150, 250),
            gene("ONLY2", "2", 0, 50),
        ];
        let index = IntervalIndex::from_records(records.clone(), Vec::new());

        for chrom in ["1", "2"] {
            for pos in 0..260 {
                let expected: HashSet<String> = records
                    .iter()
                    .filter(|r| r.chrom == chrom && r.start < pos as i32 && pos as i32 <= r.end)
                    .map(|r| r.feature_id.clone())
                    .collect();
                assert_eq!(expected, index.genes_at(chrom, pos), "pos={pos} chrom={chrom}");
            }
        }
    }

    #[test]
    fn unknown_chromosome_returns_empty() {
        let index = IntervalIndex::from_records(vec![gene("ABC", "1", 0, 10)], Vec::new());
        assert!(index.genes_at("99", 5).is_empty());
    }

    #[test]
    fn splice_padding_boundary() {
        // exon.end=200 padded by 2 -> interval [start, 202) half-open i.e. 1-based 201, 202 included.
        let exon = FeatureRecord {
            feature_id: "EX1".to_owned(),
            chrom: "1".to_owned(),
            start: 100,
            end: 202,
            kind: FeatureKind::Exon,
            strand: Strand::Plus,
            parent_gene: Some("ABC".to_owned()),
        };
        let index = IntervalIndex::from_records(Vec::new(), vec![exon]);
        assert!(!index.exons_at("1", 202).is_empty());
        assert!(index.exons_at("1", 203).is_empty());
    }
}
