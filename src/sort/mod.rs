//! Sorter/Emitter (spec.md §4.G).
//!
//! External merge-sort of one chromosome's spill file by `(pos, ref, alt)`,
//! then the augmented header and the sorted body are written to the final
//! output. Grounded verbatim on the teacher's `ext_sort`/`ByCoordinate`
//! idiom in `seqvars::query` -- a fresh `ExternalSorter` per chromosome
//! spill file, never one sorter reused across chromosomes (DESIGN.md's
//! Open Question decision: the source's single cross-chromosome sorter
//! instance was a bug, not a feature, here).

use std::io::{BufRead, Write};
use std::path::Path;

use ext_sort::{ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder};
use serde::{Deserialize, Serialize};

use crate::variant::{Header, HeaderAnnotationOptions};

/// A fully-rendered output row plus its sort key, one per spilled variant.
/// `ref`/`alt` break position ties (spec.md §8 "Output is sorted by
/// (chrom_order, pos, ref, alt)"); the chromosome itself is implicit since
/// sorting happens per-chromosome spill file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ByPosition {
    pub pos: i64,
    pub reference: String,
    pub alt: String,
    pub row: String,
}

impl PartialEq for ByPosition {
    fn eq(&self, other: &Self) -> bool {
        (self.pos, &self.reference, &self.alt) == (other.pos, &other.reference, &other.alt)
    }
}

impl Eq for ByPosition {}

impl PartialOrd for ByPosition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.pos, &self.reference, &self.alt).cmp(&(other.pos, &other.reference, &other.alt))
    }
}

/// Sort one chromosome's spill file (one JSON-per-line `ByPosition` record
/// per variant) and append the sorted `row` text to `out`.
///
/// `tmp_dir` is the scratch directory the external sorter may spill its own
/// merge chunks into; `elem_count` bounds how many records are buffered in
/// memory per chunk.
pub fn sort_chromosome_spill<W: Write>(
    spill_path: &Path,
    tmp_dir: &Path,
    elem_count: usize,
    out: &mut W,
) -> Result<(), anyhow::Error> {
    let reader = crate::common::io::open_read_maybe_gz(
        spill_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-UTF8 spill path: {:?}", spill_path))?,
    )?;

    let sorter: ExternalSorter<ByPosition, std::io::Error, LimitedBufferBuilder> = ExternalSorterBuilder::new()
        .with_tmp_dir(tmp_dir)
        .with_buffer(LimitedBufferBuilder::new(elem_count, false))
        .build()
        .map_err(|e| anyhow::anyhow!("problem creating external sorter: {}", e))?;

    let sorted_iter = sorter
        .sort(reader.lines().map(|res| {
            let line = res?;
            serde_json::from_str::<ByPosition>(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }))
        .map_err(|e| anyhow::anyhow!("problem sorting spill file {:?}: {}", spill_path, e))?;

    for record in sorted_iter {
        let record = record.map_err(|e| anyhow::anyhow!("problem reading sorted record: {}", e))?;
        writeln!(out, "{}", record.row)?;
    }
    Ok(())
}

/// Write the augmented header, then the sorted body of every chromosome
/// spill file in `chrom_order` (spec.md §4.G, §6).
pub fn emit<W: Write>(
    header: &Header,
    opts: &HeaderAnnotationOptions,
    spill_files: &[(String, std::path::PathBuf)],
    chrom_order: &indexmap::IndexMap<String, usize>,
    tmp_dir: &Path,
    elem_count: usize,
    out: &mut W,
) -> Result<(), anyhow::Error> {
    header.write_augmented(out, opts)?;

    let mut ordered = spill_files.to_vec();
    ordered.sort_by_key(|(chrom, _)| {
        chrom_order
            .get(&crate::common::normalize_chrom(chrom))
            .copied()
            .unwrap_or(usize::MAX)
    });

    for (chrom, path) in &ordered {
        tracing::debug!("sorting spill file for chromosome {chrom}");
        sort_chromosome_spill(path, tmp_dir, elem_count, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_position_then_alleles() {
        let mut v = vec![
            ByPosition { pos: 200, reference: "A".into(), alt: "T".into(), row: "b".into() },
            ByPosition { pos: 100, reference: "C".into(), alt: "G".into(), row: "a".into() },
            ByPosition { pos: 100, reference: "A".into(), alt: "T".into(), row: "c".into() },
        ];
        v.sort();
        assert_eq!(vec!["c", "a", "b"], v.iter().map(|r| r.row.as_str()).collect::<Vec<_>>());
    }
}
