//! Score/Frequency Lookup (spec.md §4.E).
//!
//! Each external annotation source (CADD, CADD-1000G, 1000 Genomes
//! frequency) is a block-compressed, tab-separated `CHROM POS REF ALT
//! SCORE` file. A lazily-built sidecar position index maps `(chrom, pos,
//! ref, alt)` to a `noodles_bgzf` virtual position so a lookup is a single
//! seek-and-read-one-line. Grounded on the teacher's use of
//! `noodles_bgzf`/tabix-style readers for gnomAD/ClinVar lookups
//! (`strucvars::query`), narrowed to a self-rolled sidecar index since the
//! full `noodles-tabix`/`csi` machinery isn't needed for this spec's
//! simpler row shape.

use std::fs::File;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::normalize_chrom;

const SCORE_INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ScoreEntry {
    chrom: String,
    pos: i64,
    reference: String,
    alt: String,
    /// `noodles_bgzf::VirtualPosition`, stored as its raw `u64` so the
    /// sidecar format doesn't need to depend on the bgzf crate's own
    /// (de)serialization support.
    vpos: u64,
}

#[derive(Serialize, Deserialize)]
struct ScoreIndexFile {
    format_version: u32,
    entries: Vec<ScoreEntry>,
}

fn entry_key(entry: &ScoreEntry) -> (&str, i64, &str, &str) {
    (entry.chrom.as_str(), entry.pos, entry.reference.as_str(), entry.alt.as_str())
}

fn sidecar_path(source_path: &str) -> PathBuf {
    PathBuf::from(format!("{source_path}.posidx"))
}

fn build_score_index(source_path: &str) -> Result<Vec<ScoreEntry>, anyhow::Error> {
    let file = File::open(source_path)
        .map_err(|e| anyhow::anyhow!("could not open score source {:?}: {}", source_path, e))?;
    let mut reader = noodles_bgzf::Reader::new(file);
    let mut entries = Vec::new();

    loop {
        let vpos = reader.virtual_position();
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            tracing::warn!("skipping malformed score row in {:?}: {:?}", source_path, line);
            continue;
        }
        let pos = match fields[1].parse::<i64>() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("skipping malformed score row in {:?}: {:?}", source_path, line);
                continue;
            }
        };
        entries.push(ScoreEntry {
            chrom: normalize_chrom(fields[0]),
            pos,
            reference: fields[2].to_owned(),
            alt: fields[3].to_owned(),
            vpos: u64::from(vpos),
        });
    }

    entries.sort_by(|a, b| entry_key(a).cmp(&entry_key(b)));
    Ok(entries)
}

fn load_score_index(index_path: &Path) -> Result<Vec<ScoreEntry>, anyhow::Error> {
    let mut file = File::open(index_path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let parsed: ScoreIndexFile = serde_json::from_slice(&buf)
        .map_err(|e| anyhow::anyhow!("could not parse score index {:?}: {}", index_path, e))?;
    if parsed.format_version != SCORE_INDEX_FORMAT_VERSION {
        anyhow::bail!(
            "score index {:?} has format version {}, expected {} -- delete it to rebuild",
            index_path,
            parsed.format_version,
            SCORE_INDEX_FORMAT_VERSION
        );
    }
    Ok(parsed.entries)
}

fn write_score_index(index_path: &Path, entries: &[ScoreEntry]) -> Result<(), anyhow::Error> {
    let file = ScoreIndexFile {
        format_version: SCORE_INDEX_FORMAT_VERSION,
        entries: entries.to_vec(),
    };
    let mut writer = std::io::BufWriter::new(File::create(index_path)?);
    serde_json::to_writer(&mut writer, &file)?;
    writer.flush()?;
    Ok(())
}

/// A single score/frequency source: one `noodles_bgzf` reader plus the
/// sidecar index that lets a lookup seek straight to the right line.
/// Not `Sync` -- the pipeline gives one instance to each classifier worker
/// (spec.md §4.E "one reader per worker is acceptable").
pub struct ScoreSource {
    reader: noodles_bgzf::Reader<File>,
    entries: Vec<ScoreEntry>,
}

impl ScoreSource {
    /// Open `path`, building (and persisting) the sidecar index if it
    /// doesn't exist yet.
    pub fn open(path: &str) -> Result<Self, anyhow::Error> {
        let index_path = sidecar_path(path);
        let entries = if index_path.exists() {
            load_score_index(&index_path)?
        } else {
            let built = build_score_index(path)?;
            write_score_index(&index_path, &built)?;
            built
        };
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("could not open score source {:?}: {}", path, e))?;
        Ok(Self {
            reader: noodles_bgzf::Reader::new(file),
            entries,
        })
    }

    /// Look up a single `(chrom, pos, ref, alt)` value. A miss returns
    /// `Ok(None)`, never an error (spec.md §4.E "a lookup miss is not an
    /// error"); only I/O failure on an otherwise-present entry is an error.
    pub fn lookup(&mut self, chrom: &str, pos: i64, reference: &str, alt: &str) -> Result<Option<f64>, anyhow::Error> {
        let chrom = normalize_chrom(chrom);
        let key = (chrom.as_str(), pos, reference, alt);
        let idx = match self.entries.binary_search_by(|e| entry_key(e).cmp(&key)) {
            Ok(idx) => idx,
            Err(_) => return Ok(None),
        };
        let vpos = self.entries[idx].vpos;
        self.reader.seek(noodles_bgzf::VirtualPosition::from(vpos))?;
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        match fields.get(4).and_then(|v| v.parse::<f64>().ok()) {
            Some(v) => Ok(Some(v)),
            None => Ok(None),
        }
    }
}

/// The set of active optional annotation sources for one `annotate` run,
/// one `ScoreSource` per flag that was passed.
#[derive(Default)]
pub struct Lookups {
    pub cadd: Option<ScoreSource>,
    pub cadd_1000g: Option<ScoreSource>,
    pub thousand_g: Option<ScoreSource>,
}

impl Lookups {
    pub fn open(
        cadd_file: Option<&str>,
        cadd_1000g: Option<&str>,
        thousand_g: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            cadd: cadd_file.map(ScoreSource::open).transpose()?,
            cadd_1000g: cadd_1000g.map(ScoreSource::open).transpose()?,
            thousand_g: thousand_g.map(ScoreSource::open).transpose()?,
        })
    }

    /// Annotate `variant` in place with `CADD` and `1000G_freq`, tolerating
    /// transient I/O failures per source by simply omitting that
    /// annotation (spec.md §7).
    pub fn annotate(&mut self, variant: &mut crate::variant::Variant) {
        let chrom = variant.chrom.clone();
        let pos = variant.pos;
        let reference = variant.reference.clone();
        let alt = variant.alt.clone();

        let cadd_value = self
            .cadd
            .as_mut()
            .and_then(|s| s.lookup(&chrom, pos, &reference, &alt).ok().flatten())
            .or_else(|| {
                self.cadd_1000g
                    .as_mut()
                    .and_then(|s| s.lookup(&chrom, pos, &reference, &alt).ok().flatten())
            });
        if let Some(v) = cadd_value {
            variant.set_info("CADD", format!("{v}"));
        }

        if let Some(source) = self.thousand_g.as_mut() {
            if let Some(v) = source.lookup(&chrom, pos, &reference, &alt).ok().flatten() {
                variant.set_info("1000G_freq", format!("{v}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_key_orders_by_chrom_then_pos_then_alleles() {
        let a = ScoreEntry {
            chrom: "1".to_owned(),
            pos: 100,
            reference: "A".to_owned(),
            alt: "T".to_owned(),
            vpos: 0,
        };
        let b = ScoreEntry {
            chrom: "1".to_owned(),
            pos: 200,
            reference: "A".to_owned(),
            alt: "T".to_owned(),
            vpos: 10,
        };
        assert!(entry_key(&a) < entry_key(&b));
    }
}
