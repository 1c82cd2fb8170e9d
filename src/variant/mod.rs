//! Reading and writing the tab-separated variant file format described in
//! spec.md §6: a `#`-prefixed metadata/header section, a `#CHROM`-prefixed
//! column header line naming the sample columns, and one data row per
//! variant with `KEY=VAL;`-style `INFO` annotations — the same convention
//! VCF uses, without committing to full VCF/BCF compliance.

use std::io::{BufRead, Write};

use indexmap::IndexMap;

use crate::common::Genotype;

/// The fixed, non-sample columns that precede `FORMAT` in a data row.
const FIXED_COLUMNS: usize = 9;

/// Parsed header: everything needed to re-emit an augmented header and to
/// know which trailing columns are sample genotype columns.
#[derive(Clone, Debug, Default)]
pub struct Header {
    /// Metadata lines (`##...` or other `#`-prefixed lines preceding the
    /// column header), preserved verbatim and in order.
    pub meta_lines: Vec<String>,
    /// Sample names, in file column order.
    pub samples: Vec<String>,
}

impl Header {
    /// Individual ids present in the variant file (its sample columns).
    pub fn individual_ids(&self) -> std::collections::HashSet<String> {
        self.samples.iter().cloned().collect()
    }

    /// Append the descriptor lines this tool contributes (spec.md §6):
    /// `ANN`, `Comp`, `GM`, `MS`, and conditionally `CADD` (shared by
    /// `--cadd-file` and its `--cadd-1000g` fallback) and `1000G_freq`.
    pub fn augmented_meta_lines(&self, opts: &HeaderAnnotationOptions) -> Vec<String> {
        let mut lines = self.meta_lines.clone();
        if !opts.vep {
            lines.push(
                "##INFO=<ID=ANN,Number=.,Type=String,Description=\"Comma-separated list of genes/features this variant overlaps.\">"
                    .to_owned(),
            );
        }
        lines.push(
            "##INFO=<ID=Comp,Number=.,Type=String,Description=\"':'-separated list of compound heterozygous partner variant keys.\">"
                .to_owned(),
        );
        lines.push(
            "##INFO=<ID=GM,Number=.,Type=String,Description=\"':'-separated list of genetic inheritance models this variant is consistent with.\">"
                .to_owned(),
        );
        lines.push(
            "##INFO=<ID=MS,Number=1,Type=Integer,Description=\"PHRED-scaled score for the genetic inheritance model call.\">"
                .to_owned(),
        );
        if opts.cadd_file || opts.cadd_1000g {
            lines.push(
                "##INFO=<ID=CADD,Number=1,Type=Float,Description=\"CADD relative score for this alternative.\">"
                    .to_owned(),
            );
        }
        if opts.thousand_g {
            lines.push(
                "##INFO=<ID=1000G_freq,Number=1,Type=Float,Description=\"Frequency in the 1000 Genomes database.\">"
                    .to_owned(),
            );
        }
        lines
    }

    fn column_header_line(&self) -> String {
        let mut fields = vec![
            "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
        fields.extend(self.samples.iter().cloned());
        fields.join("\t")
    }

    /// Write the complete augmented header (metadata + column header) to `w`.
    pub fn write_augmented<W: Write>(
        &self,
        w: &mut W,
        opts: &HeaderAnnotationOptions,
    ) -> std::io::Result<()> {
        for line in self.augmented_meta_lines(opts) {
            writeln!(w, "{line}")?;
        }
        writeln!(w, "{}", self.column_header_line())
    }
}

/// Which optional annotation sources are active, controlling which extra
/// header/INFO lines get emitted (spec.md §9 "supplemented features").
#[derive(Copy, Clone, Debug, Default)]
pub struct HeaderAnnotationOptions {
    pub vep: bool,
    pub cadd_file: bool,
    pub cadd_1000g: bool,
    pub thousand_g: bool,
}

/// A single variant record.
///
/// `info` holds the original `KEY=VAL`/flag pairs in file order; inheritance
/// annotations are added to it directly by the classifier so that, per
/// spec.md §3, mutations made through any of a variant's batch references
/// are visible everywhere.
#[derive(Clone, Debug)]
pub struct Variant {
    pub chrom: String,
    pub pos: i64,
    pub id: String,
    pub reference: String,
    pub alt: String,
    pub qual: String,
    pub filter: String,
    pub info: IndexMap<String, Option<String>>,
    pub genotypes: IndexMap<String, Genotype>,
    /// Raw `GT`-adjacent per-sample field strings, preserved for lossless
    /// re-emission (e.g. `DP`, `GQ`), keyed by sample name.
    pub(crate) sample_raw: IndexMap<String, String>,
    pub(crate) format_keys: Vec<String>,
}

impl Variant {
    /// The canonical `chrom_pos_alt_ref` key (spec.md §3), in exactly that
    /// field order.
    pub fn variant_key(&self) -> String {
        format!("{}_{}_{}_{}", self.chrom, self.pos, self.alt, self.reference)
    }

    /// Insert or overwrite an `INFO` value (`key=value`).
    pub fn set_info(&mut self, key: &str, value: impl Into<String>) {
        self.info.insert(key.to_owned(), Some(value.into()));
    }

    /// Render the row's `INFO` column from `self.info`.
    fn info_column(&self) -> String {
        if self.info.is_empty() {
            return ".".to_owned();
        }
        self.info
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v}"),
                None => k.clone(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Re-render the full tab-separated data row.
    pub fn to_row(&self, samples: &[String]) -> String {
        let mut fields = vec![
            self.chrom.clone(),
            self.pos.to_string(),
            self.id.clone(),
            self.reference.clone(),
            self.alt.clone(),
            self.qual.clone(),
            self.filter.clone(),
            self.info_column(),
            self.format_keys.join(":"),
        ];
        for sample in samples {
            fields.push(
                self.sample_raw
                    .get(sample)
                    .cloned()
                    .unwrap_or_else(|| ".".to_owned()),
            );
        }
        fields.join("\t")
    }
}

fn parse_info(raw: &str) -> IndexMap<String, Option<String>> {
    let mut map = IndexMap::new();
    if raw == "." || raw.is_empty() {
        return map;
    }
    for entry in raw.split(';') {
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((k, v)) => {
                map.insert(k.to_owned(), Some(v.to_owned()));
            }
            None => {
                map.insert(entry.to_owned(), None);
            }
        }
    }
    map
}

/// Parse one data row into a `Variant`, given the already-parsed `Header`.
fn parse_row(line: &str, header: &Header) -> Result<Variant, anyhow::Error> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < FIXED_COLUMNS {
        anyhow::bail!(
            "row has {} fields, need at least {}: {:?}",
            fields.len(),
            FIXED_COLUMNS,
            line
        );
    }

    let format_keys: Vec<String> = fields[8].split(':').map(str::to_owned).collect();
    let gt_idx = format_keys.iter().position(|k| k == "GT");

    let mut genotypes = IndexMap::new();
    let mut sample_raw = IndexMap::new();
    for (i, sample) in header.samples.iter().enumerate() {
        let raw = fields
            .get(FIXED_COLUMNS + i)
            .copied()
            .unwrap_or(".")
            .to_owned();
        let gt_str = match gt_idx {
            Some(idx) => raw.split(':').nth(idx).unwrap_or("."),
            None => ".",
        };
        genotypes.insert(sample.clone(), gt_str.parse::<Genotype>().unwrap_or(Genotype::Missing));
        sample_raw.insert(sample.clone(), raw);
    }

    Ok(Variant {
        chrom: fields[0].to_owned(),
        pos: fields[1]
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid POS {:?}: {}", fields[1], e))?,
        id: fields[2].to_owned(),
        reference: fields[3].to_owned(),
        alt: fields[4].to_owned(),
        qual: fields[5].to_owned(),
        filter: fields[6].to_owned(),
        info: parse_info(fields[7]),
        genotypes,
        sample_raw,
        format_keys,
    })
}

/// Streaming reader over a variant file: parses the header once, then
/// yields one `Variant` (or a per-row parse error that the caller should
/// log and skip, per spec.md §7) at a time, in input order.
pub struct Reader<R: BufRead> {
    lines: std::io::Lines<R>,
    pub header: Header,
}

impl<R: BufRead> Reader<R> {
    pub fn new(mut reader: R) -> Result<Self, anyhow::Error> {
        let mut meta_lines = Vec::new();
        let mut samples = Vec::new();
        loop {
            let mut buf = String::new();
            let read = std::io::BufRead::read_line(&mut reader, &mut buf)?;
            if read == 0 {
                anyhow::bail!("variant file ended before a #CHROM header line was found");
            }
            let line = buf.trim_end_matches(['\n', '\r']);
            if line.starts_with("#CHROM") {
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() > FIXED_COLUMNS {
                    samples = fields[FIXED_COLUMNS..].iter().map(|s| s.to_string()).collect();
                }
                break;
            } else if line.starts_with('#') {
                meta_lines.push(line.to_owned());
            } else {
                anyhow::bail!("expected '#'-prefixed header section, got: {:?}", line);
            }
        }

        Ok(Self {
            lines: reader.lines(),
            header: Header {
                meta_lines,
                samples,
            },
        })
    }
}

impl<R: BufRead> Iterator for Reader<R> {
    type Item = std::io::Result<Result<Variant, anyhow::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if line.is_empty() {
                continue;
            }
            return Some(Ok(parse_row(&line, &self.header)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> &'static str {
        "##source=test\n\
         #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t1\t2\t3\n\
         1\t5\t.\tC\tA\t.\tPASS\t.\tGT\t1/1\t0/1\t0/1\n\
         1\t7\t.\tT\tG\t.\tPASS\t.\tGT\t1/1\t0/1\t0/0\n"
    }

    #[test]
    fn parses_header_and_rows() {
        let reader = Reader::new(std::io::BufReader::new(sample_text().as_bytes())).unwrap();
        assert_eq!(vec!["1", "2", "3"], reader.header.samples);
        assert_eq!(vec!["##source=test".to_owned()], reader.header.meta_lines);

        let variants: Vec<Variant> = reader.map(|r| r.unwrap().unwrap()).collect();
        assert_eq!(2, variants.len());
        assert_eq!(Genotype::HomAlt, variants[0].genotypes["1"]);
        assert_eq!(Genotype::Het, variants[0].genotypes["2"]);
        assert_eq!("1_5_A_C", variants[0].variant_key());
    }

    #[test]
    fn round_trips_info_additions() {
        let reader = Reader::new(std::io::BufReader::new(sample_text().as_bytes())).unwrap();
        let samples = reader.header.samples.clone();
        let mut variants: Vec<Variant> = reader.map(|r| r.unwrap().unwrap()).collect();
        variants[0].set_info("GM", "AR_hom");
        let row = variants[0].to_row(&samples);
        assert!(row.contains("GM=AR_hom"));
        assert!(row.starts_with("1\t5\t.\tC\tA"));
    }
}
