//! Common functionality shared across subcommands.

use indexmap::IndexMap;

pub mod io;

/// Commonly used command line arguments.
#[derive(clap::Parser, Debug, Clone)]
pub struct Args {
    /// Verbosity of the program.
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: clap_verbosity_flag::Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    if let Ok(me) = procfs::process::Process::myself() {
        let page_size = procfs::page_size();
        if let Ok(stat) = me.stat() {
            tracing::debug!(
                "RSS now: {}",
                byte_unit::Byte::from_bytes((stat.rss * page_size) as u128)
                    .get_appropriate_unit(true)
            );
        }
    }
}

/// Canonical autosome + sex + mito chromosome names, in emission order.
pub const CHROMS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "M",
];

/// Build a lookup from every spelling we accept for a chromosome name (with/without
/// `chr` prefix, mixed case for X/Y/M) to its rank in [`CHROMS`].
pub fn build_chrom_rank() -> IndexMap<String, usize> {
    let mut result = IndexMap::new();
    for (rank, &name) in CHROMS.iter().enumerate() {
        result.insert(name.to_owned(), rank);
        result.insert(format!("chr{name}"), rank);
    }
    for (alias, rank) in [
        ("x", 22),
        ("y", 23),
        ("chrx", 22),
        ("chry", 23),
        ("mt", 24),
        ("m", 24),
        ("chrmt", 24),
        ("chrm", 24),
        ("MT", 24),
        ("chrMT", 24),
    ] {
        result.insert(alias.to_owned(), rank);
    }
    result
}

/// Normalize a chromosome name to its canonical (no-`chr`) spelling. Unknown
/// chromosomes pass through unchanged.
pub fn normalize_chrom(chrom: &str) -> String {
    let stripped = chrom.strip_prefix("chr").unwrap_or(chrom);
    match stripped {
        "x" | "X" => "X".to_owned(),
        "y" | "Y" => "Y".to_owned(),
        "m" | "M" | "mt" | "MT" | "Mt" => "M".to_owned(),
        other => other.to_owned(),
    }
}

/// The sex-chromosome category relevant to hemizygosity handling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChromKind {
    Autosome,
    X,
    Y,
}

impl ChromKind {
    pub fn of(chrom: &str) -> Self {
        match normalize_chrom(chrom).as_str() {
            "X" => ChromKind::X,
            "Y" => ChromKind::Y,
            _ => ChromKind::Autosome,
        }
    }
}

/// Genotype call for a single individual at a single variant.
///
/// Mirrors the upstream `genmod` genotype vocabulary (hom. ref / het / hom. alt /
/// missing) with an attached, optional parent-of-origin hint used only when the
/// input was parsed with `--phased`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Genotype {
    HomRef,
    Het,
    HomAlt,
    Missing,
}

impl Genotype {
    pub fn is_missing(self) -> bool {
        matches!(self, Genotype::Missing)
    }

    pub fn has_alt(self) -> bool {
        matches!(self, Genotype::Het | Genotype::HomAlt)
    }
}

impl std::str::FromStr for Genotype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "0/0" | "0|0" | "0" => Genotype::HomRef,
            "0/1" | "1/0" | "0|1" | "1|0" => Genotype::Het,
            "1/1" | "1|1" | "1" => Genotype::HomAlt,
            "./." | "./0" | "0/." | "./1" | "1/." | "." | "" => Genotype::Missing,
            other => anyhow::bail!("invalid genotype value: {:?}", other),
        })
    }
}

/// Parent-of-origin hint for a single allele call, only meaningful when the
/// genotype is heterozygous and the caller provided phase information.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AlleleOrigin {
    Paternal,
    Maternal,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genotype_from_str() {
        assert_eq!(Genotype::HomRef, "0/0".parse().unwrap());
        assert_eq!(Genotype::Het, "0/1".parse().unwrap());
        assert_eq!(Genotype::Het, "1|0".parse().unwrap());
        assert_eq!(Genotype::HomAlt, "1/1".parse().unwrap());
        assert_eq!(Genotype::Missing, "./.".parse().unwrap());
        assert!("2/2".parse::<Genotype>().is_err());
    }

    #[test]
    fn normalize_chrom_variants() {
        assert_eq!("X", normalize_chrom("chrX"));
        assert_eq!("X", normalize_chrom("x"));
        assert_eq!("1", normalize_chrom("chr1"));
        assert_eq!("M", normalize_chrom("MT"));
    }

    #[test]
    fn chrom_kind_of() {
        assert_eq!(ChromKind::X, ChromKind::of("chrX"));
        assert_eq!(ChromKind::Y, ChromKind::of("Y"));
        assert_eq!(ChromKind::Autosome, ChromKind::of("12"));
    }
}
