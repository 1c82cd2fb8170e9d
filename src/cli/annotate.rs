//! Arguments for the `annotate` subcommand (spec.md §6).

use std::io::Write;

use crate::annotation::index::IntervalIndex;
use crate::err::AppError;
use crate::family::{self, FamilyType};
use crate::pipeline::{self, RunConfig};
use crate::variant::Reader;

#[derive(Debug, clap::Parser)]
pub struct Args {
    /// Pedigree file describing the family to classify against.
    pub pedigree_file: String,

    /// Variant file to annotate.
    pub variant_file: String,

    /// Directory previously populated by `build-annotation`, containing
    /// `genes` and `exons` index blobs.
    #[arg(long, default_value = "annotations")]
    pub annotation_dir: String,

    /// Where to write the annotated, sorted output.
    #[arg(long, short = 'o')]
    pub outfile: Option<String>,

    /// Dialect of `pedigree_file`.
    #[arg(long, value_enum, default_value = "ped")]
    pub family_type: FamilyType,

    /// Skip classification and write only the augmented header (spec.md §6
    /// "silent mode").
    #[arg(long)]
    pub silent: bool,

    /// Treat each variant as overlapping its full containing gene, not just
    /// its exons, when considering it for compound-heterozygous search.
    #[arg(long)]
    pub whole_gene: bool,

    /// Use genotype phasing, where present, to confirm or rule out
    /// compound-heterozygous parent-of-origin assignments.
    #[arg(long)]
    pub phased: bool,

    /// Input already carries VEP-style annotation; skip gene/exon `ANN`
    /// tagging.
    #[arg(long)]
    pub vep: bool,

    /// Block-compressed CADD score file.
    #[arg(long)]
    pub cadd_file: Option<String>,

    /// Block-compressed CADD-from-1000G score file, used as a fallback when
    /// `--cadd-file` has no entry for a variant.
    #[arg(long)]
    pub cadd_1000g: Option<String>,

    /// Block-compressed 1000 Genomes frequency file.
    #[arg(long)]
    pub thousand_g: Option<String>,

    /// Number of classifier worker threads. Defaults to `max(1, cpus * 2 - 1)`.
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Run the `annotate` subcommand.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), AppError> {
    let _ = args_common;

    let genes_path = format!("{}/genes", args.annotation_dir);
    let exons_path = format!("{}/exons", args.annotation_dir);
    if !std::path::Path::new(&genes_path).exists() || !std::path::Path::new(&exons_path).exists() {
        return Err(AppError::MissingIndex(format!(
            "{:?} has no genes/exons index; run build-annotation first",
            args.annotation_dir
        )));
    }
    let index = IntervalIndex::load(&genes_path, &exons_path).map_err(AppError::Other)?;

    let family = family::load_single_family(&args.pedigree_file, args.family_type)
        .map_err(|e| AppError::Usage(e.to_string()))?;

    let reader_inner = crate::common::io::open_read_maybe_gz(&args.variant_file)
        .map_err(|e| AppError::Usage(e.to_string()))?;
    let reader = Reader::new(reader_inner).map_err(|e| AppError::Usage(e.to_string()))?;

    let config = RunConfig {
        whole_gene: args.whole_gene,
        phased: args.phased,
        silent: args.silent,
        vep: args.vep,
        cadd_file: args.cadd_file.clone(),
        cadd_1000g: args.cadd_1000g.clone(),
        thousand_g: args.thousand_g.clone(),
        workers: args.workers,
    };

    let mut out: Box<dyn Write> = match &args.outfile {
        Some(path) => crate::common::io::open_write_maybe_gz(path).map_err(AppError::Other)?,
        None => Box::new(std::io::stdout().lock()),
    };

    pipeline::run(family, index, reader, config, &mut out).map_err(AppError::Other)
}
