//! Inheritance-model classifier (spec.md §4.D) -- the hardest part.
//!
//! For a gene batch and the active family, decides per variant which
//! inheritance models hold, runs the pairwise compound-heterozygous
//! search, and derives the `GM`/`MS`/`Comp` annotations. Grounded on the
//! teacher's `seqvars::query::interpreter` family of pure, side-effect-free
//! predicate evaluators (one function per model, composed by a driver),
//! and on `examples/original_source`'s `genmod` model checkers for the
//! exact AR/AD/compound semantics.

use std::collections::HashSet;

use itertools::Itertools;

use crate::annotation::batcher::Batch;
use crate::common::{ChromKind, Genotype};
use crate::family::{Family, Phenotype};
use crate::variant::Variant;

/// The nine recognized inheritance models (spec.md §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, enum_map::Enum, strum_macros::Display, strum_macros::EnumIter)]
pub enum Model {
    #[strum(serialize = "AR_hom")]
    ArHom,
    #[strum(serialize = "AR_hom_denovo")]
    ArHomDenovo,
    #[strum(serialize = "AD")]
    Ad,
    #[strum(serialize = "AD_denovo")]
    AdDenovo,
    #[strum(serialize = "AR_compound")]
    ArCompound,
    #[strum(serialize = "XR")]
    Xr,
    #[strum(serialize = "XR_denovo")]
    XrDenovo,
    #[strum(serialize = "XD")]
    Xd,
    #[strum(serialize = "XD_denovo")]
    XdDenovo,
}

/// Options that affect classification but aren't part of the family or
/// batch themselves.
#[derive(Copy, Clone, Debug, Default)]
pub struct ClassifyOptions {
    /// Trust genotype phase (`|`-separated `GT`) when assigning parental
    /// origin in the compound-het search.
    pub phased: bool,
}

fn is_affected(family: &Family, ind_id: &str) -> bool {
    family
        .individuals
        .get(ind_id)
        .map(|ind| ind.phenotype == Phenotype::Affected)
        .unwrap_or(false)
}

fn is_unaffected(family: &Family, ind_id: &str) -> bool {
    family
        .individuals
        .get(ind_id)
        .map(|ind| ind.phenotype == Phenotype::Unaffected)
        .unwrap_or(false)
}

/// A male's hemizygous call on the sex chromosome: a raw het call there is
/// not biologically possible under normal diploid calling conventions, so it
/// is coerced to hom_alt (an alt allele is present) for model evaluation.
/// Autosomal calls are never coerced.
fn hemizygous_coerce(family: &Family, ind_id: &str, gt: Genotype, chrom_kind: ChromKind) -> Genotype {
    let is_male = family
        .individuals
        .get(ind_id)
        .map(|ind| ind.sex == crate::family::Sex::Male)
        .unwrap_or(false);
    if is_male && chrom_kind == ChromKind::X && gt == Genotype::Het {
        Genotype::HomAlt
    } else {
        gt
    }
}

fn genotype_of(variant: &Variant, ind_id: &str) -> Genotype {
    variant
        .genotypes
        .get(ind_id)
        .copied()
        .unwrap_or(Genotype::Missing)
}

/// `AR_hom`/`AR_hom_denovo` and their `X`-restricted counterparts: every
/// affected individual is hom_alt (hemizygous-coerced on sex chroms), no
/// unaffected individual is hom_alt, and at least one affected individual is
/// informative.
///
/// A present `hom_ref` parent cannot have transmitted the alt allele, so it
/// counts as de-novo evidence rather than as a plain-recessive carrier; a
/// missing parent is permissive and is compatible with both readings. A
/// present `hom_alt` parent is incompatible with this model altogether.
fn recessive_holds(family: &Family, variant: &Variant) -> (bool, bool, usize) {
    let chrom_kind = ChromKind::of(&variant.chrom);
    let mut informative = 0usize;
    let mut any_denovo = false;
    let mut plain_holds = false;

    for ind in family.individuals.values() {
        if !is_affected(family, &ind.ind_id) {
            continue;
        }
        let gt = hemizygous_coerce(family, &ind.ind_id, genotype_of(variant, &ind.ind_id), chrom_kind);
        if gt != Genotype::HomAlt {
            continue; // not informative for this model in this individual
        }

        let father_gt = ind
            .father_id
            .as_deref()
            .map(|f| genotype_of(variant, f));
        let mother_gt = ind
            .mother_id
            .as_deref()
            .map(|m| genotype_of(variant, m));

        if matches!(father_gt, Some(Genotype::HomAlt)) || matches!(mother_gt, Some(Genotype::HomAlt)) {
            continue;
        }

        let is_missing = |gt: Option<Genotype>| matches!(gt, None | Some(Genotype::Missing));
        let is_homref = |gt: Option<Genotype>| matches!(gt, Some(Genotype::HomRef));
        let any_homref = is_homref(father_gt) || is_homref(mother_gt);
        let any_missing = is_missing(father_gt) || is_missing(mother_gt);

        informative += 1;
        if !any_homref {
            plain_holds = true;
        }
        if any_homref || any_missing {
            any_denovo = true;
        }
    }

    if plain_holds || any_denovo {
        for ind in family.individuals.values() {
            if is_unaffected(family, &ind.ind_id) {
                let gt = hemizygous_coerce(family, &ind.ind_id, genotype_of(variant, &ind.ind_id), chrom_kind);
                if gt == Genotype::HomAlt {
                    return (false, false, 0);
                }
            }
        }
    }

    (plain_holds, any_denovo, informative)
}

/// `AD`/`AD_denovo` and their `X`-restricted counterparts: every affected
/// individual has an alt copy, no unaffected individual has one.
fn dominant_holds(family: &Family, variant: &Variant) -> (bool, bool, usize) {
    let chrom_kind = ChromKind::of(&variant.chrom);
    let mut informative = 0usize;
    let mut any_denovo = false;
    let mut holds = false;

    for ind in family.individuals.values() {
        if !is_affected(family, &ind.ind_id) {
            continue;
        }
        let gt = hemizygous_coerce(family, &ind.ind_id, genotype_of(variant, &ind.ind_id), chrom_kind);
        if !matches!(gt, Genotype::Het | Genotype::HomAlt) {
            continue;
        }
        informative += 1;
        holds = true;

        let father_gt = ind.father_id.as_deref().map(|f| genotype_of(variant, f));
        let mother_gt = ind.mother_id.as_deref().map(|m| genotype_of(variant, m));
        let parent_ref_or_missing = |gt: Option<Genotype>| {
            matches!(gt, None | Some(Genotype::HomRef) | Some(Genotype::Missing))
        };
        if parent_ref_or_missing(father_gt) && parent_ref_or_missing(mother_gt) {
            any_denovo = true;
        }
    }

    if holds {
        for ind in family.individuals.values() {
            if is_unaffected(family, &ind.ind_id) {
                let gt = hemizygous_coerce(family, &ind.ind_id, genotype_of(variant, &ind.ind_id), chrom_kind);
                if matches!(gt, Genotype::Het | Genotype::HomAlt) {
                    return (false, false, 0);
                }
            }
        }
    }

    (holds, any_denovo, informative)
}

/// The number of affected individuals total in `family` -- `K` in the `MS`
/// score formula (spec.md §4.D).
fn affected_count(family: &Family) -> usize {
    family.affected_ids().count()
}

/// Evaluate the autosomal or sex-restricted simple model family for one
/// variant, returning the set of models that hold plus the informative
/// count `k` to feed the `MS` score. A variant is either autosomal
/// (`AR_hom`/`AD`) or sex-linked (`XR`/`XD`), never both.
fn classify_simple_models(family: &Family, variant: &Variant) -> (HashSet<Model>, usize) {
    let mut flags = HashSet::new();
    let mut informative_max = 0usize;

    if ChromKind::of(&variant.chrom) == ChromKind::X {
        let (xr, xr_denovo, k1) = recessive_holds(family, variant);
        if xr {
            flags.insert(Model::Xr);
        }
        if xr_denovo {
            flags.insert(Model::XrDenovo);
        }
        informative_max = informative_max.max(k1);

        let (xd, xd_denovo, k2) = dominant_holds(family, variant);
        if xd {
            flags.insert(Model::Xd);
        }
        if xd_denovo {
            flags.insert(Model::XdDenovo);
        }
        informative_max = informative_max.max(k2);
    } else {
        let (hom, hom_denovo, k1) = recessive_holds(family, variant);
        if hom {
            flags.insert(Model::ArHom);
        }
        if hom_denovo {
            flags.insert(Model::ArHomDenovo);
        }
        informative_max = informative_max.max(k1);

        let (dom, dom_denovo, k2) = dominant_holds(family, variant);
        if dom {
            flags.insert(Model::Ad);
        }
        if dom_denovo {
            flags.insert(Model::AdDenovo);
        }
        informative_max = informative_max.max(k2);
    }

    (flags, informative_max)
}

/// `MS = round(-10 * log10(1 - min(1, k/K)))`, clamped to `[0, 255]`, `0`
/// when `k = 0` (spec.md §4.D, and DESIGN.md's Open Question decision).
fn ms_score(k: usize, affected_total: usize) -> i32 {
    if k == 0 || affected_total == 0 {
        return 0;
    }
    let ratio = (k as f64 / affected_total as f64).min(1.0);
    if ratio >= 1.0 {
        return 255;
    }
    let raw = -10.0 * (1.0 - ratio).log10();
    raw.round().clamp(0.0, 255.0) as i32
}

fn is_het_or_missing(gt: Genotype) -> bool {
    matches!(gt, Genotype::Het | Genotype::Missing)
}

fn phase_origin(raw_gt: &str) -> Option<crate::common::AlleleOrigin> {
    if !raw_gt.contains('|') {
        return None;
    }
    let gt_field = raw_gt.split(':').next().unwrap_or(raw_gt);
    let alleles: Vec<&str> = gt_field.split('|').collect();
    if alleles.len() != 2 {
        return None;
    }
    let (a0, a1) = (alleles[0], alleles[1]);
    let a0_is_ref = a0 == "0";
    let a1_is_ref = a1 == "0";
    match (a0_is_ref, a1_is_ref) {
        (true, false) => Some(crate::common::AlleleOrigin::Maternal),
        (false, true) => Some(crate::common::AlleleOrigin::Paternal),
        _ => None,
    }
}

/// Whether `v1`/`v2` pass the compound-het test for one affected
/// individual `a` (spec.md §4.D). Family-wide exclusion (no unaffected
/// individual het at both) is checked separately by the caller.
fn compound_holds_for_affected(
    family: &Family,
    a_id: &str,
    v1: &Variant,
    v2: &Variant,
    opts: ClassifyOptions,
) -> bool {
    let ind = match family.individuals.get(a_id) {
        Some(i) => i,
        None => return false,
    };
    if genotype_of(v1, a_id) != Genotype::Het || genotype_of(v2, a_id) != Genotype::Het {
        return false;
    }

    for parent_id in [&ind.father_id, &ind.mother_id] {
        let Some(parent_id) = parent_id else { continue };
        if !family.individuals.contains_key(parent_id) {
            continue;
        }
        let p1 = genotype_of(v1, parent_id);
        let p2 = genotype_of(v2, parent_id);
        let c = is_het_or_missing(p1) as u8 + is_het_or_missing(p2) as u8;
        if c != 1 {
            return false;
        }
    }

    if opts.phased {
        let raw1 = v1.sample_raw.get(a_id);
        let raw2 = v2.sample_raw.get(a_id);
        if let (Some(raw1), Some(raw2)) = (raw1, raw2) {
            if let (Some(o1), Some(o2)) = (phase_origin(raw1), phase_origin(raw2)) {
                if o1 == o2 {
                    return false;
                }
            }
        }
    }

    true
}

/// Classify every variant in `batch` against every recognized model,
/// mutating each `Variant`'s `GM`/`MS`/`Comp`/`ANN` info fields in place
/// (spec.md §4.D, §9 shared-registry design).
pub fn classify_batch(batch: &Batch, family: &Family, opts: ClassifyOptions) -> Result<(), anyhow::Error> {
    let affected_total = affected_count(family);

    // Simple per-variant models: independent of gene membership.
    let mut model_sets = std::collections::HashMap::new();
    let mut informative_counts = std::collections::HashMap::new();
    for (key, entry) in &batch.variants {
        let variant = entry.variant.lock().unwrap();
        let (models, k) = classify_simple_models(family, &variant);
        model_sets.insert(key.clone(), models);
        informative_counts.insert(key.clone(), k);
    }

    // Compound-het search: pairwise within each gene cluster.
    let mut compound_partners: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for (gene_id, keys) in &batch.gene_variant_keys {
        if gene_id.starts_with("unplaced:") {
            continue;
        }
        for (k1, k2) in keys.iter().tuple_combinations() {
            let entry1 = match batch.variants.get(k1) {
                Some(e) if e.compound_eligible => e,
                _ => continue,
            };
            let entry2 = match batch.variants.get(k2) {
                Some(e) if e.compound_eligible => e,
                _ => continue,
            };
            let v1 = entry1.variant.lock().unwrap();
            let v2 = entry2.variant.lock().unwrap();

            let any_unaffected_het_both = family.individuals.values().any(|ind| {
                ind.phenotype == Phenotype::Unaffected
                    && genotype_of(&v1, &ind.ind_id) == Genotype::Het
                    && genotype_of(&v2, &ind.ind_id) == Genotype::Het
            });
            if any_unaffected_het_both {
                continue;
            }

            let any_affected_supports = family
                .affected_ids()
                .map(|id| id.to_owned())
                .collect::<Vec<_>>()
                .iter()
                .any(|a_id| compound_holds_for_affected(family, a_id, &v1, &v2, opts));

            if any_affected_supports {
                compound_partners.entry(k1.clone()).or_default().push(k2.clone());
                compound_partners.entry(k2.clone()).or_default().push(k1.clone());
            }
        }
    }

    for (key, entry) in &batch.variants {
        let mut variant = entry.variant.lock().unwrap();
        let mut models = model_sets.remove(key).unwrap_or_default();
        let k = informative_counts.get(key).copied().unwrap_or(0);

        let partners = compound_partners.remove(key).unwrap_or_default();
        if !partners.is_empty() {
            models.insert(Model::ArCompound);
        }

        let mut gm: Vec<String> = models.iter().map(|m| m.to_string()).collect();
        gm.sort();
        variant.set_info("GM", gm.join(":"));
        if !partners.is_empty() {
            let mut uniq: Vec<String> = partners.into_iter().unique().collect();
            uniq.sort();
            variant.set_info("Comp", uniq.join(":"));
        }
        variant.set_info("MS", ms_score(k, affected_total).to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{Family, Individual, Phenotype, Sex};
    use indexmap::IndexMap;

    fn trio() -> Family {
        let mut individuals = IndexMap::new();
        individuals.insert(
            "1".to_owned(),
            Individual {
                ind_id: "1".to_owned(),
                family_id: "FAM".to_owned(),
                father_id: Some("2".to_owned()),
                mother_id: Some("3".to_owned()),
                sex: Sex::Male,
                phenotype: Phenotype::Affected,
            },
        );
        individuals.insert(
            "2".to_owned(),
            Individual {
                ind_id: "2".to_owned(),
                family_id: "FAM".to_owned(),
                father_id: None,
                mother_id: None,
                sex: Sex::Male,
                phenotype: Phenotype::Unaffected,
            },
        );
        individuals.insert(
            "3".to_owned(),
            Individual {
                ind_id: "3".to_owned(),
                family_id: "FAM".to_owned(),
                father_id: None,
                mother_id: None,
                sex: Sex::Female,
                phenotype: Phenotype::Unaffected,
            },
        );
        Family {
            family_id: "FAM".to_owned(),
            individuals,
        }
    }

    fn variant_with_gts(chrom: &str, pos: i64, reference: &str, alt: &str, gts: &[(&str, &str)]) -> Variant {
        let mut genotypes = IndexMap::new();
        for (id, gt) in gts {
            genotypes.insert((*id).to_owned(), gt.parse().unwrap());
        }
        Variant {
            chrom: chrom.to_owned(),
            pos,
            id: ".".to_owned(),
            reference: reference.to_owned(),
            alt: alt.to_owned(),
            qual: ".".to_owned(),
            filter: "PASS".to_owned(),
            info: IndexMap::new(),
            genotypes,
            sample_raw: IndexMap::new(),
            format_keys: vec!["GT".to_owned()],
        }
    }

    #[test]
    fn scenario_1_ar_hom() {
        let family = trio();
        let variant = variant_with_gts("1", 5, "C", "A", &[("1", "1/1"), ("2", "0/1"), ("3", "0/1")]);
        let (models, _) = classify_simple_models(&family, &variant);
        assert!(models.contains(&Model::ArHom));
        assert!(!models.contains(&Model::ArHomDenovo));
        assert!(!models.contains(&Model::Ad));
    }

    #[test]
    fn scenario_2_ar_hom_denovo_only() {
        let family = trio();
        let variant = variant_with_gts("1", 7, "T", "G", &[("1", "1/1"), ("2", "0/1"), ("3", "0/0")]);
        let (models, _) = classify_simple_models(&family, &variant);
        assert!(models.contains(&Model::ArHomDenovo));
        assert!(!models.contains(&Model::ArHom));
    }

    #[test]
    fn scenario_3_ar_hom_and_denovo_with_missing_parent() {
        let family = trio();
        let variant = variant_with_gts("1", 10, "T", "C", &[("1", "1/1"), ("2", "./."), ("3", "0/1")]);
        let (models, _) = classify_simple_models(&family, &variant);
        assert!(models.contains(&Model::ArHom));
        assert!(models.contains(&Model::ArHomDenovo));
    }

    #[test]
    fn scenario_4_all_false() {
        let family = trio();
        let variant = variant_with_gts("1", 15, "T", "C", &[("1", "0/1"), ("2", "0/1"), ("3", "./.")]);
        let (models, _) = classify_simple_models(&family, &variant);
        assert!(models.is_empty());
    }

    #[test]
    fn scenario_5_compound_het_included() {
        let family = trio();
        let v1 = variant_with_gts("1", 100, "A", "T", &[("1", "0/1"), ("2", "0/1"), ("3", "0/0")]);
        let v2 = variant_with_gts("1", 200, "C", "G", &[("1", "0/1"), ("2", "0/0"), ("3", "0/1")]);
        let opts = ClassifyOptions::default();
        assert!(compound_holds_for_affected(&family, "1", &v1, &v2, opts));
        let unaffected_excludes = family.individuals.values().any(|ind| {
            ind.phenotype == Phenotype::Unaffected
                && genotype_of(&v1, &ind.ind_id) == Genotype::Het
                && genotype_of(&v2, &ind.ind_id) == Genotype::Het
        });
        assert!(!unaffected_excludes);
    }

    #[test]
    fn scenario_6_compound_het_excluded_when_mother_het_on_both() {
        let family = trio();
        let v1 = variant_with_gts("1", 100, "A", "T", &[("1", "0/1"), ("2", "0/1"), ("3", "0/1")]);
        let v2 = variant_with_gts("1", 200, "C", "G", &[("1", "0/1"), ("2", "0/0"), ("3", "0/1")]);
        let unaffected_excludes = family.individuals.values().any(|ind| {
            ind.phenotype == Phenotype::Unaffected
                && genotype_of(&v1, &ind.ind_id) == Genotype::Het
                && genotype_of(&v2, &ind.ind_id) == Genotype::Het
        });
        assert!(unaffected_excludes);
    }

    #[test]
    fn x_chrom_variant_gets_only_sex_linked_flags() {
        let family = trio();
        let variant = variant_with_gts("X", 5, "C", "A", &[("1", "0/1"), ("2", "./."), ("3", "0/1")]);
        let (models, _) = classify_simple_models(&family, &variant);
        assert!(models.contains(&Model::Xr));
        assert!(!models.contains(&Model::ArHom));
        assert!(!models.contains(&Model::Ad));
    }

    #[test]
    fn autosomal_het_male_is_not_hemizygous_coerced() {
        let family = trio();
        let variant = variant_with_gts("1", 20, "T", "C", &[("1", "0/1"), ("2", "0/0"), ("3", "0/1")]);
        let (models, _) = classify_simple_models(&family, &variant);
        assert!(!models.contains(&Model::ArHom));
    }

    #[test]
    fn ms_score_edges() {
        assert_eq!(0, ms_score(0, 3));
        assert_eq!(255, ms_score(3, 3));
        assert!(ms_score(1, 2) > 0);
    }
}
