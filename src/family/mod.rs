//! Pedigree (family) file reading.
//!
//! The pedigree file is a tab-separated table, one row per individual, in
//! one of four dialects selected by `--family-type` (spec.md §6). All
//! dialects agree on the first six columns (family, individual, father,
//! mother, sex, phenotype); they differ in whether a header line is present
//! and whether sex/phenotype are coded numerically (as in standard `.ped`
//! files) or spelled out.

use std::collections::HashMap;
use std::io::BufRead;

use indexmap::IndexMap;

/// Selects the pedigree file dialect, matching the `--family-type` CLI flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum, strum_macros::Display)]
pub enum FamilyType {
    /// Standard 6-column PED file, no header, numeric sex/phenotype codes.
    #[strum(serialize = "ped")]
    Ped,
    /// Like `ped` but with `male`/`female`/`unknown` and
    /// `affected`/`unaffected`/`unknown` spelled out instead of numeric codes.
    #[strum(serialize = "alt")]
    Alt,
    /// CMMS in-house dialect: header line present, numeric codes, one or
    /// more trailing columns ignored.
    #[strum(serialize = "cmms")]
    Cmms,
    /// MIP pipeline dialect: header line present, numeric codes, one or
    /// more trailing columns ignored.
    #[strum(serialize = "mip")]
    Mip,
}

impl FamilyType {
    fn has_header(self) -> bool {
        matches!(self, FamilyType::Cmms | FamilyType::Mip)
    }
}

/// Biological sex of a pedigree individual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

/// Phenotype (affection) status of a pedigree individual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phenotype {
    Affected,
    Unaffected,
    Unknown,
}

/// A single pedigree member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Individual {
    pub ind_id: String,
    pub family_id: String,
    /// `None` denotes a founder (no recorded father).
    pub father_id: Option<String>,
    /// `None` denotes a founder (no recorded mother).
    pub mother_id: Option<String>,
    pub sex: Sex,
    pub phenotype: Phenotype,
}

impl Individual {
    pub fn is_founder(&self) -> bool {
        self.father_id.is_none() && self.mother_id.is_none()
    }
}

/// A family: a set of individuals sharing a `family_id`, keyed by `ind_id`.
#[derive(Clone, Debug, Default)]
pub struct Family {
    pub family_id: String,
    pub individuals: IndexMap<String, Individual>,
}

impl Family {
    pub fn affected_ids(&self) -> impl Iterator<Item = &str> {
        self.individuals
            .values()
            .filter(|ind| ind.phenotype == Phenotype::Affected)
            .map(|ind| ind.ind_id.as_str())
    }

    pub fn unaffected_ids(&self) -> impl Iterator<Item = &str> {
        self.individuals
            .values()
            .filter(|ind| ind.phenotype == Phenotype::Unaffected)
            .map(|ind| ind.ind_id.as_str())
    }

    /// Validate the invariants from spec.md §3: ids unique within the
    /// family (guaranteed by the map), and any non-zero parent id refers to
    /// another individual present in the same family.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for ind in self.individuals.values() {
            for parent in [&ind.father_id, &ind.mother_id] {
                if let Some(parent_id) = parent {
                    if !self.individuals.contains_key(parent_id) {
                        anyhow::bail!(
                            "individual {:?} references parent {:?} that is not part of family {:?}",
                            ind.ind_id,
                            parent_id,
                            self.family_id
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_id(raw: &str) -> Option<String> {
    if raw == "0" || raw.is_empty() {
        None
    } else {
        Some(raw.to_owned())
    }
}

fn parse_sex(dialect: FamilyType, raw: &str) -> Sex {
    match dialect {
        FamilyType::Alt => match raw.to_ascii_lowercase().as_str() {
            "male" => Sex::Male,
            "female" => Sex::Female,
            _ => Sex::Unknown,
        },
        _ => match raw {
            "1" => Sex::Male,
            "2" => Sex::Female,
            _ => Sex::Unknown,
        },
    }
}

fn parse_phenotype(dialect: FamilyType, raw: &str) -> Phenotype {
    match dialect {
        FamilyType::Alt => match raw.to_ascii_lowercase().as_str() {
            "affected" => Phenotype::Affected,
            "unaffected" => Phenotype::Unaffected,
            _ => Phenotype::Unknown,
        },
        _ => match raw {
            "2" => Phenotype::Affected,
            "1" => Phenotype::Unaffected,
            _ => Phenotype::Unknown,
        },
    }
}

/// Parse every family present in a pedigree file, keyed by `family_id`.
///
/// A pedigree file may in principle describe more than one family; the
/// `annotate` subcommand uses the single family present (spec.md only
/// considers the one-family case, matching upstream `genmod`).
pub fn parse_families(
    path: &str,
    dialect: FamilyType,
) -> Result<HashMap<String, Family>, anyhow::Error> {
    let reader = crate::common::io::open_read_maybe_gz(path)?;
    let mut families: HashMap<String, Family> = HashMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line_no == 0 && dialect.has_header() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 6 {
            tracing::warn!(
                "skipping malformed pedigree row {} ({} fields, need >= 6): {:?}",
                line_no + 1,
                fields.len(),
                line
            );
            continue;
        }

        let individual = Individual {
            family_id: fields[0].to_owned(),
            ind_id: fields[1].to_owned(),
            father_id: parse_id(fields[2]),
            mother_id: parse_id(fields[3]),
            sex: parse_sex(dialect, fields[4]),
            phenotype: parse_phenotype(dialect, fields[5]),
        };

        let family = families
            .entry(individual.family_id.clone())
            .or_insert_with(|| Family {
                family_id: individual.family_id.clone(),
                individuals: IndexMap::new(),
            });
        family
            .individuals
            .insert(individual.ind_id.clone(), individual);
    }

    for family in families.values() {
        family.validate()?;
    }

    Ok(families)
}

/// Load the single family from a pedigree file, as used by `annotate`.
///
/// Fails if the file contains no families or more than one.
pub fn load_single_family(path: &str, dialect: FamilyType) -> Result<Family, anyhow::Error> {
    let mut families = parse_families(path, dialect)?;
    match families.len() {
        0 => anyhow::bail!("pedigree file {:?} contains no individuals", path),
        1 => Ok(families.drain().next().unwrap().1),
        n => anyhow::bail!(
            "pedigree file {:?} contains {} families, expected exactly one",
            path,
            n
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ped(contents: &str) -> temp_testdir::TempDir {
        let dir = temp_testdir::TempDir::default();
        let path = dir.join("family.ped");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn parses_trio_ped() {
        let dir = write_ped(
            "FAM\t1\t2\t3\t1\t2\n\
             FAM\t2\t0\t0\t1\t1\n\
             FAM\t3\t0\t0\t2\t1\n",
        );
        let family =
            load_single_family(dir.join("family.ped").to_str().unwrap(), FamilyType::Ped).unwrap();

        assert_eq!(3, family.individuals.len());
        let son = &family.individuals["1"];
        assert_eq!(Phenotype::Affected, son.phenotype);
        assert_eq!(Some("2".to_owned()), son.father_id);
        assert!(family.individuals["2"].is_founder());
        assert_eq!(vec!["1"], family.affected_ids().collect::<Vec<_>>());
    }

    #[test]
    fn parses_alt_dialect_words() {
        let dir = write_ped(
            "FAM\t1\t2\t3\tmale\taffected\n\
             FAM\t2\t0\t0\tmale\tunaffected\n\
             FAM\t3\t0\t0\tfemale\tunaffected\n",
        );
        let family =
            load_single_family(dir.join("family.ped").to_str().unwrap(), FamilyType::Alt).unwrap();
        assert_eq!(Sex::Male, family.individuals["1"].sex);
        assert_eq!(Phenotype::Affected, family.individuals["1"].phenotype);
    }

    #[test]
    fn rejects_dangling_parent_reference() {
        let dir = write_ped("FAM\t1\t999\t0\t1\t2\n");
        let err = parse_families(dir.join("family.ped").to_str().unwrap(), FamilyType::Ped)
            .unwrap_err();
        assert!(err.to_string().contains("999"));
    }
}
