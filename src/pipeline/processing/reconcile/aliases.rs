use std::collections::{BTreeMap, BTreeSet};

use crate::constants;
use crate::domain::IndexField;

/// Canonical destination of a source column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalColumn {
    EntityKey,
    Phase,
    Age,
    Gender,
    EnrollmentYear,
    Institution,
    Stone,
    TargetLag,
    Index(IndexField),
}

impl CanonicalColumn {
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalColumn::EntityKey => constants::ENTITY_ID,
            CanonicalColumn::Phase => constants::PHASE,
            CanonicalColumn::Age => constants::AGE,
            CanonicalColumn::Gender => constants::GENDER,
            CanonicalColumn::EnrollmentYear => constants::ENROLLMENT_YEAR,
            CanonicalColumn::Institution => constants::INSTITUTION,
            CanonicalColumn::Stone => constants::STONE,
            CanonicalColumn::TargetLag => constants::TARGET_LAG,
            CanonicalColumn::Index(index) => index.as_str(),
        }
    }
}

/// How the candidate source names of a canonical column are generated
#[derive(Debug, Clone)]
enum AliasRule {
    /// Fixed names, first present wins
    Exact(Vec<String>),
    /// `<base>_<yyyy>`, `<base>_<yy>`, `<base>` for the declared year
    Temporal(String),
}

/// Year-aware mapping from standardized source column names to canonical fields
#[derive(Debug, Clone)]
pub struct AliasTable {
    rules: Vec<(CanonicalColumn, AliasRule)>,
}

/// Result of matching one batch's columns against the table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    /// canonical column -> the source column chosen for it
    pub selected: BTreeMap<CanonicalColumn, String>,
    /// Variants of a temporal field that belong to another year (`pedra_20` in a 2023 export)
    pub superseded: Vec<String>,
    /// Columns nothing claimed
    pub unmapped: Vec<String>,
}

impl ColumnMapping {
    pub fn source_for(&self, column: CanonicalColumn) -> Option<&str> {
        self.selected.get(&column).map(|s| s.as_str())
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasTable {
    /// Table covering every known export layout
    pub fn new() -> Self {
        let exact = |names: &[&str]| AliasRule::Exact(names.iter().map(|s| s.to_string()).collect());
        let mut rules = vec![
            (CanonicalColumn::EntityKey, exact(&[constants::SRC_ENTITY_KEY])),
            (CanonicalColumn::Phase, exact(&[constants::SRC_PHASE])),
            (CanonicalColumn::Gender, exact(&[constants::SRC_GENDER])),
            (CanonicalColumn::EnrollmentYear, exact(&[constants::SRC_ENROLLMENT_YEAR])),
            (CanonicalColumn::Institution, exact(constants::SRC_INSTITUTION)),
            (CanonicalColumn::TargetLag, exact(constants::SRC_TARGET_LAG)),
            (CanonicalColumn::Age, AliasRule::Temporal(constants::SRC_AGE.to_string())),
            (CanonicalColumn::Stone, AliasRule::Temporal(constants::SRC_STONE.to_string())),
            (
                CanonicalColumn::Index(IndexField::Inde),
                AliasRule::Temporal(constants::SRC_INDE.to_string()),
            ),
        ];

        // Component indicators keep their acronym in every export
        for index in IndexField::ALL.into_iter().filter(|f| *f != IndexField::Inde) {
            rules.push((CanonicalColumn::Index(index), exact(&[index.as_str()])));
        }

        Self { rules }
    }

    /// Add an extra source name for a canonical column, tried after the built-in ones
    pub fn register(&mut self, column: CanonicalColumn, source_name: &str) {
        self.rules
            .push((column, AliasRule::Exact(vec![source_name.to_string()])));
    }

    /// Candidate source names for one column in priority order
    pub fn candidates(&self, column: CanonicalColumn, year: i32) -> Vec<String> {
        self.rules
            .iter()
            .filter(|(c, _)| *c == column)
            .flat_map(|(_, rule)| match rule {
                AliasRule::Exact(names) => names.clone(),
                AliasRule::Temporal(base) => temporal_candidates(base, year),
            })
            .collect()
    }

    /// Choose a source column for each canonical column present in `columns`
    pub fn resolve(&self, columns: &BTreeSet<String>, year: i32) -> ColumnMapping {
        let mut mapping = ColumnMapping::default();

        for (column, _) in &self.rules {
            if mapping.selected.contains_key(column) {
                continue;
            }
            if let Some(found) = self
                .candidates(*column, year)
                .into_iter()
                .find(|candidate| columns.contains(candidate))
            {
                mapping.selected.insert(*column, found);
            }
        }

        let claimed: BTreeSet<&str> = mapping.selected.values().map(|s| s.as_str()).collect();
        for name in columns {
            if claimed.contains(name.as_str()) {
                continue;
            }
            if self.is_temporal_variant(name) {
                mapping.superseded.push(name.clone());
            } else {
                mapping.unmapped.push(name.clone());
            }
        }

        mapping
    }

    fn is_temporal_variant(&self, name: &str) -> bool {
        self.rules.iter().any(|(_, rule)| match rule {
            AliasRule::Temporal(base) => name
                .strip_prefix(base.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|suffix| {
                    (suffix.len() == 2 || suffix.len() == 4)
                        && suffix.chars().all(|c| c.is_ascii_digit())
                })
                .unwrap_or(false),
            AliasRule::Exact(_) => false,
        })
    }
}

fn temporal_candidates(base: &str, year: i32) -> Vec<String> {
    let full = year.to_string();
    let short = format!("{:02}", year.rem_euclid(100));
    vec![format!("{base}_{full}"), format!("{base}_{short}"), base.to_string()]
}
