use serde::{Deserialize, Serialize};

use crate::constants;
use crate::domain::{CanonicalRecord, Gender, IndexField, Institution};

/// Institution buckets that get a one-hot column; `unknown` encodes as all zeros
const ONE_HOT_INSTITUTIONS: [Institution; 4] = [
    Institution::Public,
    Institution::Private,
    Institution::Scholarship,
    Institution::Other,
];

/// Dense row-major matrix with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    pub fn select(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            feature_names: self.feature_names.clone(),
            rows: indices.iter().map(|i| self.rows[*i].clone()).collect(),
        }
    }
}

/// Turns canonical records into model inputs.
///
/// Numeric: phase, age, years in program, then the eight indices clipped to
/// the configured range. Binary: gender (M=1, F=0, unknown=0.5). One-hot:
/// institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePreprocessor {
    pub clip_min: f64,
    pub clip_max: f64,
}

impl Default for FeaturePreprocessor {
    fn default() -> Self {
        Self {
            clip_min: 0.0,
            clip_max: 10.0,
        }
    }
}

impl FeaturePreprocessor {
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = vec![
            constants::PHASE.to_string(),
            constants::AGE.to_string(),
            constants::YEARS_IN_PROGRAM.to_string(),
        ];
        names.extend(IndexField::ALL.iter().map(|f| f.as_str().to_string()));
        names.push(constants::GENDER.to_string());
        names.extend(
            ONE_HOT_INSTITUTIONS
                .iter()
                .map(|i| format!("{}_{}", constants::INSTITUTION, i.as_str())),
        );
        names
    }

    pub fn transform(&self, record: &CanonicalRecord) -> Vec<f64> {
        let mut row = vec![
            f64::from(record.phase),
            f64::from(record.age),
            f64::from(record.years_in_program),
        ];
        row.extend(
            IndexField::ALL
                .iter()
                .map(|f| record.indices.get(*f).clamp(self.clip_min, self.clip_max)),
        );
        row.push(match record.gender {
            Gender::Male => 1.0,
            Gender::Female => 0.0,
            Gender::Unknown => 0.5,
        });
        row.extend(
            ONE_HOT_INSTITUTIONS
                .iter()
                .map(|i| if *i == record.institution { 1.0 } else { 0.0 }),
        );
        row
    }

    pub fn transform_all<'a>(&self, records: impl Iterator<Item = &'a CanonicalRecord>) -> FeatureMatrix {
        FeatureMatrix {
            feature_names: self.feature_names(),
            rows: records.map(|r| self.transform(r)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::record;

    #[test]
    fn test_row_width_matches_names() {
        let pre = FeaturePreprocessor::default();
        let row = pre.transform(&record(1, 2023, 0));
        assert_eq!(row.len(), pre.feature_names().len());
        assert_eq!(pre.feature_names().len(), 16);
    }

    #[test]
    fn test_encoding_of_gender_institution_and_clipping() {
        let pre = FeaturePreprocessor::default();
        let mut r = record(1, 2023, 0);
        r.gender = Gender::Male;
        r.institution = Institution::Unknown;
        r.indices.ieg = 12.0;

        let row = pre.transform(&r);
        let names = pre.feature_names();
        let at = |name: &str| row[names.iter().position(|n| n == name).unwrap()];

        assert_eq!(at("gender"), 1.0);
        assert_eq!(at("ieg"), 10.0);
        assert_eq!(row[row.len() - 4..], [0.0, 0.0, 0.0, 0.0]);
    }
}
