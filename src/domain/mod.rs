use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::constants;

/// Stable student key (RA)
pub type EntityId = u64;

/// One raw row: arbitrary column names mapped to loosely-typed cells
pub type RawRow = serde_json::Map<String, Value>;

/// A yearly export as handed to the pipeline by the landing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    /// Year the export describes
    pub source_year: i32,
    /// When the batch entered the pipeline; keys the drift artifact
    pub ingested_at: DateTime<Utc>,
    /// Lineage label (file and sheet name, or "inline")
    pub source_name: String,
    /// Rows in export order
    pub rows: Vec<RawRow>,
}

impl RawBatch {
    pub fn new(source_year: i32, rows: Vec<RawRow>) -> Self {
        Self {
            source_year,
            ingested_at: Utc::now(),
            source_name: "inline".to_string(),
            rows,
        }
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn with_ingested_at(mut self, ingested_at: DateTime<Utc>) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    /// Union of column names across all rows
    pub fn columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.keys().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The indicator indices carried by every canonical record, bounded to [0, 10]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexField {
    Inde,
    Iaa,
    Ieg,
    Ips,
    Ida,
    Ipv,
    Ian,
    Ipp,
}

impl IndexField {
    pub const ALL: [IndexField; 8] = [
        IndexField::Inde,
        IndexField::Iaa,
        IndexField::Ieg,
        IndexField::Ips,
        IndexField::Ida,
        IndexField::Ipv,
        IndexField::Ian,
        IndexField::Ipp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexField::Inde => constants::INDE,
            IndexField::Iaa => constants::IAA,
            IndexField::Ieg => constants::IEG,
            IndexField::Ips => constants::IPS,
            IndexField::Ida => constants::IDA,
            IndexField::Ipv => constants::IPV,
            IndexField::Ian => constants::IAN,
            IndexField::Ipp => constants::IPP,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for IndexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per indicator index
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexSet<T> {
    pub inde: T,
    pub iaa: T,
    pub ieg: T,
    pub ips: T,
    pub ida: T,
    pub ipv: T,
    pub ian: T,
    pub ipp: T,
}

impl<T: Copy> IndexSet<T> {
    pub fn get(&self, field: IndexField) -> T {
        match field {
            IndexField::Inde => self.inde,
            IndexField::Iaa => self.iaa,
            IndexField::Ieg => self.ieg,
            IndexField::Ips => self.ips,
            IndexField::Ida => self.ida,
            IndexField::Ipv => self.ipv,
            IndexField::Ian => self.ian,
            IndexField::Ipp => self.ipp,
        }
    }

    pub fn get_mut(&mut self, field: IndexField) -> &mut T {
        match field {
            IndexField::Inde => &mut self.inde,
            IndexField::Iaa => &mut self.iaa,
            IndexField::Ieg => &mut self.ieg,
            IndexField::Ips => &mut self.ips,
            IndexField::Ida => &mut self.ida,
            IndexField::Ipv => &mut self.ipv,
            IndexField::Ian => &mut self.ian,
            IndexField::Ipp => &mut self.ipp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Female, Gender::Male, Gender::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "F",
            Gender::Male => "M",
            Gender::Unknown => "unknown",
        }
    }

    /// Parses a canonical label; anything else lands in the unknown bucket
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("F") => Gender::Female,
            Some("M") => Gender::Male,
            _ => Gender::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Institution {
    Public,
    Private,
    Scholarship,
    Other,
    Unknown,
}

impl Institution {
    pub const ALL: [Institution; 5] = [
        Institution::Public,
        Institution::Private,
        Institution::Scholarship,
        Institution::Other,
        Institution::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Institution::Public => "public",
            Institution::Private => "private",
            Institution::Scholarship => "scholarship",
            Institution::Other => "other",
            Institution::Unknown => "unknown",
        }
    }

    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("public") => Institution::Public,
            Some("private") => Institution::Private,
            Some("scholarship") => Institution::Scholarship,
            Some("other") => Institution::Other,
            _ => Institution::Unknown,
        }
    }
}

/// Development stage ("pedra") assigned by the program each year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stone {
    Quartzo,
    Agata,
    Ametista,
    Topazio,
    Unknown,
}

impl Stone {
    pub const ALL: [Stone; 5] = [
        Stone::Quartzo,
        Stone::Agata,
        Stone::Ametista,
        Stone::Topazio,
        Stone::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stone::Quartzo => "quartzo",
            Stone::Agata => "agata",
            Stone::Ametista => "ametista",
            Stone::Topazio => "topazio",
            Stone::Unknown => "unknown",
        }
    }

    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("quartzo") => Stone::Quartzo,
            Some("agata") => Stone::Agata,
            Some("ametista") => Stone::Ametista,
            Some("topazio") => Stone::Topazio,
            _ => Stone::Unknown,
        }
    }
}

/// Three-valued outcome derived from a lag value. Never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    Critical,
    Alert,
    Expected,
}

impl TargetClass {
    pub const ALL: [TargetClass; 3] = [TargetClass::Critical, TargetClass::Alert, TargetClass::Expected];

    pub fn from_lag(lag: i32) -> Self {
        if lag <= -2 {
            TargetClass::Critical
        } else if lag == -1 {
            TargetClass::Alert
        } else {
            TargetClass::Expected
        }
    }

    /// Class code used by trainers: 0 critical, 1 alert, 2 expected
    pub fn code(&self) -> u8 {
        match self {
            TargetClass::Critical => 0,
            TargetClass::Alert => 1,
            TargetClass::Expected => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TargetClass::Critical),
            1 => Some(TargetClass::Alert),
            2 => Some(TargetClass::Expected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetClass::Critical => "critical",
            TargetClass::Alert => "alert",
            TargetClass::Expected => "expected",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TargetClass::Critical => "Critical (severe lagging)",
            TargetClass::Alert => "Alert (lagging risk)",
            TargetClass::Expected => "Expected performance",
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated row per (entity_id, year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub entity_id: EntityId,
    pub year: i32,
    pub phase: u8,
    pub age: u8,
    pub gender: Gender,
    pub institution: Institution,
    pub stone: Stone,
    pub years_in_program: u32,
    pub indices: IndexSet<f64>,
    /// Signed years behind (negative) or ahead of the expected grade
    pub target_lag: i32,
}

impl CanonicalRecord {
    pub fn target_class(&self) -> TargetClass {
        TargetClass::from_lag(self.target_lag)
    }

    pub fn numeric_value(&self, field: NumericField) -> f64 {
        match field {
            NumericField::Age => self.age as f64,
            NumericField::Phase => self.phase as f64,
            NumericField::YearsInProgram => self.years_in_program as f64,
            NumericField::TargetLag => self.target_lag as f64,
            NumericField::Index(index) => self.indices.get(index),
        }
    }

    pub fn category_label(&self, field: CategoricalField) -> &'static str {
        match field {
            CategoricalField::Gender => self.gender.as_str(),
            CategoricalField::Institution => self.institution.as_str(),
            CategoricalField::Stone => self.stone.as_str(),
        }
    }
}

/// Numeric features monitored for drift
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumericField {
    Age,
    Phase,
    YearsInProgram,
    TargetLag,
    Index(IndexField),
}

impl NumericField {
    pub const ALL: [NumericField; 12] = [
        NumericField::Age,
        NumericField::Phase,
        NumericField::YearsInProgram,
        NumericField::TargetLag,
        NumericField::Index(IndexField::Inde),
        NumericField::Index(IndexField::Iaa),
        NumericField::Index(IndexField::Ieg),
        NumericField::Index(IndexField::Ips),
        NumericField::Index(IndexField::Ida),
        NumericField::Index(IndexField::Ipv),
        NumericField::Index(IndexField::Ian),
        NumericField::Index(IndexField::Ipp),
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NumericField::Age => constants::AGE,
            NumericField::Phase => constants::PHASE,
            NumericField::YearsInProgram => constants::YEARS_IN_PROGRAM,
            NumericField::TargetLag => constants::TARGET_LAG,
            NumericField::Index(index) => index.as_str(),
        }
    }

    /// Fixed domain for bounded fields; histogram bins come from it instead of the data
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            NumericField::Index(_) => Some((0.0, 10.0)),
            _ => None,
        }
    }
}

/// Categorical features monitored for drift
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CategoricalField {
    Gender,
    Institution,
    Stone,
}

impl CategoricalField {
    pub const ALL: [CategoricalField; 3] = [
        CategoricalField::Gender,
        CategoricalField::Institution,
        CategoricalField::Stone,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CategoricalField::Gender => constants::GENDER,
            CategoricalField::Institution => constants::INSTITUTION,
            CategoricalField::Stone => constants::STONE,
        }
    }

    /// Full vocabulary, so frequency tables always carry every bucket
    pub fn vocabulary(&self) -> Vec<&'static str> {
        match self {
            CategoricalField::Gender => Gender::ALL.iter().map(|g| g.as_str()).collect(),
            CategoricalField::Institution => Institution::ALL.iter().map(|i| i.as_str()).collect(),
            CategoricalField::Stone => Stone::ALL.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Year-N features joined with the year-(N+1) lag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub features: CanonicalRecord,
    /// Lag observed in the following year; the label is derived from it
    pub next_year_lag: i32,
}

impl TrainingRow {
    pub fn entity_id(&self) -> EntityId {
        self.features.entity_id
    }

    pub fn year(&self) -> i32 {
        self.features.year
    }

    pub fn label(&self) -> TargetClass {
        TargetClass::from_lag(self.next_year_lag)
    }
}

/// Latest known snapshot of an entity, served for online inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub record: CanonicalRecord,
}

impl FeatureVector {
    pub fn new(record: CanonicalRecord) -> Self {
        Self { record }
    }

    pub fn entity_id(&self) -> EntityId {
        self.record.entity_id
    }

    pub fn year(&self) -> i32 {
        self.record.year
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_class_boundaries() {
        assert_eq!(TargetClass::from_lag(-5), TargetClass::Critical);
        assert_eq!(TargetClass::from_lag(-2), TargetClass::Critical);
        assert_eq!(TargetClass::from_lag(-1), TargetClass::Alert);
        assert_eq!(TargetClass::from_lag(0), TargetClass::Expected);
        assert_eq!(TargetClass::from_lag(3), TargetClass::Expected);
    }

    #[test]
    fn test_target_class_codes_round_trip() {
        for class in TargetClass::ALL {
            assert_eq!(TargetClass::from_code(class.code()), Some(class));
        }
        assert_eq!(TargetClass::from_code(7), None);
    }

    #[test]
    fn test_unrecognized_labels_fall_into_unknown() {
        assert_eq!(Gender::from_label(Some("X")), Gender::Unknown);
        assert_eq!(Gender::from_label(None), Gender::Unknown);
        assert_eq!(Institution::from_label(Some("mars academy")), Institution::Unknown);
        assert_eq!(Stone::from_label(Some("diamante")), Stone::Unknown);
    }

    #[test]
    fn test_raw_batch_columns_union() {
        let mut a = RawRow::new();
        a.insert("ra".into(), Value::from("RA-1"));
        let mut b = RawRow::new();
        b.insert("inde_23".into(), Value::from(7.0));
        let batch = RawBatch::new(2023, vec![a, b]);
        let columns: Vec<_> = batch.columns().into_iter().collect();
        assert_eq!(columns, vec!["inde_23".to_string(), "ra".to_string()]);
    }
}
