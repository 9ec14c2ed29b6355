//! Schema Reconciler: maps any year's export layout onto the canonical record shape.

pub mod aliases;
pub mod cleaning;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

pub use aliases::{AliasTable, CanonicalColumn, ColumnMapping};

use crate::domain::{EntityId, IndexField, IndexSet, RawBatch, RawRow};
use crate::error::{PipelineError, Result};
use crate::metrics::reconcile::ReconcileMetrics;

/// Row-level data quality signal carried from reconciliation into validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowSignal {
    /// The composite index could not be rebuilt because components were missing
    ReconstructionIncomplete {
        field: IndexField,
        missing: Vec<IndexField>,
    },
}

/// A row in canonical shape with every field still optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    /// Position in the raw batch, for quarantine reports
    pub row_index: usize,
    pub year: i32,
    /// Raw entity key text as exported
    pub entity_key: Option<String>,
    pub entity_id: Option<EntityId>,
    pub phase: Option<i64>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub enrollment_year: Option<i64>,
    pub years_in_program: Option<i64>,
    pub institution: Option<String>,
    pub stone: Option<String>,
    pub indices: IndexSet<Option<f64>>,
    pub target_lag: Option<i64>,
    pub signals: Vec<RowSignal>,
}

/// A reconciled batch ready for reconstruction and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledBatch {
    pub year: i32,
    pub ingested_at: DateTime<Utc>,
    pub source_name: String,
    pub records: Vec<ReconciledRecord>,
    /// canonical field name -> source column used
    pub column_sources: BTreeMap<String, String>,
    /// Source columns dropped because nothing maps them
    pub dropped_columns: Vec<String>,
}

pub struct SchemaReconciler {
    aliases: AliasTable,
}

impl Default for SchemaReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaReconciler {
    pub fn new() -> Self {
        Self {
            aliases: AliasTable::new(),
        }
    }

    pub fn with_aliases(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Map a raw batch onto canonical fields.
    ///
    /// Fails only when no column maps to the entity key; that error is fatal for
    /// this batch alone.
    pub fn reconcile(&self, batch: &RawBatch) -> Result<ReconciledBatch> {
        let year = batch.source_year;

        // Standardize names once per batch; the first raw column wins on collisions
        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        let mut standardized: BTreeSet<String> = BTreeSet::new();
        for raw_name in batch.columns() {
            let clean = cleaning::standardize_column_name(&raw_name);
            if !standardized.insert(clean.clone()) {
                warn!(year, column = %raw_name, standardized = %clean, "Duplicate column after standardization, keeping first");
                continue;
            }
            renames.insert(raw_name, clean);
        }

        let mapping = self.aliases.resolve(&standardized, year);

        if mapping.source_for(CanonicalColumn::EntityKey).is_none() {
            ReconcileMetrics::record_schema_error();
            return Err(PipelineError::Schema {
                year,
                message: format!(
                    "entity key column '{}' not found among {} columns",
                    crate::constants::SRC_ENTITY_KEY,
                    standardized.len()
                ),
            });
        }

        for column in &mapping.unmapped {
            warn!(year, column = %column, "Dropping unmapped column");
        }
        for column in &mapping.superseded {
            warn!(year, column = %column, "Dropping column from another export year");
        }

        // Invert to standardized -> canonical for per-row lookups
        let by_source: BTreeMap<&str, CanonicalColumn> = mapping
            .selected
            .iter()
            .map(|(canonical, source)| (source.as_str(), *canonical))
            .collect();

        let records: Vec<ReconciledRecord> = batch
            .rows
            .par_iter()
            .enumerate()
            .map(|(row_index, row)| reconcile_row(row_index, row, year, &renames, &by_source))
            .collect();

        let column_sources = mapping
            .selected
            .iter()
            .map(|(canonical, source)| (canonical.name().to_string(), source.clone()))
            .collect();

        let mut dropped_columns = mapping.unmapped.clone();
        dropped_columns.extend(mapping.superseded.iter().cloned());

        ReconcileMetrics::record_batch(records.len(), dropped_columns.len());
        info!(
            year,
            rows = records.len(),
            mapped = mapping.selected.len(),
            dropped = dropped_columns.len(),
            "Reconciled batch"
        );

        Ok(ReconciledBatch {
            year,
            ingested_at: batch.ingested_at,
            source_name: batch.source_name.clone(),
            records,
            column_sources,
            dropped_columns,
        })
    }
}

fn reconcile_row(
    row_index: usize,
    row: &RawRow,
    year: i32,
    renames: &BTreeMap<String, String>,
    by_source: &BTreeMap<&str, CanonicalColumn>,
) -> ReconciledRecord {
    let mut record = ReconciledRecord {
        row_index,
        year,
        entity_key: None,
        entity_id: None,
        phase: None,
        age: None,
        gender: None,
        enrollment_year: None,
        years_in_program: None,
        institution: None,
        stone: None,
        indices: IndexSet::default(),
        target_lag: None,
        signals: Vec::new(),
    };

    for (raw_name, value) in row {
        let Some(canonical) = renames
            .get(raw_name)
            .and_then(|clean| by_source.get(clean.as_str()))
        else {
            continue;
        };

        match canonical {
            CanonicalColumn::EntityKey => {
                record.entity_key = cleaning::cell_text(value);
                record.entity_id = cleaning::clean_entity_key(value);
            }
            CanonicalColumn::Phase => record.phase = cleaning::clean_phase(value),
            CanonicalColumn::Age => record.age = cleaning::clean_age(value),
            CanonicalColumn::Gender => record.gender = cleaning::clean_gender(value),
            CanonicalColumn::EnrollmentYear => {
                record.enrollment_year = cleaning::clean_integer(value)
            }
            CanonicalColumn::Institution => {
                record.institution = cleaning::clean_institution(value)
            }
            CanonicalColumn::Stone => record.stone = cleaning::clean_stone(value),
            CanonicalColumn::TargetLag => record.target_lag = cleaning::clean_integer(value),
            CanonicalColumn::Index(index) => {
                *record.indices.get_mut(*index) = cleaning::clean_decimal(value)
            }
        }
    }

    record.years_in_program = record
        .enrollment_year
        .map(|enrolled| i64::from(year) - enrolled);

    record
}
