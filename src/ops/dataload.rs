//! Bulk data load: prepare, ingest, commit
//!
//! `prepare` shapes the schema and binds each target to a fresh table id.
//! `ingest` stages a path. `commit` binds staged tables to their targets,
//! all or nothing.

use crate::common::{validate_label, Result};
use crate::schema::{GraphSchema, SchemaService, TableBinding};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A label receiving bulk data. Edge targets carry both endpoint labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLoadTarget {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_label: Option<String>,
    /// Column index → property name
    #[serde(default)]
    pub column_mapping: BTreeMap<u32, String>,
}

impl DataLoadTarget {
    pub fn vertex(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            src_label: None,
            dst_label: None,
            column_mapping: BTreeMap::new(),
        }
    }

    pub fn edge(
        label: impl Into<String>,
        src_label: impl Into<String>,
        dst_label: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            src_label: Some(src_label.into()),
            dst_label: Some(dst_label.into()),
            column_mapping: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, index: u32, property: impl Into<String>) -> Self {
        self.column_mapping.insert(index, property.into());
        self
    }

    pub fn is_edge(&self) -> bool {
        self.src_label.is_some() || self.dst_label.is_some()
    }

    fn properties(&self) -> Vec<String> {
        self.column_mapping.values().cloned().collect()
    }

    fn matches(&self, binding: &TableBinding) -> bool {
        match binding {
            TableBinding::Vertex { label } => !self.is_edge() && &self.label == label,
            TableBinding::Edge {
                label,
                src_label,
                dst_label,
            } => {
                &self.label == label
                    && self.src_label.as_ref() == Some(src_label)
                    && self.dst_label.as_ref() == Some(dst_label)
            }
        }
    }
}

/// A table made visible by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedTable {
    pub table_id: u64,
    pub label: String,
    pub path: String,
}

#[derive(Debug, Default)]
struct LoadState {
    staged: BTreeSet<String>,
    committed: BTreeMap<u64, CommittedTable>,
}

pub struct DataLoadPipeline {
    schema: Arc<SchemaService>,
    state: Mutex<LoadState>,
}

impl DataLoadPipeline {
    pub fn new(schema: Arc<SchemaService>) -> Self {
        Self {
            schema,
            state: Mutex::new(LoadState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or extend the target labels and return the resulting schema.
    ///
    /// Vertex targets are applied before edge targets, so an edge may name
    /// a vertex label created by the same call.
    pub fn prepare(&self, targets: &[DataLoadTarget]) -> Result<GraphSchema> {
        if targets.is_empty() {
            return Err(crate::Error::SchemaConflict("no data load targets".into()));
        }
        for t in targets {
            validate_label(&t.label)?;
            if t.is_edge() && (t.src_label.is_none() || t.dst_label.is_none()) {
                return Err(crate::Error::SchemaConflict(format!(
                    "edge target {} needs both src and dst labels",
                    t.label
                )));
            }
        }

        let (tables, schema) = self.schema.update(|s| {
            let mut tables = Vec::with_capacity(targets.len());
            for t in targets.iter().filter(|t| !t.is_edge()) {
                tables.push((s.upsert_vertex(&t.label, &t.properties())?, t.label.clone()));
            }
            for t in targets.iter().filter(|t| t.is_edge()) {
                let src = t.src_label.as_deref().unwrap_or_default();
                let dst = t.dst_label.as_deref().unwrap_or_default();
                tables.push((s.upsert_edge(&t.label, src, dst, &t.properties())?, t.label.clone()));
            }
            Ok(tables)
        })?;

        for (table_id, label) in &tables {
            tracing::info!("Data load table {} prepared for {}", table_id, label);
        }
        Ok(schema)
    }

    /// Stage `path` for a later commit. The live schema is untouched.
    pub fn ingest(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Err(crate::Error::SchemaConflict("ingest path cannot be empty".into()));
        }
        if self.state().staged.insert(path.to_string()) {
            tracing::info!("Staged {} for data load", path);
        }
        Ok(())
    }

    /// Bind staged tables to their targets.
    ///
    /// Every table is checked before any is bound: an unknown table id, a
    /// table whose target does not match its prepared label, an un-staged
    /// path, or a table committed before all reject the whole call.
    pub fn commit(&self, table_to_target: &BTreeMap<u64, DataLoadTarget>, path: &str) -> Result<()> {
        if table_to_target.is_empty() {
            return Err(crate::Error::SchemaConflict("no tables to commit".into()));
        }
        let schema = self.schema.get_schema();
        let mut state = self.state();

        if !state.staged.contains(path) {
            return Err(crate::Error::SchemaConflict(format!(
                "{} was not ingested",
                path
            )));
        }
        for (table_id, target) in table_to_target {
            if state.committed.contains_key(table_id) {
                return Err(crate::Error::SchemaConflict(format!(
                    "table {} already committed",
                    table_id
                )));
            }
            let binding = schema.table(*table_id).ok_or_else(|| {
                crate::Error::SchemaConflict(format!("unknown table id {}", table_id))
            })?;
            if !target.matches(&binding) {
                return Err(crate::Error::SchemaConflict(format!(
                    "table {} is bound to {:?}, not {}",
                    table_id, binding, target.label
                )));
            }
        }

        for (table_id, target) in table_to_target {
            state.committed.insert(
                *table_id,
                CommittedTable {
                    table_id: *table_id,
                    label: target.label.clone(),
                    path: path.to_string(),
                },
            );
        }
        state.staged.remove(path);
        tracing::info!(
            "Committed {} data load tables from {}",
            table_to_target.len(),
            path
        );
        Ok(())
    }

    /// Drop everything staged but not committed
    pub fn clear_ingest(&self) {
        let mut state = self.state();
        let dropped = state.staged.len();
        state.staged.clear();
        tracing::info!("Cleared {} staged ingest paths", dropped);
    }

    pub fn staged(&self) -> Vec<String> {
        self.state().staged.iter().cloned().collect()
    }

    pub fn committed(&self) -> Vec<CommittedTable> {
        self.state().committed.values().cloned().collect()
    }
}
