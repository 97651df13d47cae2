//! Graph schema model

use crate::common::{validate_label, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Int,
    Long,
    Double,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    pub name: String,
    #[serde(default)]
    pub data_type: DataType,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexType {
    pub label: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    /// Bulk-load table bound by the latest prepare
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRelation {
    pub src_label: String,
    pub dst_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeType {
    pub label: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub relations: Vec<EdgeRelation>,
}

/// Where a bulk-load table lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableBinding {
    Vertex { label: String },
    Edge {
        label: String,
        src_label: String,
        dst_label: String,
    },
}

/// Versioned set of vertex and edge types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSchema {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub vertex_types: Vec<VertexType>,
    #[serde(default)]
    pub edge_types: Vec<EdgeType>,
    /// Highest table id handed out; survives drops so ids are never reused
    #[serde(default)]
    pub last_table_id: u64,
}

fn merge_properties(target: &mut Vec<PropertyDef>, names: &[String]) {
    for name in names {
        if !target.iter().any(|p| &p.name == name) {
            target.push(PropertyDef::new(name.clone()));
        }
    }
}

impl GraphSchema {
    pub fn vertex(&self, label: &str) -> Option<&VertexType> {
        self.vertex_types.iter().find(|v| v.label == label)
    }

    pub fn edge(&self, label: &str) -> Option<&EdgeType> {
        self.edge_types.iter().find(|e| e.label == label)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.vertex(label).is_some() || self.edge(label).is_some()
    }

    pub fn allocate_table_id(&mut self) -> u64 {
        self.last_table_id += 1;
        self.last_table_id
    }

    /// Find the type a table id is currently bound to
    pub fn table(&self, table_id: u64) -> Option<TableBinding> {
        if let Some(v) = self
            .vertex_types
            .iter()
            .find(|v| v.table_id == Some(table_id))
        {
            return Some(TableBinding::Vertex {
                label: v.label.clone(),
            });
        }
        self.edge_types.iter().find_map(|e| {
            e.relations
                .iter()
                .find(|r| r.table_id == Some(table_id))
                .map(|r| TableBinding::Edge {
                    label: e.label.clone(),
                    src_label: r.src_label.clone(),
                    dst_label: r.dst_label.clone(),
                })
        })
    }

    /// Create or extend a vertex type, binding it to a fresh table id
    pub fn upsert_vertex(&mut self, label: &str, properties: &[String]) -> Result<u64> {
        if self.edge(label).is_some() {
            return Err(crate::Error::SchemaConflict(format!(
                "{} is an edge label, not a vertex label",
                label
            )));
        }
        let table_id = self.allocate_table_id();
        match self.vertex_types.iter_mut().find(|v| v.label == label) {
            Some(v) => {
                merge_properties(&mut v.properties, properties);
                v.table_id = Some(table_id);
            }
            None => {
                let mut vertex = VertexType {
                    label: label.to_string(),
                    properties: Vec::new(),
                    primary_keys: properties.iter().take(1).cloned().collect(),
                    table_id: Some(table_id),
                };
                merge_properties(&mut vertex.properties, properties);
                self.vertex_types.push(vertex);
            }
        }
        Ok(table_id)
    }

    /// Create or extend an edge type and relation, binding a fresh table id
    pub fn upsert_edge(
        &mut self,
        label: &str,
        src_label: &str,
        dst_label: &str,
        properties: &[String],
    ) -> Result<u64> {
        if self.vertex(label).is_some() {
            return Err(crate::Error::SchemaConflict(format!(
                "{} is a vertex label, not an edge label",
                label
            )));
        }
        for endpoint in [src_label, dst_label] {
            if self.vertex(endpoint).is_none() {
                return Err(crate::Error::SchemaConflict(format!(
                    "edge {} references unknown vertex label {}",
                    label, endpoint
                )));
            }
        }

        let table_id = self.allocate_table_id();
        let idx = match self.edge_types.iter().position(|e| e.label == label) {
            Some(idx) => idx,
            None => {
                self.edge_types.push(EdgeType {
                    label: label.to_string(),
                    properties: Vec::new(),
                    relations: Vec::new(),
                });
                self.edge_types.len() - 1
            }
        };
        let edge = &mut self.edge_types[idx];
        merge_properties(&mut edge.properties, properties);
        match edge
            .relations
            .iter_mut()
            .find(|r| r.src_label == src_label && r.dst_label == dst_label)
        {
            Some(r) => r.table_id = Some(table_id),
            None => edge.relations.push(EdgeRelation {
                src_label: src_label.to_string(),
                dst_label: dst_label.to_string(),
                table_id: Some(table_id),
            }),
        }
        Ok(table_id)
    }

    /// Check labels are valid and unique, primary keys are declared, and edge
    /// relations name existing vertex labels
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        let labels = self
            .vertex_types
            .iter()
            .map(|v| &v.label)
            .chain(self.edge_types.iter().map(|e| &e.label));
        for label in labels {
            validate_label(label)?;
            if !seen.insert(label.as_str()) {
                return Err(crate::Error::SchemaConflict(format!(
                    "duplicate label {}",
                    label
                )));
            }
        }

        for v in &self.vertex_types {
            for pk in &v.primary_keys {
                if !v.properties.iter().any(|p| &p.name == pk) {
                    return Err(crate::Error::SchemaConflict(format!(
                        "primary key {} of {} is not a declared property",
                        pk, v.label
                    )));
                }
            }
        }

        for e in &self.edge_types {
            for r in &e.relations {
                for endpoint in [&r.src_label, &r.dst_label] {
                    if self.vertex(endpoint).is_none() {
                        return Err(crate::Error::SchemaConflict(format!(
                            "edge {} references unknown vertex label {}",
                            e.label, endpoint
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
