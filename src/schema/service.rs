//! Schema service: get, drop and JSON load

use crate::common::Result;
use crate::coordinator::metadata::MetadataStore;
use crate::schema::model::{EdgeType, GraphSchema, VertexType};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Body accepted by [`SchemaService::load_json_schema`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDocument {
    #[serde(default)]
    vertex_types: Vec<VertexType>,
    #[serde(default)]
    edge_types: Vec<EdgeType>,
}

pub struct SchemaService {
    metadata: Arc<MetadataStore>,
    current: Mutex<GraphSchema>,
}

impl SchemaService {
    /// Load the persisted schema, or start empty
    pub fn open(metadata: Arc<MetadataStore>) -> Result<Self> {
        let current = metadata.get_schema()?.unwrap_or_default();
        tracing::debug!(
            "Schema loaded (version {}, {} vertex types, {} edge types)",
            current.version,
            current.vertex_types.len(),
            current.edge_types.len()
        );
        Ok(Self {
            metadata,
            current: Mutex::new(current),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GraphSchema> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_schema(&self) -> GraphSchema {
        self.lock().clone()
    }

    /// Apply `f` to a copy of the schema; the copy replaces the current schema
    /// only if `f` succeeds and the result validates
    pub fn update<R>(&self, f: impl FnOnce(&mut GraphSchema) -> Result<R>) -> Result<(R, GraphSchema)> {
        let mut current = self.lock();
        let mut next = current.clone();
        let out = f(&mut next)?;
        next.validate()?;
        next.version = current.version + 1;
        self.metadata.put_schema(&next)?;
        *current = next.clone();
        Ok((out, next))
    }

    /// Remove every type. Table ids already handed out stay retired.
    pub fn drop_schema(&self) -> Result<GraphSchema> {
        let (_, schema) = self.update(|s| {
            s.vertex_types.clear();
            s.edge_types.clear();
            Ok(())
        })?;
        tracing::info!("Schema dropped (version {})", schema.version);
        Ok(schema)
    }

    /// Add the types described by a `{vertexTypes, edgeTypes}` JSON document
    pub fn load_json_schema(&self, json: &str) -> Result<GraphSchema> {
        let doc: SchemaDocument = serde_json::from_str(json)
            .map_err(|e| crate::Error::SchemaConflict(format!("invalid schema json: {}", e)))?;
        let (_, schema) = self.update(|s| {
            s.vertex_types.extend(doc.vertex_types.into_iter().map(|mut v| {
                v.table_id = None;
                v
            }));
            s.edge_types.extend(doc.edge_types.into_iter().map(|mut e| {
                for r in &mut e.relations {
                    r.table_id = None;
                }
                e
            }));
            Ok(())
        })?;
        tracing::info!("Schema loaded from json (version {})", schema.version);
        Ok(schema)
    }

    /// Replace the schema wholesale (backup restore)
    pub fn restore(&self, mut schema: GraphSchema) -> Result<()> {
        let mut current = self.lock();
        schema.version = schema.version.max(current.version) + 1;
        schema.last_table_id = schema.last_table_id.max(current.last_table_id);
        self.metadata.put_schema(&schema)?;
        *current = schema;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MemStore;

    fn service() -> SchemaService {
        SchemaService::open(Arc::new(MetadataStore::new(Arc::new(MemStore::new())))).unwrap()
    }

    const PERSON_KNOWS: &str = r#"{
        "vertexTypes": [
            {"label": "Person", "properties": [{"name": "id", "dataType": "long"}], "primaryKeys": ["id"]}
        ],
        "edgeTypes": [
            {"label": "knows", "relations": [{"srcLabel": "Person", "dstLabel": "Person"}]}
        ]
    }"#;

    #[test]
    fn test_load_json_schema() {
        let svc = service();
        let schema = svc.load_json_schema(PERSON_KNOWS).unwrap();
        assert_eq!(schema.version, 1);
        assert!(schema.vertex("Person").is_some());
        assert!(schema.edge("knows").is_some());
        assert_eq!(svc.get_schema(), schema);
    }

    #[test]
    fn test_load_rejects_conflicts_atomically() {
        let svc = service();
        svc.load_json_schema(PERSON_KNOWS).unwrap();

        // Person already exists
        assert!(svc.load_json_schema(PERSON_KNOWS).is_err());
        // Edge to an unknown vertex label
        let bad = r#"{"edgeTypes": [{"label": "owns", "relations": [{"srcLabel": "Person", "dstLabel": "Car"}]}]}"#;
        assert!(matches!(
            svc.load_json_schema(bad),
            Err(crate::Error::SchemaConflict(_))
        ));
        assert!(svc.load_json_schema("not json").is_err());
        assert_eq!(svc.get_schema().version, 1);
    }

    #[test]
    fn test_drop_schema() {
        let svc = service();
        svc.load_json_schema(PERSON_KNOWS).unwrap();
        let dropped = svc.drop_schema().unwrap();
        assert!(dropped.vertex_types.is_empty());
        assert!(dropped.edge_types.is_empty());
        assert_eq!(dropped.version, 2);
    }

    #[test]
    fn test_schema_persists() {
        let metadata = Arc::new(MetadataStore::new(Arc::new(MemStore::new())));
        SchemaService::open(metadata.clone())
            .unwrap()
            .load_json_schema(PERSON_KNOWS)
            .unwrap();
        let reopened = SchemaService::open(metadata).unwrap();
        assert!(reopened.get_schema().vertex("Person").is_some());
    }
}
