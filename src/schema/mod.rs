//! Graph schema and the service managing it

pub mod model;
pub mod service;

pub use model::{DataType, EdgeRelation, EdgeType, GraphSchema, PropertyDef, TableBinding, VertexType};
pub use service::SchemaService;
