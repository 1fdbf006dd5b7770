//! The work graph: nodes, typed edges and their SQLite store.

pub mod id;
pub mod model;
pub mod schema;
pub mod store;

pub use model::{
    DeleteOutcome, Edge, EdgeType, Metadata, MetadataPatch, NewNode, Node, NodeFilter,
    NodeUpdate, Status, UpdateOutcome,
};
pub use store::GraphStore;
