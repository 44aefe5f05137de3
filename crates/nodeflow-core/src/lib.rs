pub mod config;
pub mod error;
pub mod graph;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{NodeflowError, Result};
pub use graph::{Connection, ConnectionTarget, GraphPayload, Node, Position, Script};
pub use traits::{
    ExecutionLogSink, HandlerContext, NodeHandler, NodeTypeCatalog, Resource, ResourceStore,
};
pub use types::*;
