pub mod exec_log;
pub mod repository;
mod schema;
pub mod validate;

pub use exec_log::SqliteExecutionLog;
pub use repository::GraphRepository;
pub use validate::{build_connections, validate};
