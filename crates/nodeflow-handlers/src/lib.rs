pub mod builtin;
pub mod registry;

pub use registry::{default_registry, register_default_handlers};
