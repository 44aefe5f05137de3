pub mod context;
pub mod delivery;
pub mod driver;
pub mod executor;
pub mod registry;
pub mod repeat;
pub mod resolve;
pub mod resources;
pub mod result;

pub use context::ExecutionContext;
pub use delivery::BestEffortSink;
pub use driver::{RunDriver, RunNode, RunReport, RunRequest, StepResult};
pub use executor::WrappedHandler;
pub use registry::HandlerRegistry;
pub use repeat::run_with_repeat;
pub use resources::ResourceTable;
pub use result::{failure, normalize, normalize_with_default};
