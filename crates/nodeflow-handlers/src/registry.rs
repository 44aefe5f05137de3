use nodeflow_core::config::HandlersConfig;
use nodeflow_engine::HandlerRegistry;

use crate::builtin::boundary::{EndHandler, StartHandler};
use crate::builtin::condition::ConditionHandler;
use crate::builtin::http::HttpApiRequestHandler;
use crate::builtin::repeat::RepeatHandler;
use crate::builtin::variables::{GetVariableHandler, SetVariableHandler};
use crate::builtin::wait::WaitHandler;

/// Register every built-in handler.
pub fn register_default_handlers(registry: &mut HandlerRegistry, config: &HandlersConfig) {
    // ── Structure ───────────────────────────────────────────────
    registry.register(StartHandler);
    registry.register(EndHandler);
    registry.register(ConditionHandler);
    registry.register(RepeatHandler);

    // ── Actions ─────────────────────────────────────────────────
    registry.register(WaitHandler);
    registry.register(HttpApiRequestHandler::new(config.http_timeout_secs));
    registry.register(SetVariableHandler);
    registry.register(GetVariableHandler);
}

/// A registry with all built-in handlers registered.
pub fn default_registry(config: &HandlersConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    register_default_handlers(&mut registry, config);
    registry
}
