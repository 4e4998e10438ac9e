// Explicit task handler registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::executor::context::AppContext;
use crate::executor::result::TaskReturn;
use crate::executor::Connection;
use crate::output::errors::AutomateError;

/// Keyword arguments configured for a task
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// A callable bound to a task id.
///
/// Handlers receive the application context, a live connection handle for
/// one resolved host, the verbose flag and the task's configured kwargs.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &AppContext,
        connection: &dyn Connection,
        verbose: bool,
        kwargs: &Kwargs,
    ) -> Result<TaskReturn, AutomateError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: for<'a> Fn(
            &'a AppContext,
            &'a dyn Connection,
            bool,
            &'a Kwargs,
        ) -> BoxFuture<'a, Result<TaskReturn, AutomateError>>
        + Send
        + Sync,
{
    async fn run(
        &self,
        ctx: &AppContext,
        connection: &dyn Connection,
        verbose: bool,
        kwargs: &Kwargs,
    ) -> Result<TaskReturn, AutomateError> {
        (self.0)(ctx, connection, verbose, kwargs).await
    }
}

/// Registry mapping module names to their task functions.
///
/// The embedding application fills the registry at startup; the task
/// compiler resolves every configured task against it, so a missing module
/// or function surfaces as a configuration error before anything runs.
#[derive(Default)]
pub struct TaskRegistry {
    modules: HashMap<String, HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Register a handler under `module.name`
    pub fn register(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(name.into(), handler);
    }

    /// Register an async closure under `module.name`
    pub fn register_fn<F>(&mut self, module: impl Into<String>, name: impl Into<String>, f: F)
    where
        F: for<'a> Fn(
                &'a AppContext,
                &'a dyn Connection,
                bool,
                &'a Kwargs,
            ) -> BoxFuture<'a, Result<TaskReturn, AutomateError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(module, name, Arc::new(FnHandler(f)));
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Look up the handler for a task id inside a module
    pub fn resolve(&self, module: &str, name: &str) -> Result<Arc<dyn TaskHandler>, AutomateError> {
        let functions = self.modules.get(module).ok_or_else(|| {
            AutomateError::config(format!("A module \"{}\" is not registered", module))
        })?;

        functions.get(name).cloned().ok_or_else(|| {
            AutomateError::config(format!(
                "A function named \"{}\" does not exist in module \"{}\"",
                name, module
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register_fn("ops", "noop", |_ctx, _conn, _verbose, _kwargs| {
            Box::pin(async { Ok(TaskReturn::values(serde_json::Value::Null)) })
        });
        registry
    }

    #[test]
    fn test_resolve_registered_handler() {
        let registry = noop_registry();
        assert!(registry.resolve("ops", "noop").is_ok());
        assert!(registry.has_module("ops"));
    }

    #[test]
    fn test_missing_module_is_config_error() {
        let registry = noop_registry();
        assert!(matches!(
            registry.resolve("ghost", "noop"),
            Err(AutomateError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_function_is_config_error() {
        let registry = noop_registry();
        assert!(matches!(
            registry.resolve("ops", "ghost"),
            Err(AutomateError::Config { .. })
        ));
    }
}
