use async_trait::async_trait;
use axum::{http::HeaderMap, response::Response};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use super::manifest::Verb;

/// Everything a middleware unit may look at for one request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub module: String,
    pub method: String,
    pub verb: Option<Verb>,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Map<String, Value>,
}

/// How a middleware unit finished
pub enum Outcome {
    /// Continue the pipeline, contributing this enrichment value
    Next(Value),
    /// Stop the pipeline; this response is the answer
    ShortCircuit(Response),
}

/// A middleware unit failed unexpectedly (not a deliberate rejection)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-request step, built once per process and resolved by name
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn run(&self, ctx: &RequestContext) -> Result<Outcome, MiddlewareError>;
}

/// Builds a unit from the shared dependencies it closes over
pub type MiddlewareFactory<D> = fn(&D) -> Arc<dyn Middleware>;

/// Adapter so plain async closures can act as middleware units
pub struct FnMiddleware<F>(pub F);

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, MiddlewareError>> + Send,
{
    async fn run(&self, ctx: &RequestContext) -> Result<Outcome, MiddlewareError> {
        (self.0)(ctx.clone()).await
    }
}

pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, MiddlewareError>> + Send + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Name → middleware unit
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    units: BTreeMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every unit from its factory against one set of dependencies
    pub fn from_factories<D>(
        deps: &D,
        factories: impl IntoIterator<Item = (&'static str, MiddlewareFactory<D>)>,
    ) -> Self {
        let mut registry = Self::new();
        for (name, factory) in factories {
            registry.register(name, factory(deps));
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, unit: Arc<dyn Middleware>) -> &mut Self {
        let name = name.into();
        tracing::debug!("Registered middleware '{}'", name);
        self.units.insert(name, unit);
        self
    }

    pub fn with(mut self, name: impl Into<String>, unit: Arc<dyn Middleware>) -> Self {
        self.register(name, unit);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Middleware>> {
        self.units.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.units.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Deps {
        greeting: &'static str,
    }

    fn greeter(deps: &Deps) -> Arc<dyn Middleware> {
        let greeting = deps.greeting;
        middleware_fn(move |_ctx| async move { Ok::<_, MiddlewareError>(Outcome::Next(json!(greeting))) })
    }

    #[tokio::test]
    async fn factories_close_over_dependencies() {
        let deps = Deps { greeting: "hello" };
        let registry = MiddlewareRegistry::from_factories(&deps, [("__greet", greeter as MiddlewareFactory<Deps>)]);

        assert!(registry.contains("__greet"));
        assert!(!registry.contains("__missing"));

        let unit = registry.get("__greet").unwrap();
        match unit.run(&RequestContext::default()).await.unwrap() {
            Outcome::Next(value) => assert_eq!(value, json!("hello")),
            Outcome::ShortCircuit(_) => panic!("unexpected short-circuit"),
        }
    }
}
