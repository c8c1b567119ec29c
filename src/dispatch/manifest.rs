use axum::http::Method;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::response::HandlerResult;
use crate::error::ApiError;

/// HTTP verbs a handler can be exposed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    /// Verb used by bare exposure declarations
    pub const DEFAULT: Verb = Verb::Post;

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Some(Verb::Get),
            "post" => Some(Verb::Post),
            "put" => Some(Verb::Put),
            "patch" => Some(Verb::Patch),
            "delete" => Some(Verb::Delete),
            _ => None,
        }
    }

    pub fn from_method(method: &Method) -> Option<Self> {
        Self::parse(method.as_str())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "post",
            Verb::Put => "put",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// Split an exposure declaration into verb and method name.
/// `"get=listSchools"` → `(Some(Get), "listSchools")`; a bare name gets the
/// default verb. An unknown verb yields `None` for the verb.
pub fn parse_declaration(declaration: &str) -> (Option<Verb>, &str) {
    match declaration.split_once('=') {
        Some((verb, method)) => (Verb::parse(verb), method.trim()),
        None => (Some(Verb::DEFAULT), declaration.trim()),
    }
}

/// Arguments handed to a handler: body fields plus middleware results
pub type HandlerArgs = Map<String, Value>;

pub type HandlerFn = Arc<dyn Fn(HandlerArgs) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// How a handler declares its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSpec {
    /// Explicit ordered names
    List(Vec<String>),
    /// Declaration text such as `({ name, __auth })`
    Source(String),
}

/// One callable a module offers
#[derive(Clone)]
pub struct HandlerMethod {
    pub name: String,
    pub params: ParamSpec,
    pub call: HandlerFn,
}

impl std::fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// A named group of handlers plus the declarations that expose them
#[derive(Debug, Clone)]
pub struct HandlerModule {
    pub name: String,
    pub exposed: Vec<String>,
    pub methods: HashMap<String, HandlerMethod>,
}

impl HandlerModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exposed: Vec::new(),
            methods: HashMap::new(),
        }
    }

    /// Expose a method: `"verb=methodName"` or bare `"methodName"`
    pub fn expose(mut self, declaration: impl Into<String>) -> Self {
        self.exposed.push(declaration.into());
        self
    }

    /// Register a handler whose parameters are given as declaration text.
    /// Handlers return a `HandlerResult`, or a plain JSON value read as a
    /// loosely shaped result.
    pub fn method<F, Fut, R>(self, name: &str, signature: &str, handler: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
        R: Into<HandlerResult> + Send + 'static,
    {
        self.add(name, ParamSpec::Source(signature.to_string()), handler)
    }

    /// Register a handler with an explicit ordered parameter list
    pub fn method_with_params<F, Fut, R>(self, name: &str, params: &[&str], handler: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
        R: Into<HandlerResult> + Send + 'static,
    {
        let params = params.iter().map(|p| p.to_string()).collect();
        self.add(name, ParamSpec::List(params), handler)
    }

    fn add<F, Fut, R>(mut self, name: &str, params: ParamSpec, handler: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
        R: Into<HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let call: HandlerFn = Arc::new(move |args: HandlerArgs| -> BoxFuture<'static, HandlerResult> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                match (*handler)(args).await {
                    Ok(result) => result.into(),
                    Err(err) => err.into(),
                }
            })
        });

        self.methods.insert(
            name.to_string(),
            HandlerMethod {
                name: name.to_string(),
                params,
                call,
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::response::ErrorItem;
    use serde_json::json;

    #[test]
    fn declarations_default_to_post() {
        assert_eq!(parse_declaration("createThing"), (Some(Verb::Post), "createThing"));
        assert_eq!(parse_declaration("get=listThings"), (Some(Verb::Get), "listThings"));
        assert_eq!(parse_declaration("DELETE=dropThing"), (Some(Verb::Delete), "dropThing"));
        assert_eq!(parse_declaration("fetch=thing"), (None, "thing"));
    }

    #[tokio::test]
    async fn plain_json_results_are_read_loosely() {
        let module = HandlerModule::new("thing")
            .method_with_params("listThings", &[], |_args| async { Ok(json!([1, 2])) })
            .method_with_params("checkThing", &[], |_args| async { Ok(json!({ "errors": ["x"] })) })
            .method_with_params("lockThing", &[], |_args| async {
                Ok(json!({ "error": "locked", "code": 423 }))
            });

        let call = |name: &str| (module.methods[name].call)(HandlerArgs::new());
        assert!(matches!(
            call("listThings").await,
            HandlerResult::Success { data, code: None } if data == json!([1, 2])
        ));
        assert!(matches!(
            call("checkThing").await,
            HandlerResult::ValidationFailure { errors, code: None } if errors == vec![ErrorItem::new("x")]
        ));
        assert!(matches!(
            call("lockThing").await,
            HandlerResult::Failure { message, code: Some(423) } if message == "locked"
        ));
    }

    #[tokio::test]
    async fn handler_errors_become_results() {
        let module = HandlerModule::new("thing").method_with_params("getThing", &[], |_args| async {
            Err::<HandlerResult, _>(ApiError::not_found("thing 1 not found"))
        });
        let result = (module.methods["getThing"].call)(HandlerArgs::new()).await;
        assert!(matches!(
            result,
            HandlerResult::Failure { message, code: Some(404) } if message == "thing 1 not found"
        ));
    }

    #[test]
    fn verbs_from_http_methods() {
        assert_eq!(Verb::from_method(&Method::GET), Some(Verb::Get));
        assert_eq!(Verb::from_method(&Method::PATCH), Some(Verb::Patch));
        assert_eq!(Verb::from_method(&Method::OPTIONS), None);
        assert_eq!(Verb::Put.to_string(), "PUT");
    }
}
