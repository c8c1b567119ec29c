use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::bolt::{Bolt, BoltDone};
use super::introspect::is_middleware_param;
use super::manifest::Verb;
use super::registry::RequestContext;
use super::response::{normalize, ResponseEnvelope};
use super::route_table::{Route, RouteTable};
use crate::error::ApiError;

/// Per-request entry point over an immutable route table
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resolve, run middleware, call the handler, normalize the result.
    /// Every path ends in exactly one response.
    pub async fn handle(&self, method: &Method, ctx: RequestContext) -> Response {
        let route = match self.routes.resolve(&ctx.module, ctx.verb, method.as_str(), &ctx.method) {
            Ok(route) => route,
            Err(miss) => {
                tracing::warn!("Route miss {} /{}/{}: {}", method, ctx.module, ctx.method, miss.message());
                return ResponseEnvelope::failure(miss.code(), miss.message()).into_response();
            }
        };

        Bolt::new(&route.middleware, &ctx)
            .run_then(|done| invoke(route, done))
            .await
    }
}

async fn invoke(route: &Route, done: BoltDone<'_>) -> Response {
    let mut args = done.request.body.clone();
    for (name, value) in done.results {
        args.insert(name, value);
    }

    match AssertUnwindSafe((route.handler)(args)).catch_unwind().await {
        Ok(result) => normalize(result).into_response(),
        Err(_) => {
            tracing::error!(
                "Handler {} {}.{} panicked",
                route.key.verb,
                route.key.module,
                route.key.method
            );
            ResponseEnvelope::internal().into_response()
        }
    }
}

/// Request body as a JSON object; an empty body is `{}`.
/// Marker-prefixed keys are dropped so clients cannot pose as middleware.
pub fn parse_body(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_json(format!("Invalid JSON body: {}", e)))?;

    match value {
        Value::Object(mut map) => {
            map.retain(|key, _| !is_middleware_param(key));
            Ok(map)
        }
        _ => Err(ApiError::bad_request("Request body must be a JSON object")),
    }
}

/// Axum entry: `ANY /api/:module/:method`
pub async fn dispatch(
    State(dispatcher): State<Dispatcher>,
    Path((module, method_name)): Path<(String, String)>,
    method: Method,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return ApiError::bad_request(rejection.body_text()).into_response(),
    };

    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };

    let ctx = RequestContext {
        module,
        method: method_name,
        verb: Verb::from_method(&method),
        headers,
        query,
        body,
    };

    dispatcher.handle(&method, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::manifest::{HandlerArgs, HandlerModule};
    use crate::dispatch::registry::{middleware_fn, MiddlewareError, MiddlewareRegistry, Outcome};
    use crate::dispatch::response::HandlerResult;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<HandlerArgs>>>;

    fn registry(order: Arc<Mutex<Vec<&'static str>>>) -> MiddlewareRegistry {
        let mut registry = MiddlewareRegistry::new();
        for name in ["__a", "__b", "__c"] {
            let order = Arc::clone(&order);
            registry.register(
                name,
                middleware_fn(move |ctx: RequestContext| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(name);
                        let mode = ctx.headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("ok");
                        match mode {
                            "stop" => Ok(Outcome::ShortCircuit(
                                ResponseEnvelope::failure(401, "Unauthorized").into_response(),
                            )),
                            "fail" => Err(MiddlewareError::new("store unavailable")),
                            _ => Ok(Outcome::Next(json!({ "from": name }))),
                        }
                    }
                }),
            );
        }
        registry
    }

    fn dispatcher(calls: &Calls, order: Arc<Mutex<Vec<&'static str>>>) -> Dispatcher {
        let calls = Arc::clone(calls);
        let panicky = HandlerModule::new("boom")
            .expose("explode")
            .method("explode", "()", |_args| async {
                if true {
                    panic!("handler bug");
                }
                Ok::<_, ApiError>(HandlerResult::ok(json!({})))
            });
        let module = HandlerModule::new("thing")
            .expose("createThing")
            .method("createThing", "({ name, __a, __b, __c })", move |args| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().unwrap().push(args.clone());
                    Ok::<_, ApiError>(HandlerResult::created(json!({ "name": args["name"] })))
                }
            });
        let table = RouteTable::build(&[module, panicky], &registry(order)).unwrap();
        Dispatcher::new(Arc::new(table))
    }

    fn request(module: &str, method: &str, body: Value, headers: &[(&'static str, &'static str)]) -> RequestContext {
        let mut ctx = RequestContext {
            module: module.to_string(),
            method: method.to_string(),
            verb: Some(Verb::Post),
            body: body.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        };
        for (k, v) in headers {
            ctx.headers.insert(*k, v.parse().unwrap());
        }
        ctx
    }

    async fn envelope(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn handler_sees_body_and_every_enrichment() {
        let calls: Calls = Arc::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&calls, Arc::clone(&order));

        let response = d
            .handle(&Method::POST, request("thing", "createThing", json!({"name": "Foo"}), &[]))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = envelope(response).await;
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["code"], json!(201));
        assert_eq!(body["data"], json!({"name": "Foo"}));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let keys: Vec<&str> = calls[0].keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 4);
        for key in ["name", "__a", "__b", "__c"] {
            assert!(keys.contains(&key), "missing {}", key);
        }
        assert_eq!(*order.lock().unwrap(), vec!["__a", "__b", "__c"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_rest_and_handler() {
        let calls: Calls = Arc::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&calls, Arc::clone(&order));

        let response = d
            .handle(
                &Method::POST,
                request("thing", "createThing", json!({"name": "Foo"}), &[("__b", "stop")]),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["__a", "__b"]);
    }

    #[tokio::test]
    async fn middleware_failure_is_one_internal_error() {
        let calls: Calls = Arc::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&calls, Arc::clone(&order));

        let response = d
            .handle(
                &Method::POST,
                request("thing", "createThing", json!({"name": "Foo"}), &[("__b", "fail")]),
            )
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = envelope(response).await;
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["message"], json!("Internal server error"));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["__a", "__b"]);
    }

    #[tokio::test]
    async fn unknown_module_never_touches_middleware() {
        let calls: Calls = Arc::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&calls, Arc::clone(&order));

        let response = d.handle(&Method::POST, request("ghost", "x", json!({}), &[])).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = envelope(response).await;
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["message"], json!("module ghost not found"));
        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_verb_is_rejected_before_middleware() {
        let calls: Calls = Arc::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&calls, Arc::clone(&order));

        let mut ctx = request("thing", "createThing", json!({}), &[]);
        ctx.verb = Some(Verb::Get);
        let response = d.handle(&Method::GET, ctx).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_panic_becomes_generic_failure() {
        let calls: Calls = Arc::default();
        let d = dispatcher(&calls, Arc::default());

        let response = d.handle(&Method::POST, request("boom", "explode", json!({}), &[])).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = envelope(response).await;
        assert_eq!(body["message"], json!("Internal server error"));
    }

    #[test]
    fn body_parsing() {
        assert!(parse_body(b"").unwrap().is_empty());
        assert!(parse_body(b"  \n").unwrap().is_empty());

        let body = parse_body(br#"{"name": "Foo", "__auth": {"role": "superadmin"}}"#).unwrap();
        assert_eq!(body.get("name"), Some(&json!("Foo")));
        assert!(body.get("__auth").is_none());

        assert!(matches!(parse_body(b"[1, 2]"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_body(b"{nope"), Err(ApiError::InvalidJson(_))));
    }
}
