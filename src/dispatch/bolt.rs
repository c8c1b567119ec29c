// Bolt: one request's run through its middleware stack.
//
// Units execute strictly in stack order. Each one either contributes an
// enrichment value under its own name, answers the request itself
// (short-circuit) or fails. Only a completed run reaches the handler.

use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use super::registry::{MiddlewareError, Outcome, RequestContext};
use super::response::ResponseEnvelope;
use super::route_table::ResolvedMiddleware;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoltState {
    Pending,
    Running(usize),
    ShortCircuited,
    Failed,
    Completed,
}

/// Terminal result of a run
pub enum BoltOutcome {
    Completed(Map<String, Value>),
    ShortCircuited { by: String, response: Response },
    Failed { by: String, error: MiddlewareError },
}

/// What the continuation receives once every unit has succeeded
pub struct BoltDone<'a> {
    pub request: &'a RequestContext,
    pub results: Map<String, Value>,
}

pub struct Bolt<'a> {
    stack: &'a [ResolvedMiddleware],
    request: &'a RequestContext,
    state: BoltState,
    results: Map<String, Value>,
}

impl<'a> Bolt<'a> {
    pub fn new(stack: &'a [ResolvedMiddleware], request: &'a RequestContext) -> Self {
        Self {
            stack,
            request,
            state: BoltState::Pending,
            results: Map::new(),
        }
    }

    pub fn state(&self) -> BoltState {
        self.state
    }

    /// Drive the stack to a terminal state
    pub async fn run(mut self) -> BoltOutcome {
        let started = Instant::now();

        for (i, middleware) in self.stack.iter().enumerate() {
            self.state = BoltState::Running(i);

            // A panicking unit counts as a failure, not a crash
            let result = AssertUnwindSafe(middleware.unit.run(self.request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(MiddlewareError::new(format!("middleware '{}' panicked", middleware.name))));

            match result {
                Ok(Outcome::Next(value)) => {
                    tracing::trace!("Middleware '{}' continued", middleware.name);
                    self.results.insert(middleware.name.clone(), value);
                }
                Ok(Outcome::ShortCircuit(response)) => {
                    self.state = BoltState::ShortCircuited;
                    tracing::debug!(
                        "Middleware '{}' answered {}.{} with {}",
                        middleware.name,
                        self.request.module,
                        self.request.method,
                        response.status()
                    );
                    return BoltOutcome::ShortCircuited {
                        by: middleware.name.clone(),
                        response,
                    };
                }
                Err(error) => {
                    self.state = BoltState::Failed;
                    return BoltOutcome::Failed {
                        by: middleware.name.clone(),
                        error,
                    };
                }
            }
        }

        self.state = BoltState::Completed;
        tracing::debug!(
            "Middleware stack for {}.{} completed in {:?}",
            self.request.module,
            self.request.method,
            started.elapsed()
        );
        BoltOutcome::Completed(self.results)
    }

    /// Run the stack and hand the accumulated results to `on_done`, which
    /// is invoked exactly once and only when every unit succeeded.
    pub async fn run_then<F, Fut>(self, on_done: F) -> Response
    where
        F: FnOnce(BoltDone<'a>) -> Fut,
        Fut: Future<Output = Response>,
    {
        let request = self.request;
        match self.run().await {
            BoltOutcome::Completed(results) => on_done(BoltDone { request, results }).await,
            BoltOutcome::ShortCircuited { response, .. } => response,
            BoltOutcome::Failed { by, error } => {
                tracing::error!(
                    "Middleware '{}' failed for {}.{}: {}",
                    by,
                    request.module,
                    request.method,
                    error
                );
                ResponseEnvelope::internal().into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::middleware_fn;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn unit(name: &str, log: &Log, behavior: &'static str) -> ResolvedMiddleware {
        let log = Arc::clone(log);
        let label = name.to_string();
        ResolvedMiddleware {
            name: name.to_string(),
            unit: middleware_fn(move |_ctx| {
                let log = Arc::clone(&log);
                let label = label.clone();
                async move {
                    log.lock().unwrap().push(label.clone());
                    match behavior {
                        "next" => Ok(Outcome::Next(json!(format!("{}-value", label)))),
                        "stop" => Ok(Outcome::ShortCircuit(
                            ResponseEnvelope::failure(401, "Missing token").into_response(),
                        )),
                        "fail" => Err(MiddlewareError::new("lookup exploded")),
                        _ => panic!("boom"),
                    }
                }
            }),
        }
    }

    #[tokio::test]
    async fn runs_in_order_and_collects_results() {
        let log: Log = Arc::default();
        let stack = vec![unit("A", &log, "next"), unit("B", &log, "next"), unit("C", &log, "next")];
        let ctx = RequestContext::default();

        let bolt = Bolt::new(&stack, &ctx);
        assert_eq!(bolt.state(), BoltState::Pending);

        match bolt.run().await {
            BoltOutcome::Completed(results) => {
                let keys: Vec<&String> = results.keys().collect();
                assert_eq!(keys.len(), 3);
                assert_eq!(results["A"], json!("A-value"));
                assert_eq!(results["C"], json!("C-value"));
            }
            _ => panic!("expected completion"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn short_circuit_stops_the_stack() {
        let log: Log = Arc::default();
        let stack = vec![unit("A", &log, "next"), unit("B", &log, "stop"), unit("C", &log, "next")];
        let ctx = RequestContext::default();
        let called = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&called);
        let response = Bolt::new(&stack, &ctx)
            .run_then(|_done| async move {
                *counter.lock().unwrap() += 1;
                StatusCode::OK.into_response()
            })
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(*called.lock().unwrap(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn failure_yields_one_internal_error() {
        let log: Log = Arc::default();
        let stack = vec![unit("A", &log, "next"), unit("B", &log, "fail"), unit("C", &log, "next")];
        let ctx = RequestContext::default();

        let response = Bolt::new(&stack, &ctx)
            .run_then(|_done| async { StatusCode::OK.into_response() })
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn panicking_unit_is_a_failure() {
        let log: Log = Arc::default();
        let stack = vec![unit("A", &log, "panic"), unit("B", &log, "next")];
        let ctx = RequestContext::default();

        match Bolt::new(&stack, &ctx).run().await {
            BoltOutcome::Failed { by, .. } => assert_eq!(by, "A"),
            _ => panic!("expected failure"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn empty_stack_completes_immediately() {
        let ctx = RequestContext::default();
        let response = Bolt::new(&[], &ctx)
            .run_then(|done| async move {
                assert!(done.results.is_empty());
                StatusCode::NO_CONTENT.into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
