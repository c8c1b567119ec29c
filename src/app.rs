// Composition root: shared services, the route table and the axum router.

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRef, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{JwtError, TokenService};
use crate::config::AppConfig;
use crate::database::{Repository, Store};
use crate::dispatch::{dispatch, Dispatcher, ResponseEnvelope, RouteError, RouteTable};
use crate::{handlers, middleware};

/// Dependencies handler modules and middleware factories close over
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub store: Arc<Store>,
}

impl Services {
    pub fn new(config: AppConfig) -> Result<Self, JwtError> {
        let tokens = TokenService::from_config(&config.security)?;
        Ok(Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            store: Store::new(),
        })
    }

    pub fn repo(&self, collection: &str) -> Repository {
        Repository::new(collection, Arc::clone(&self.store))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub dispatcher: Dispatcher,
}

impl FromRef<AppState> for Dispatcher {
    fn from_ref(state: &AppState) -> Self {
        state.dispatcher.clone()
    }
}

/// Resolve every exposed method against the middleware registry
pub fn build_routes(services: &Services) -> Result<RouteTable, RouteError> {
    let registry = middleware::registry(services);
    RouteTable::build(&handlers::modules(services), &registry)
}

/// Everything the server needs; configuration errors are fatal here
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let services = Services::new(config).context("Failed to initialize token service")?;
    let routes = build_routes(&services).context("Invalid route configuration")?;
    tracing::info!("Route table ready: {} routes", routes.len());

    if let Some(admin) = services.config.security.bootstrap_admin.clone() {
        handlers::user::ensure_superadmin(&services, &admin.username, &admin.password)
            .await
            .context("Failed to seed bootstrap superadmin")?;
    }

    Ok(AppState {
        dispatcher: Dispatcher::new(Arc::new(routes)),
        services,
    })
}

pub fn router(state: AppState) -> Router {
    let config = Arc::clone(&state.services.config);

    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/:module/:method", any(dispatch))
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .with_state(state);

    if config.security.enable_cors {
        router = router.layer(cors_layer(&config.security.cors_origins));
    }
    if config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root(State(state): State<AppState>) -> Response {
    ResponseEnvelope::success(
        json!({
            "name": "School API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoint": "/api/:module/:method",
            "modules": state.dispatcher.routes().index(),
        }),
        200,
    )
    .into_response()
}

async fn health() -> Response {
    ResponseEnvelope::success(json!({ "status": "ok" }), 200).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_handler_parameter_resolves() {
        let services = Services::new(AppConfig::development()).unwrap();
        let routes = build_routes(&services).unwrap();

        assert!(routes.has_module("user"));
        assert!(routes.has_module("school"));
        assert!(routes.has_module("classroom"));
        assert!(routes.has_module("student"));
        assert_eq!(routes.stack("user", "loginUser"), ["__device"]);
        assert_eq!(routes.stack("school", "createSchool"), ["__superAdmin"]);
        assert_eq!(routes.stack("classroom", "getClassroom"), ["__query", "__schoolAdmin"]);
    }

    #[test]
    fn building_twice_gives_the_same_index() {
        let services = Services::new(AppConfig::development()).unwrap();
        let first = build_routes(&services).unwrap();
        let second = build_routes(&services).unwrap();
        assert_eq!(first.index(), second.index());
    }

    #[test]
    fn production_without_secret_is_refused() {
        assert!(Services::new(AppConfig::production()).is_err());
    }
}
