// Route table construction.
//
// Built once at startup from the handler modules and the middleware
// registry, then shared read-only by every request. Any inconsistency
// (unknown method, unknown middleware, unparseable parameters) is a
// RouteError and the server must not start.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use super::introspect::{check_params, introspect, is_middleware_param, IntrospectError};
use super::manifest::{parse_declaration, HandlerFn, HandlerModule, ParamSpec, Verb};
use super::registry::{Middleware, MiddlewareRegistry};

/// Configuration errors detected while building the route table
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("module '{0}' is registered more than once")]
    DuplicateModule(String),

    #[error("module '{module}' declares '{declaration}' with an unknown verb")]
    InvalidVerb { module: String, declaration: String },

    #[error("module '{module}' exposes '{method}' but has no such method")]
    UnknownMethod { module: String, method: String },

    #[error("module '{module}' exposes {verb} {method} more than once")]
    DuplicateRoute { module: String, verb: Verb, method: String },

    #[error("cannot read parameters of {module}.{method}: {source}")]
    Introspection {
        module: String,
        method: String,
        #[source]
        source: IntrospectError,
    },

    #[error("middleware '{middleware}' required by {module}.{method} is not registered")]
    UnknownMiddleware {
        middleware: String,
        module: String,
        method: String,
    },
}

/// Uniquely identifies one callable route
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteKey {
    pub module: String,
    pub verb: Verb,
    pub method: String,
}

/// A middleware unit resolved at build time
#[derive(Clone)]
pub struct ResolvedMiddleware {
    pub name: String,
    pub unit: Arc<dyn Middleware>,
}

/// Everything the dispatcher needs to serve one route
#[derive(Clone)]
pub struct Route {
    pub key: RouteKey,
    pub middleware: Vec<ResolvedMiddleware>,
    pub handler: HandlerFn,
}

impl Route {
    pub fn stack(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name.as_str()).collect()
    }
}

/// The serializable description of the table: which methods each module
/// offers per verb, and the middleware stack of every `module.method`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteIndex {
    pub modules: BTreeMap<String, BTreeMap<Verb, BTreeSet<String>>>,
    pub stacks: BTreeMap<String, Vec<String>>,
}

/// Why a request did not resolve to a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMiss {
    UnknownModule { module: String },
    UnsupportedVerb { module: String, verb: String },
    UnknownMethod { module: String, verb: String, method: String },
}

impl RouteMiss {
    pub fn code(&self) -> u16 {
        match self {
            RouteMiss::UnknownModule { .. } => 404,
            RouteMiss::UnsupportedVerb { .. } => 405,
            RouteMiss::UnknownMethod { .. } => 404,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RouteMiss::UnknownModule { module } => format!("module {} not found", module),
            RouteMiss::UnsupportedVerb { module, verb } => {
                format!("module {} does not support {}", module, verb)
            }
            RouteMiss::UnknownMethod { module, verb, method } => {
                format!("unable to find function {} with {} exposure on module {}", method, verb, module)
            }
        }
    }
}

/// Immutable route table
#[derive(Clone, Default)]
pub struct RouteTable {
    index: RouteIndex,
    routes: HashMap<RouteKey, Route>,
}

impl RouteTable {
    /// Scan every module's exposure declarations and wire its routes
    pub fn build(modules: &[HandlerModule], registry: &MiddlewareRegistry) -> Result<Self, RouteError> {
        let mut table = RouteTable::default();
        let mut seen_modules = HashSet::new();

        for module in modules {
            if !seen_modules.insert(module.name.as_str()) {
                return Err(RouteError::DuplicateModule(module.name.clone()));
            }
            // A module with no exposures still resolves, answering 405s
            table.index.modules.entry(module.name.clone()).or_default();

            for declaration in &module.exposed {
                table.add_declaration(module, declaration, registry)?;
            }
        }

        tracing::info!(
            "Route table built: {} modules, {} routes",
            table.index.modules.len(),
            table.routes.len()
        );

        Ok(table)
    }

    fn add_declaration(
        &mut self,
        module: &HandlerModule,
        declaration: &str,
        registry: &MiddlewareRegistry,
    ) -> Result<(), RouteError> {
        let (verb, method_name) = parse_declaration(declaration);
        let verb = verb.ok_or_else(|| RouteError::InvalidVerb {
            module: module.name.clone(),
            declaration: declaration.to_string(),
        })?;

        let method = module.methods.get(method_name).ok_or_else(|| RouteError::UnknownMethod {
            module: module.name.clone(),
            method: method_name.to_string(),
        })?;

        let methods = self
            .index
            .modules
            .entry(module.name.clone())
            .or_default()
            .entry(verb)
            .or_default();
        if !methods.insert(method_name.to_string()) {
            return Err(RouteError::DuplicateRoute {
                module: module.name.clone(),
                verb,
                method: method_name.to_string(),
            });
        }

        let params = match &method.params {
            ParamSpec::Source(source) => introspect(source),
            ParamSpec::List(list) => check_params(list),
        }
        .map_err(|source| RouteError::Introspection {
            module: module.name.clone(),
            method: method_name.to_string(),
            source,
        })?;

        let mut middleware = Vec::new();
        for name in params.into_iter().filter(|p| is_middleware_param(p)) {
            let unit = registry.get(&name).ok_or_else(|| RouteError::UnknownMiddleware {
                middleware: name.clone(),
                module: module.name.clone(),
                method: method_name.to_string(),
            })?;
            middleware.push(ResolvedMiddleware {
                name,
                unit: Arc::clone(unit),
            });
        }

        let stack: Vec<String> = middleware.iter().map(|m| m.name.clone()).collect();
        tracing::debug!(
            "Route {} {}.{} -> middleware {:?}",
            verb,
            module.name,
            method_name,
            stack
        );
        // The same method exposed under several verbs shares one stack
        self.index
            .stacks
            .insert(format!("{}.{}", module.name, method_name), stack);

        let key = RouteKey {
            module: module.name.clone(),
            verb,
            method: method_name.to_string(),
        };
        self.routes.insert(
            key.clone(),
            Route {
                key,
                middleware,
                handler: Arc::clone(&method.call),
            },
        );

        Ok(())
    }

    pub fn index(&self) -> &RouteIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.index.modules.contains_key(module)
    }

    /// Middleware stack of `module.method`, empty when it has none
    pub fn stack(&self, module: &str, method: &str) -> &[String] {
        self.index
            .stacks
            .get(&format!("{}.{}", module, method))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve a request's route. `verb` is `None` for HTTP methods the
    /// table never exposes (HEAD, OPTIONS, ...).
    pub fn resolve(&self, module: &str, verb: Option<Verb>, verb_name: &str, method: &str) -> Result<&Route, RouteMiss> {
        let verbs = self.index.modules.get(module).ok_or_else(|| RouteMiss::UnknownModule {
            module: module.to_string(),
        })?;

        let verb = match verb {
            Some(v) if verbs.contains_key(&v) => v,
            _ => {
                return Err(RouteMiss::UnsupportedVerb {
                    module: module.to_string(),
                    verb: verb_name.to_string(),
                })
            }
        };

        let key = RouteKey {
            module: module.to_string(),
            verb,
            method: method.to_string(),
        };
        self.routes.get(&key).ok_or_else(|| RouteMiss::UnknownMethod {
            module: module.to_string(),
            verb: verb_name.to_string(),
            method: method.to_string(),
        })
    }
}
