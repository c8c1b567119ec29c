// Convention-driven request dispatch.
//
// Handler modules expose methods through declarations ("get=listSchools"),
// each method names its parameters, and parameters carrying the `__`
// marker pull in middleware of the same name. The route table resolves
// all of that once at startup; the dispatcher and Bolt only read it.

pub mod bolt;
pub mod dispatcher;
pub mod introspect;
pub mod manifest;
pub mod registry;
pub mod response;
pub mod route_table;

pub use bolt::{Bolt, BoltDone, BoltOutcome, BoltState};
pub use dispatcher::{dispatch, parse_body, Dispatcher};
pub use introspect::{introspect, is_middleware_param, IntrospectError, MIDDLEWARE_MARKER};
pub use manifest::{parse_declaration, HandlerArgs, HandlerFn, HandlerMethod, HandlerModule, ParamSpec, Verb};
pub use registry::{
    middleware_fn, Middleware, MiddlewareError, MiddlewareFactory, MiddlewareRegistry, Outcome, RequestContext,
};
pub use response::{
    normalize, normalize_errors, ErrorItem, HandlerResult, Normalized, ResponseEnvelope, SelfHandledReason,
};
pub use route_table::{ResolvedMiddleware, Route, RouteError, RouteIndex, RouteKey, RouteMiss, RouteTable};
