pub mod auth;
pub mod request;

use crate::app::Services;
use crate::dispatch::{MiddlewareFactory, MiddlewareRegistry};

/// Every middleware unit handlers may name, keyed by parameter name
pub const FACTORIES: &[(&str, MiddlewareFactory<Services>)] = &[
    ("__auth", auth::auth),
    ("__superAdmin", auth::super_admin),
    ("__schoolAdmin", auth::school_admin),
    ("__headers", request::headers),
    ("__query", request::query),
    ("__device", request::device),
];

pub fn registry(services: &Services) -> MiddlewareRegistry {
    MiddlewareRegistry::from_factories(services, FACTORIES.iter().copied())
}
