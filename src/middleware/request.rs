// Request-shaped enrichments: raw headers, query parameters, client device.

use axum::http::HeaderMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::app::Services;
use crate::dispatch::{middleware_fn, Middleware, MiddlewareError, Outcome, RequestContext};

pub fn headers(_services: &Services) -> Arc<dyn Middleware> {
    middleware_fn(|ctx: RequestContext| async move {
        Ok::<_, MiddlewareError>(Outcome::Next(Value::Object(header_map(&ctx.headers))))
    })
}

pub fn query(_services: &Services) -> Arc<dyn Middleware> {
    middleware_fn(|ctx: RequestContext| async move {
        let query: Map<String, Value> = ctx
            .query
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Ok::<_, MiddlewareError>(Outcome::Next(Value::Object(query)))
    })
}

pub fn device(_services: &Services) -> Arc<dyn Middleware> {
    middleware_fn(|ctx: RequestContext| async move {
        let agent = header_str(&ctx.headers, "user-agent").unwrap_or("unknown");
        Ok::<_, MiddlewareError>(Outcome::Next(json!({
            "ip": client_ip(&ctx.headers),
            "agent": agent,
        })))
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Non-UTF-8 header values are skipped; repeated headers keep the last value
fn header_map(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect()
}

/// First hop of x-forwarded-for, then x-real-ip
fn client_ip(headers: &HeaderMap) -> Value {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(|ip| Value::String(ip.to_string()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), json!("10.0.0.2"));

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), json!("203.0.113.9"));

        assert_eq!(client_ip(&HeaderMap::new()), Value::Null);
    }

    #[test]
    fn headers_become_an_object() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "curl/8.0".parse().unwrap());
        headers.insert("x-trace", "abc".parse().unwrap());

        let map = header_map(&headers);
        assert_eq!(map.get("user-agent"), Some(&json!("curl/8.0")));
        assert_eq!(map.get("x-trace"), Some(&json!("abc")));
    }
}
