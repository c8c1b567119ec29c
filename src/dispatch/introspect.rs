// Parameter introspection for handler declarations.
//
// Handlers declare their parameters as text, e.g. `({ name, __auth })`.
// The names matter: anything carrying the middleware marker asks the
// route table for that middleware's enrichment value.

use thiserror::Error;

/// Prefix that turns a parameter into a middleware request
pub const MIDDLEWARE_MARKER: &str = "__";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntrospectError {
    #[error("no parameter source to inspect")]
    MissingSource,

    #[error("unbalanced delimiters in '{0}'")]
    Unbalanced(String),

    #[error("invalid parameter name '{0}'")]
    InvalidName(String),

    #[error("rest parameter '{0}' is not supported")]
    RestParameter(String),

    #[error("parameter '{0}' declared twice")]
    Duplicate(String),
}

/// Whether a parameter name requests middleware
pub fn is_middleware_param(name: &str) -> bool {
    name.len() > MIDDLEWARE_MARKER.len() && name.starts_with(MIDDLEWARE_MARKER)
}

/// Ordered parameter names of a handler declaration.
///
/// Accepts `({ a, b })`, `{ a, b }`, `(a, b)` and bare `a, b`. Default
/// values (`a = 1`) and renames (`a: b`) keep the declared key `a`.
pub fn introspect(signature: &str) -> Result<Vec<String>, IntrospectError> {
    let source = signature.trim();
    if source.is_empty() {
        return Err(IntrospectError::MissingSource);
    }

    let inner = strip_wrapper(source, '(', ')')?;
    let inner = strip_wrapper(inner.trim(), '{', '}')?;

    let mut names: Vec<String> = Vec::new();
    for segment in split_top_level(inner, signature)? {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if let Some(rest) = segment.strip_prefix("...") {
            return Err(IntrospectError::RestParameter(rest.trim().to_string()));
        }

        let name = segment
            .split(|c: char| c == '=' || c == ':')
            .next()
            .unwrap_or_default()
            .trim();

        if !is_identifier(name) {
            return Err(IntrospectError::InvalidName(segment.to_string()));
        }
        if names.iter().any(|n| n == name) {
            return Err(IntrospectError::Duplicate(name.to_string()));
        }
        names.push(name.to_string());
    }

    Ok(names)
}

/// Validate an explicit parameter list the same way a parsed one is
pub fn check_params(params: &[String]) -> Result<Vec<String>, IntrospectError> {
    let mut names: Vec<String> = Vec::with_capacity(params.len());
    for name in params {
        if !is_identifier(name) {
            return Err(IntrospectError::InvalidName(name.clone()));
        }
        if names.contains(name) {
            return Err(IntrospectError::Duplicate(name.clone()));
        }
        names.push(name.clone());
    }
    Ok(names)
}

fn strip_wrapper(source: &str, open: char, close: char) -> Result<&str, IntrospectError> {
    if !source.starts_with(open) {
        return Ok(source);
    }
    if source.len() >= 2 && source.ends_with(close) {
        Ok(&source[1..source.len() - 1])
    } else {
        Err(IntrospectError::Unbalanced(source.to_string()))
    }
}

// Split on commas that are not nested inside a default value
fn split_top_level<'a>(inner: &'a str, original: &str) -> Result<Vec<&'a str>, IntrospectError> {
    let mut segments = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(IntrospectError::Unbalanced(original.to_string()));
                }
            }
            ',' if depth == 0 => {
                segments.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(IntrospectError::Unbalanced(original.to_string()));
    }
    segments.push(&inner[start..]);
    Ok(segments)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
