//! CSRF / origin / authorization preflight (spec §4.F), composed the way
//! the teacher composes its own per-request checks in `ws_forwarder.rs`
//! (`validate_token` then a device-type check, each an early return with a
//! typed error response).

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::Response;

use chsk_core::AllowedOrigins;

use crate::response::{bad_request, forbidden, unauthorized};

pub type CsrfTokenFn = Arc<dyn Fn(&HeaderMap, &HashMap<String, String>) -> Option<String> + Send + Sync>;
pub type AuthorizedFn = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

/// Injected security behavior for the two HTTP entry points (spec §4.F).
#[derive(Clone)]
pub struct SecuritySettings {
    /// `None` disables the CSRF check entirely (host's responsibility to
    /// have logged that decision).
    pub csrf_token_fn: Option<CsrfTokenFn>,
    pub allowed_origins: AllowedOrigins,
    /// `None` means "always authorized".
    pub authorized_fn: Option<AuthorizedFn>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            csrf_token_fn: None,
            allowed_origins: AllowedOrigins::All,
            authorized_fn: None,
        }
    }
}

impl std::fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("csrf_enabled", &self.csrf_token_fn.is_some())
            .field("allowed_origins", &self.allowed_origins)
            .field("authorized_fn_set", &self.authorized_fn.is_some())
            .finish()
    }
}

/// Constant-time ASCII comparison; avoids an early-exit byte compare when
/// checking the supplied CSRF token against the reference value.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn header_or_param<'a>(headers: &'a HeaderMap, params: &'a HashMap<String, String>, header_names: &[&str], param_name: &str) -> Option<String> {
    for name in header_names {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            return Some(value.to_owned());
        }
    }
    params.get(param_name).cloned()
}

fn check_csrf(headers: &HeaderMap, params: &HashMap<String, String>, settings: &SecuritySettings) -> Result<(), Response> {
    let Some(csrf_token_fn) = &settings.csrf_token_fn else {
        return Ok(());
    };
    let Some(reference) = csrf_token_fn(headers, params) else {
        return Err(forbidden("CSRF token could not be derived for this request"));
    };
    let supplied = header_or_param(headers, params, &["x-csrf-token", "x-xsrf-token"], "csrf-token");
    match supplied {
        Some(supplied) if constant_time_eq(&supplied, &reference) => Ok(()),
        _ => Err(forbidden("missing or invalid CSRF token")),
    }
}

fn check_origin(headers: &HeaderMap, settings: &SecuritySettings) -> Result<(), Response> {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if let Some(origin) = origin {
        return if settings.allowed_origins.allows(origin) {
            Ok(())
        } else {
            Err(forbidden("origin not allowed"))
        };
    }
    // No Origin header: fall back to a Referer-prefix check.
    let referer = headers.get("referer").and_then(|v| v.to_str().ok());
    match (referer, &settings.allowed_origins) {
        (_, AllowedOrigins::All) => Ok(()),
        (Some(referer), AllowedOrigins::Set(set)) => {
            if set.iter().any(|allowed| referer.starts_with(allowed.as_str()) && referer[allowed.len()..].starts_with('/')) {
                Ok(())
            } else {
                Err(forbidden("referer not allowed"))
            }
        }
        (None, AllowedOrigins::Set(_)) => Err(forbidden("no Origin or Referer header present")),
    }
}

fn check_authorized(parts: &Parts, settings: &SecuritySettings) -> Result<(), Response> {
    match &settings.authorized_fn {
        None => Ok(()),
        Some(authorized_fn) => {
            if authorized_fn(parts) {
                Ok(())
            } else {
                Err(unauthorized("not authorized"))
            }
        }
    }
}

/// Runs CSRF, origin, then authorization checks in order; the first
/// failure short-circuits with its 4xx response.
pub fn preflight(parts: &Parts, params: &HashMap<String, String>, settings: &SecuritySettings) -> Result<(), Response> {
    check_csrf(&parts.headers, params, settings)?;
    check_origin(&parts.headers, settings)?;
    check_authorized(parts, settings)?;
    Ok(())
}

/// `client-id` is mandatory on every entry point; its absence is a
/// middleware/configuration error, not a security failure (spec §4.F).
pub fn require_client_id(params: &HashMap<String, String>) -> Result<String, Response> {
    params
        .get("client-id")
        .filter(|s| !s.is_empty())
        .cloned()
        .ok_or_else(|| bad_request("missing client-id query param"))
}
