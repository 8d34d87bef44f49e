use std::collections::HashMap;

use axum::http::{header, HeaderMap};

use qgate_core::error::{QgateError, Result};

/// Verified identity of the request's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Token subject; binds field-scoped writes and is injected into calls.
    pub subject: String,
}

impl Caller {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

/// Resolves a bearer token to a caller.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Caller>;
}

/// Fixed token -> subject table from config.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new<I, K, V>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Caller> {
        self.tokens
            .get(token)
            .map(Caller::new)
            .ok_or(QgateError::AuthFailed)
    }
}

/// No `Authorization` header means an anonymous caller. A header that is
/// present but not a valid bearer token is rejected.
pub fn caller_from_headers(
    headers: &HeaderMap,
    verifier: &dyn TokenVerifier,
) -> Result<Option<Caller>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| QgateError::AuthFailed)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(QgateError::AuthFailed)?;
    verifier.verify(token).map(Some)
}
