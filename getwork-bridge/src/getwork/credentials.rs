//! Basic-auth credential extraction.

use std::fmt;

use axum::http::{header, HeaderMap};
use base64::Engine;

use crate::error::{Error, Result};

const BASIC_SCHEME: &str = "Basic";

/// Username and password presented with a getwork request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Extract credentials from the request's `Authorization` header.
    ///
    /// Fails with [`Error::NoCredentials`] when the header is absent or uses
    /// another scheme, and [`Error::MalformedCredentials`] when the Basic
    /// payload is not base64 of `username:password`.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(Error::NoCredentials)?
            .to_str()
            .map_err(|e| Error::MalformedCredentials(e.to_string()))?;

        let encoded = value
            .strip_prefix(BASIC_SCHEME)
            .ok_or(Error::NoCredentials)?
            .trim();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::MalformedCredentials(e.to_string()))?;
        let decoded =
            String::from_utf8(decoded).map_err(|e| Error::MalformedCredentials(e.to_string()))?;

        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| Error::MalformedCredentials("missing ':' separator".into()))?;

        Ok(Self::new(username, password))
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
