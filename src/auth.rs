use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use thiserror::Error;

use crate::limits::MAX_HOLDER_ID_LEN;
use crate::model::HolderId;

pub const HOLDER_HEADER: &str = "x-holder-id";
pub const ROLE_HEADER: &str = "x-role";
pub const TENANT_HEADER: &str = "x-tenant";

const COORDINATOR_ROLE: &str = "coordinator";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingToken,
    #[error("bad credentials")]
    BadToken,
    #[error("missing holder id")]
    MissingHolder,
    #[error("holder id too long")]
    HolderTooLong,
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub holder: HolderId,
    pub coordinator: bool,
}

/// Raw credentials as found on a request, before verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct Credentials<'a> {
    pub token: Option<&'a str>,
    pub holder: Option<&'a str>,
    pub role: Option<&'a str>,
}

impl<'a> Credentials<'a> {
    /// `Authorization: Bearer <token>`, `X-Holder-Id`, `X-Role`.
    pub fn from_headers(headers: &'a HeaderMap) -> Self {
        let header = |name| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            token: header(AUTHORIZATION.as_str()).and_then(|v| v.strip_prefix("Bearer ")),
            holder: header(HOLDER_HEADER),
            role: header(ROLE_HEADER),
        }
    }

    /// Fill gaps from a secondary source (query parameters on upgrade).
    pub fn or(self, other: Credentials<'a>) -> Self {
        Self {
            token: self.token.or(other.token),
            holder: self.holder.or(other.holder),
            role: self.role.or(other.role),
        }
    }
}

/// Shared-secret authentication. Identity beyond the token is trusted as
/// supplied by the fronting portal.
#[derive(Debug, Clone)]
pub struct SharedSecret {
    token: String,
}

impl SharedSecret {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub fn verify(&self, creds: Credentials<'_>) -> Result<Identity, AuthError> {
        let token = creds.token.ok_or(AuthError::MissingToken)?;
        if token != self.token {
            return Err(AuthError::BadToken);
        }
        let holder = creds
            .holder
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(AuthError::MissingHolder)?;
        if holder.len() > MAX_HOLDER_ID_LEN {
            return Err(AuthError::HolderTooLong);
        }
        Ok(Identity {
            holder: HolderId::new(holder),
            coordinator: creds
                .role
                .is_some_and(|r| r.eq_ignore_ascii_case(COORDINATOR_ROLE)),
        })
    }
}
