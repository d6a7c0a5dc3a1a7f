//! Admission credentials.
//!
//! The hub does not issue or sign credentials. It consumes a
//! [`CredentialVerifier`] that turns a bearer credential into a
//! [`Principal`], and admits a connection only when that principal matches
//! the identity claimed in the handshake.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use clich_core::{ClientIdentity, Principal};

use crate::config::AuthConfig;

/// Capability: verify a bearer credential.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns the principal the credential was issued for.
    async fn verify(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// Errors that can occur during admission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No credential presented")]
    MissingCredential,

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Principal {principal} may not connect as {claimed}")]
    IdentityMismatch { claimed: String, principal: String },

    #[error("Credential verifier unavailable: {0}")]
    Unavailable(String),
}

/// Verifies the handshake credential and checks it against the claimed identity.
pub async fn authorize(
    verifier: &dyn CredentialVerifier,
    identity: &ClientIdentity,
    credential: Option<&str>,
) -> Result<Principal, AuthError> {
    let credential = credential
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingCredential)?;

    let principal = verifier.verify(credential).await?;

    if !principal.may_claim(identity) {
        return Err(AuthError::IdentityMismatch {
            claimed: identity.id.clone(),
            principal: principal.id,
        });
    }

    Ok(principal)
}

/// Verifier backed by the `[[auth.tokens]]` table of the daemon config.
pub struct StaticTokenVerifier {
    tokens: HashMap<Vec<u8>, Principal>,
}

impl StaticTokenVerifier {
    /// Builds a verifier, or `None` when the table is empty.
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let tokens = config
            .tokens
            .iter()
            .map(|entry| {
                let principal = Principal {
                    id: entry.principal.clone(),
                    is_admin: entry.admin,
                };
                (entry.token.as_bytes().to_vec(), principal)
            })
            .collect();
        Some(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Principal, AuthError> {
        // Compare against every entry so timing doesn't reveal which one matched
        let mut found = None;
        for (token, principal) in &self.tokens {
            if constant_time_eq(token, credential.as_bytes()) {
                found = Some(principal);
            }
        }
        found.cloned().ok_or(AuthError::InvalidCredential)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
