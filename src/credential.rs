//! # Worker credentials and the verification collaborator.
//!
//! A [`Credential`] is the opaque secret a worker uses to authenticate to the
//! messaging service. The supervisor only stores and forwards it: it reaches
//! the worker through an environment variable and never appears in `Debug`
//! output, logs, or process arguments.
//!
//! [`CredentialVerifier`] is called once at creation time. The built-in
//! [`TokenShapeVerifier`] checks the `<numeric id>:<secret>` layout offline;
//! a deployment that can reach the messaging service plugs in a verifier that
//! actually logs in.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque messaging credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into().trim().to_string())
    }

    /// Returns the secret itself. Only the launcher should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Public prefix of the credential (the part before `:`), safe to log.
    pub fn public_part(&self) -> Option<&str> {
        self.0.split_once(':').map(|(head, _)| head)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.public_part() {
            Some(head) => write!(f, "Credential({head}:***)"),
            None => f.write_str("Credential(***)"),
        }
    }
}

/// What the verifier learned about the account behind a credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential is malformed: {0}")]
    Malformed(&'static str),

    #[error("credential was refused: {0}")]
    Refused(String),
}

/// Verification collaborator, consulted before a worker record is created.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    async fn verify(&self, credential: &Credential) -> Result<Identity, CredentialError>;
}

/// Offline verifier for `123456789:AAH...` style bot tokens.
#[derive(Clone, Copy, Debug)]
pub struct TokenShapeVerifier {
    min_secret_len: usize,
}

impl TokenShapeVerifier {
    pub fn new() -> Self {
        Self { min_secret_len: 30 }
    }

    /// Overrides the minimal accepted secret length.
    pub fn with_min_secret_len(mut self, len: usize) -> Self {
        self.min_secret_len = len;
        self
    }
}

impl Default for TokenShapeVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialVerifier for TokenShapeVerifier {
    async fn verify(&self, credential: &Credential) -> Result<Identity, CredentialError> {
        let (head, secret) = credential
            .expose()
            .split_once(':')
            .ok_or(CredentialError::Malformed("missing ':' separator"))?;

        let account_id: i64 = head
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(CredentialError::Malformed("account id is not a positive number"))?;

        if secret.len() < self.min_secret_len {
            return Err(CredentialError::Malformed("secret part is too short"));
        }
        if !secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CredentialError::Malformed("secret has unexpected characters"));
        }

        Ok(Identity {
            account_id,
            ..Identity::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_secret() {
        let c = Credential::new("123:very-secret-value");
        let shown = format!("{c:?}");
        assert_eq!(shown, "Credential(123:***)");
        assert!(!shown.contains("very-secret"));
    }

    #[tokio::test]
    async fn shape_verifier_accepts_bot_token() {
        let v = TokenShapeVerifier::new();
        let id = v
            .verify(&Credential::new("1234567890:ABCdefGHIjklMNOpqrsTUVwxyz_0123456"))
            .await
            .unwrap();
        assert_eq!(id.account_id, 1234567890);
    }

    #[tokio::test]
    async fn shape_verifier_rejects_garbage() {
        let v = TokenShapeVerifier::new();
        for bad in ["nocolon", "abc:ABCdefGHIjklMNOpqrsTUVwxyz_0123456", "12:short", "12:ABCdefGHIjklMNOpqrsTUVwxyz 0123456"] {
            assert!(v.verify(&Credential::new(bad)).await.is_err(), "{bad}");
        }
    }
}
