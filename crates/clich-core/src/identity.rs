//! Client identity and authenticated principals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IdentityError, IdentityResult};

/// Maximum length of a client id, in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Maximum length of a display name, in bytes.
pub const MAX_DISPLAY_NAME_LEN: usize = 256;

/// Identity claimed by a peer during the handshake.
///
/// Opaque to the hub beyond display purposes. Duplicate ids across
/// connections are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    /// Client-chosen identifier
    pub id: String,

    /// Human-readable name shown to other peers
    #[serde(alias = "name")]
    pub display_name: String,

    /// Presence flag supplied by the client
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ClientIdentity {
    /// Creates an active identity.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            active: true,
        }
    }

    /// Checks the identity against the hub's admission limits.
    pub fn validate(&self) -> IdentityResult<()> {
        if self.id.trim().is_empty() {
            return Err(IdentityError::EmptyId);
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(IdentityError::FieldTooLong {
                field: "id",
                len: self.id.len(),
                max: MAX_ID_LEN,
            });
        }
        if self.display_name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(IdentityError::FieldTooLong {
                field: "displayName",
                len: self.display_name.len(),
                max: MAX_DISPLAY_NAME_LEN,
            });
        }
        Ok(())
    }

    /// Name used in log lines: the display name, or the id when blank.
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.id)
    }
}

/// A principal whose credential was verified upstream of the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account id the credential was issued for
    pub id: String,

    /// Whether the account carries administrator rights
    #[serde(default)]
    pub is_admin: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    /// Returns true if this principal may act as the given identity.
    pub fn may_claim(&self, identity: &ClientIdentity) -> bool {
        self.id == identity.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case() {
        let identity: ClientIdentity =
            serde_json::from_str(r#"{"id":"a","displayName":"Alice","active":false}"#).unwrap();
        assert_eq!(identity.id, "a");
        assert_eq!(identity.display_name, "Alice");
        assert!(!identity.active);
    }

    #[test]
    fn test_deserialize_name_alias_and_default_active() {
        let identity: ClientIdentity = serde_json::from_str(r#"{"id":"b","name":"Bob"}"#).unwrap();
        assert_eq!(identity.display_name, "Bob");
        assert!(identity.active);
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let result = serde_json::from_str::<ClientIdentity>(r#"{"displayName":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_empty_id() {
        let identity = ClientIdentity::new("  ", "Blank");
        assert_eq!(identity.validate(), Err(IdentityError::EmptyId));
    }

    #[test]
    fn test_validate_long_fields() {
        let identity = ClientIdentity::new("x".repeat(MAX_ID_LEN + 1), "ok");
        assert!(matches!(
            identity.validate(),
            Err(IdentityError::FieldTooLong { field: "id", .. })
        ));

        let identity = ClientIdentity::new("ok", "y".repeat(MAX_DISPLAY_NAME_LEN + 1));
        assert!(matches!(
            identity.validate(),
            Err(IdentityError::FieldTooLong {
                field: "displayName",
                ..
            })
        ));
    }

    #[test]
    fn test_label_falls_back_to_id() {
        assert_eq!(ClientIdentity::new("a", "").label(), "a");
        assert_eq!(ClientIdentity::new("a", "Alice").label(), "Alice");
        assert_eq!(ClientIdentity::new("a", "Alice").to_string(), "Alice (a)");
    }

    #[test]
    fn test_principal_may_claim() {
        let principal = Principal::new("a");
        assert!(principal.may_claim(&ClientIdentity::new("a", "Alice")));
        assert!(!principal.may_claim(&ClientIdentity::new("b", "Bob")));
    }
}
