//! Identity handshake sent once by a peer right after connecting.

use clich_core::ClientIdentity;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// The first line a peer sends.
///
/// ```json
/// {"id": "a", "displayName": "Alice", "active": true, "token": "..."}
/// ```
///
/// `token` is only consulted when the daemon has a credential verifier
/// configured. The capitalized keys `ID`, `Name` and `Active` are accepted
/// too, which is what Go clients encoding an untagged struct send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(alias = "ID")]
    pub id: String,

    #[serde(alias = "name", alias = "Name", default)]
    pub display_name: String,

    #[serde(alias = "Active", default = "default_active")]
    pub active: bool,

    /// Bearer credential for daemons that verify admissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Handshake {
    /// Creates a handshake for the given identity without a credential.
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            id: identity.id,
            display_name: identity.display_name,
            active: identity.active,
            token: None,
        }
    }

    /// Attaches a bearer credential.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Decodes and validates a handshake line.
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        let handshake: Handshake =
            serde_json::from_slice(line).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        handshake.identity().validate()?;
        Ok(handshake)
    }

    /// Encodes the handshake as a single line (without the delimiter).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    /// The identity claimed by this handshake.
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            active: self.active,
        }
    }

    /// Splits the handshake into the claimed identity and the credential.
    pub fn into_parts(self) -> (ClientIdentity, Option<String>) {
        let identity = ClientIdentity {
            id: self.id,
            display_name: self.display_name,
            active: self.active,
        };
        (identity, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_handshake() {
        let hs = Handshake::decode(
            br#"{"id":"a","displayName":"Alice","active":true,"token":"t0k"}"#,
        )
        .unwrap();
        assert_eq!(hs.id, "a");
        assert_eq!(hs.display_name, "Alice");
        assert_eq!(hs.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_decode_minimal_handshake() {
        let hs = Handshake::decode(br#"{"id":"b"}"#).unwrap();
        assert_eq!(hs.display_name, "");
        assert!(hs.active);
        assert!(hs.token.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Handshake::decode(b"hello there"),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            Handshake::decode(br#"{"displayName":"no id"}"#),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            Handshake::decode(br#"{"id": 5}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_id() {
        assert!(matches!(
            Handshake::decode(br#"{"id":""}"#),
            Err(ProtocolError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_encode_omits_missing_token() {
        let hs = Handshake::new(ClientIdentity::new("a", "Alice"));
        let json = String::from_utf8(hs.encode().unwrap()).unwrap();
        assert!(json.contains(r#""displayName":"Alice""#));
        assert!(!json.contains("token"));
    }

    #[test]
    fn test_into_parts() {
        let hs = Handshake::new(ClientIdentity::new("a", "Alice")).with_token("secret");
        let (identity, token) = hs.into_parts();
        assert_eq!(identity, ClientIdentity::new("a", "Alice"));
        assert_eq!(token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_decode_go_style_field_names() {
        let hs = Handshake::decode(br#"{"ID":"u1","Name":"Ann","Active":false}"#).unwrap();
        assert_eq!(hs.id, "u1");
        assert_eq!(hs.display_name, "Ann");
        assert!(!hs.active);
    }
}
