use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Provider record as read from the `providers` table. The secret column pair
/// (`api_key`, `api_key_encrypted_at`) is decoded into [`StoredSecret`] at the
/// row boundary so the rest of the crate never infers state from field
/// presence.
#[derive(Clone, Debug)]
pub struct ProviderCredential {
    pub id: Uuid,
    pub name: String,
    pub secret: Option<StoredSecret>,
}

/// Two-state tag for a stored provider secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredSecret {
    /// Pre-encryption value kept verbatim until migrated.
    Plaintext(String),
    /// base64(nonce || ciphertext || tag) plus the migration timestamp.
    Encrypted { blob: String, at: DateTime<Utc> },
}

impl StoredSecret {
    pub fn from_row(api_key: Option<String>, encrypted_at: Option<DateTime<Utc>>) -> Option<Self> {
        let value = api_key?;
        Some(match encrypted_at {
            Some(at) => StoredSecret::Encrypted { blob: value, at },
            None => StoredSecret::Plaintext(value),
        })
    }
}

/// The four operations the vault endpoint dispatches on. Unknown tags are
/// rejected at the boundary with the list of valid actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultAction {
    Encrypt,
    Decrypt,
    GetMasked,
    ReEncryptLegacy,
}

impl VaultAction {
    pub const VALID: &'static str = "encrypt, decrypt, get_masked, re_encrypt_legacy";

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "encrypt" => Some(Self::Encrypt),
            "decrypt" => Some(Self::Decrypt),
            "get_masked" => Some(Self::GetMasked),
            "re_encrypt_legacy" => Some(Self::ReEncryptLegacy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::GetMasked => "get_masked",
            Self::ReEncryptLegacy => "re_encrypt_legacy",
        }
    }
}

/// Masked projection of a provider credential, safe to hand to the UI.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MaskedView {
    pub has_key: bool,
    pub is_encrypted: bool,
    pub masked_key: Option<String>,
}

/// Result of encrypting a caller-supplied value. The caller persists it;
/// the vault does not.
#[derive(Clone, Debug, Serialize)]
pub struct EncryptedValue {
    pub encrypted_key: String,
    pub masked_key: String,
}

/// Result of a successful decrypt.
#[derive(Clone, Debug, Serialize)]
pub struct RevealedKey {
    pub api_key: String,
    pub masked_key: String,
    #[serde(skip)]
    pub provider_name: String,
}

/// Best-effort request provenance recorded in the audit trail.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            ip: "unknown".to_string(),
            user_agent: "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_round_trip() {
        for tag in ["encrypt", "decrypt", "get_masked", "re_encrypt_legacy"] {
            assert_eq!(VaultAction::parse(tag).unwrap().as_str(), tag);
        }
        assert!(VaultAction::parse("rotate").is_none());
        assert!(VaultAction::parse("").is_none());
    }

    #[test]
    fn secret_state_follows_timestamp() {
        assert_eq!(StoredSecret::from_row(None, None), None);
        assert_eq!(
            StoredSecret::from_row(Some("sk-raw".into()), None),
            Some(StoredSecret::Plaintext("sk-raw".into()))
        );
        let at = Utc::now();
        let secret = StoredSecret::from_row(Some("blob".into()), Some(at)).unwrap();
        assert!(matches!(secret, StoredSecret::Encrypted { .. }));
    }
}
