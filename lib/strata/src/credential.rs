//! Authentication credentials exchanged during the handshake.
//!
//! Keys are opaque 32-byte values; the fabric only compares them, it never
//! runs the underlying cryptography. Keypair files are JSON with base64
//! encoded key material so operators can move them between hosts.

use std::fmt;
use std::ops::Deref;

use serde::de;
use serde_derive::{Deserialize, Serialize};

pub const KEY_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    InvalidKeyLength(usize),
    MissingSecretKey,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::InvalidKeyLength(length) => {
                write!(f, "Key must have length {}, got {}", KEY_SIZE, length)
            }
            CredentialError::MissingSecretKey => write!(f, "Secret key not set"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// An opaque 32-byte key component.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    #[inline]
    pub fn new(key: [u8; KEY_SIZE]) -> Key {
        Key(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Key, CredentialError> {
        if bytes.len() != KEY_SIZE {
            return Err(CredentialError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Key(key))
    }
}

impl Deref for Key {
    type Target = [u8; KEY_SIZE];

    #[inline]
    fn deref(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "Key(****)")
    }
}

impl serde::Serialize for Key {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Key {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Key, D::Error> {
        let encoded = <String as serde::Deserialize>::deserialize(deserializer)?;
        let decoded = base64::decode(&encoded).map_err(de::Error::custom)?;
        Key::from_slice(&decoded).map_err(de::Error::custom)
    }
}

/// Public key with an optional secret half and a free-form metadata string.
/// Server and client identities carry both halves; peers known only by their
/// public key carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    public_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
}

impl KeyPair {
    #[inline]
    pub fn from_public_key(public_key: Key) -> KeyPair {
        KeyPair {
            public_key,
            secret_key: None,
            metadata: None,
        }
    }

    #[inline]
    pub fn new(public_key: Key, secret_key: Key) -> KeyPair {
        KeyPair {
            public_key,
            secret_key: Some(secret_key),
            metadata: None,
        }
    }

    #[inline]
    pub fn public_key(&self) -> &Key {
        &self.public_key
    }

    #[inline]
    pub fn secret_key(&self) -> Option<&Key> {
        self.secret_key.as_ref()
    }

    #[inline]
    pub fn have_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }

    pub fn set_metadata(&mut self, metadata: &str) {
        self.metadata = Some(metadata.to_string());
    }

    #[inline]
    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    /// The public half only, for distribution to peers.
    pub fn to_public(&self) -> KeyPair {
        KeyPair {
            public_key: self.public_key,
            secret_key: None,
            metadata: self.metadata.clone(),
        }
    }
}

/// PLAIN-mechanism credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNameAndPassword {
    user_name: String,
    password: String,
}

impl UserNameAndPassword {
    #[inline]
    pub fn new(user_name: &str, password: &str) -> UserNameAndPassword {
        UserNameAndPassword {
            user_name: user_name.to_string(),
            password: password.to_string(),
        }
    }

    #[inline]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    #[inline]
    pub fn password(&self) -> &str {
        &self.password
    }
}

/// The credential sum type handed to authenticators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    UserNameAndPassword(UserNameAndPassword),
    KeyPair(KeyPair),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_slice_validates_length() {
        assert!(Key::from_slice(&[0u8; 31]).is_err());
        assert!(Key::from_slice(&[0u8; 33]).is_err());
        assert!(Key::from_slice(&[7u8; 32]).is_ok());
    }

    #[test]
    fn test_keypair_json_round_trip() {
        let mut pair = KeyPair::new(Key::new([1u8; 32]), Key::new([2u8; 32]));
        pair.set_metadata("proxy frontend");

        let encoded = serde_json::to_string(&pair).unwrap();
        let decoded: KeyPair = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, pair);
    }

    #[test]
    fn test_public_half_drops_secret() {
        let pair = KeyPair::new(Key::new([1u8; 32]), Key::new([2u8; 32]));
        let public = pair.to_public();
        assert!(!public.have_secret_key());
        assert_eq!(public.public_key(), pair.public_key());

        let encoded = serde_json::to_string(&public).unwrap();
        assert!(!encoded.contains("secret_key"));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = Key::new([9u8; 32]);
        assert_eq!(format!("{:?}", key), "Key(****)");
    }
}
