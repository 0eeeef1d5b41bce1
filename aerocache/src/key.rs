use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use shared::{Error, Result};
use std::borrow::Cow;
use std::fmt;

pub const DIGEST_LEN: usize = 32;

/// Number of partitions the digest space is split into.
pub const PARTITIONS: u16 = 4096;

// Particle tags of the store's value model that are valid key types.
const PARTICLE_INTEGER: u8 = 1;
const PARTICLE_STRING: u8 = 3;
const PARTICLE_BLOB: u8 = 4;

/// The caller's key, as one of the store's scalar value types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UserKey {
    Integer(i64),
    String(String),
    Blob(Vec<u8>),
    // Representable values that the store refuses as keys.
    Float(f64),
    Bool(bool),
}

impl UserKey {
    pub fn type_name(&self) -> &'static str {
        match self {
            UserKey::Integer(_) => "integer",
            UserKey::String(_) => "string",
            UserKey::Blob(_) => "blob",
            UserKey::Float(_) => "float",
            UserKey::Bool(_) => "bool",
        }
    }

    /// The identifier handed to the source fetcher.
    pub fn identifier(&self) -> String {
        match self {
            UserKey::Integer(v) => v.to_string(),
            UserKey::String(s) => s.clone(),
            UserKey::Blob(b) => hex::encode(b),
            UserKey::Float(v) => v.to_string(),
            UserKey::Bool(v) => v.to_string(),
        }
    }

    fn particle(&self) -> Result<(u8, Cow<'_, [u8]>)> {
        match self {
            UserKey::Integer(v) => Ok((PARTICLE_INTEGER, Cow::Owned(v.to_be_bytes().to_vec()))),
            UserKey::String(s) => Ok((PARTICLE_STRING, Cow::Borrowed(s.as_bytes()))),
            UserKey::Blob(b) => Ok((PARTICLE_BLOB, Cow::Borrowed(b.as_slice()))),
            other => Err(Error::KeyEncodingUnsupported(other.type_name())),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

impl From<&str> for UserKey {
    fn from(value: &str) -> Self {
        UserKey::String(value.to_string())
    }
}

impl From<String> for UserKey {
    fn from(value: String) -> Self {
        UserKey::String(value)
    }
}

impl From<i64> for UserKey {
    fn from(value: i64) -> Self {
        UserKey::Integer(value)
    }
}

impl From<i32> for UserKey {
    fn from(value: i32) -> Self {
        UserKey::Integer(i64::from(value))
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(value: Vec<u8>) -> Self {
        UserKey::Blob(value)
    }
}

impl From<&[u8]> for UserKey {
    fn from(value: &[u8]) -> Self {
        UserKey::Blob(value.to_vec())
    }
}

impl From<f64> for UserKey {
    fn from(value: f64) -> Self {
        UserKey::Float(value)
    }
}

impl From<bool> for UserKey {
    fn from(value: bool) -> Self {
        UserKey::Bool(value)
    }
}

/// Fixed-size record address derived from namespace, set and user key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Partition owning this digest, from its first two bytes.
    pub fn partition(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]]) % PARTITIONS
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Computes the digest of a (namespace, set, user key) triple.
///
/// Layout fed to SHA-256: length-prefixed namespace, length-prefixed set,
/// the key's particle tag, then the key bytes (integers big-endian). The
/// length prefixes keep `("ab", "c")` and `("a", "bc")` apart.
pub fn digest(namespace: &str, set: &str, user_key: &UserKey) -> Result<Digest> {
    let (particle, bytes) = user_key.particle()?;

    let mut hasher = Sha256::new();
    hasher.update((namespace.len() as u32).to_be_bytes());
    hasher.update(namespace.as_bytes());
    hasher.update((set.len() as u32).to_be_bytes());
    hasher.update(set.as_bytes());
    hasher.update([particle]);
    hasher.update(&bytes);

    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    Ok(Digest(out))
}

/// A fully addressed record key.
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: UserKey,
    digest: Digest,
}

impl Key {
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let set = set.into();
        let user_key = user_key.into();
        let digest = digest(&namespace, &set, &user_key)?;
        Ok(Self {
            namespace,
            set,
            user_key,
            digest,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn user_key(&self) -> &UserKey {
        &self.user_key
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_digest_known_vectors() {
        let iad = digest("test", "flights", &UserKey::from("IAD")).unwrap();
        assert_eq!(
            iad.to_hex(),
            "95e6a3ab7fcf6b46a94ec6ba916c40d723c69b0f889260b4df3dff2eec474bc8"
        );

        let int = digest("test", "flights", &UserKey::Integer(42)).unwrap();
        assert_eq!(
            int.to_hex(),
            "8cc49c81969349ce6bfaf6f346b856fbef88003ac5f8d67d66a9c0164b4c0b2f"
        );
    }

    #[test]
    fn test_digest_separates_key_types() {
        let as_string = digest("test", "flights", &UserKey::from("42")).unwrap();
        let as_int = digest("test", "flights", &UserKey::Integer(42)).unwrap();
        let as_blob = digest("test", "flights", &UserKey::Blob(b"42".to_vec())).unwrap();
        assert_ne!(as_string, as_int);
        assert_ne!(as_string, as_blob);
    }

    #[test]
    fn test_digest_length_prefix_separates_fields() {
        let a = digest("ab", "c", &UserKey::from("k")).unwrap();
        let b = digest("a", "bc", &UserKey::from("k")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unsupported_key_types() {
        let float = digest("test", "flights", &UserKey::Float(1.5));
        assert!(matches!(float, Err(Error::KeyEncodingUnsupported("float"))));

        let boolean = Key::new("test", "flights", true);
        assert!(matches!(boolean, Err(Error::KeyEncodingUnsupported("bool"))));
    }

    #[test]
    fn test_key_carries_digest() {
        let key = Key::new("test", "flights", "SFO").unwrap();
        assert_eq!(key.namespace(), "test");
        assert_eq!(key.set(), "flights");
        assert_eq!(key.user_key(), &UserKey::from("SFO"));
        assert_eq!(
            key.digest(),
            digest("test", "flights", &UserKey::from("SFO")).unwrap()
        );
        assert_eq!(key.digest().to_string().len(), DIGEST_LEN * 2);
    }

    #[test]
    fn test_identifier_rendering() {
        assert_eq!(UserKey::from("IAD").identifier(), "IAD");
        assert_eq!(UserKey::Integer(-7).identifier(), "-7");
        assert_eq!(UserKey::Blob(vec![0xde, 0xad]).identifier(), "dead");
    }

    #[test]
    fn test_user_key_serde_shape() {
        let json = serde_json::to_value(UserKey::from("IAD")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "string", "value": "IAD"}));
        let back: UserKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, UserKey::from("IAD"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_digest_is_deterministic(
            namespace in "[a-z]{1,12}",
            set in "[a-z_]{1,20}",
            key in any::<String>(),
        ) {
            let first = digest(&namespace, &set, &UserKey::String(key.clone())).unwrap();
            let second = digest(&namespace, &set, &UserKey::String(key)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_distinct_keys_give_distinct_digests(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let da = digest("test", "flights", &UserKey::Integer(a)).unwrap();
            let db = digest("test", "flights", &UserKey::Integer(b)).unwrap();
            prop_assert_ne!(da, db);
        }

        #[test]
        fn prop_partition_in_range(key in any::<Vec<u8>>()) {
            let d = digest("test", "flights", &UserKey::Blob(key)).unwrap();
            prop_assert!(d.partition() < PARTITIONS);
        }
    }
}
