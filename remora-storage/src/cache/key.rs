//! Cache key derivation.
//!
//! An identity flattens to a single string under a namespace prefix so that
//! the whole cache can be enumerated (and purged) by prefix scan.

use std::fmt;

use remora_core::{EntityKey, Identity, TypeName, KEY_SEPARATOR};

/// A persisted cache key.
///
/// # Format
///
/// ```text
/// <prefix><type name>-<entity key>
/// ```
///
/// The type name is limited to `[A-Za-z0-9_]`, so the first `-` after the
/// prefix always ends it. The entity key may contain anything, separators
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    encoded: String,
    prefix_len: usize,
}

impl CacheKey {
    /// Derive the key for `identity` under `prefix`.
    pub fn derive(prefix: &str, identity: &Identity) -> Self {
        Self::from_parts(prefix, identity.type_name(), identity.key().as_str())
    }

    fn from_parts(prefix: &str, type_name: &str, key: &str) -> Self {
        let mut encoded = String::with_capacity(prefix.len() + type_name.len() + key.len() + 1);
        encoded.push_str(prefix);
        encoded.push_str(type_name);
        encoded.push(KEY_SEPARATOR);
        encoded.push_str(key);
        Self {
            encoded,
            prefix_len: prefix.len(),
        }
    }

    /// Split a persisted key back into type name and entity key.
    ///
    /// Returns `None` if:
    /// - `encoded` does not start with `prefix`
    /// - there is no separator after the prefix
    /// - the type name or entity key part is invalid
    pub fn decode(prefix: &str, encoded: &str) -> Option<(TypeName, EntityKey)> {
        let rest = encoded.strip_prefix(prefix)?;
        let (type_name, key) = rest.split_once(KEY_SEPARATOR)?;
        let type_name = TypeName::new(type_name).ok()?;
        let key = EntityKey::new(key).ok()?;
        Some((type_name, key))
    }

    /// Prefix matching every key of one type name.
    pub fn type_prefix(prefix: &str, type_name: &str) -> String {
        format!("{prefix}{type_name}{KEY_SEPARATOR}")
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// The namespace prefix this key was derived under.
    pub fn prefix(&self) -> &str {
        &self.encoded[..self.prefix_len]
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use remora_core::EntityKind;

    fn type_name_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_]{1,12}"
    }

    fn entity_key_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9-]{1,16}"
    }

    fn identity_of(type_name: &str, key: &str) -> Identity {
        let kind = EntityKind::Registered(TypeName::new(type_name).unwrap());
        Identity::parse(kind, key).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        /// Property: different (type, key) pairs never share a cache key.
        #[test]
        fn prop_derivation_is_injective(
            type1 in type_name_strategy(),
            type2 in type_name_strategy(),
            key1 in entity_key_strategy(),
            key2 in entity_key_strategy(),
        ) {
            let a = CacheKey::derive("remora-config-", &identity_of(&type1, &key1));
            let b = CacheKey::derive("remora-config-", &identity_of(&type2, &key2));

            if (type1 == type2) && (key1 == key2) {
                prop_assert_eq!(a, b);
            } else {
                prop_assert_ne!(a.as_str(), b.as_str(), "Different identities must have different keys");
            }
        }

        /// Property: decode recovers the parts a key was derived from.
        #[test]
        fn prop_decode_recovers_parts(
            type_name in type_name_strategy(),
            key in entity_key_strategy(),
        ) {
            let derived = CacheKey::derive("remora-config-", &identity_of(&type_name, &key));
            let decoded = CacheKey::decode("remora-config-", derived.as_str());

            prop_assert!(decoded.is_some());
            let (decoded_type, decoded_key) = decoded.unwrap();
            prop_assert_eq!(decoded_type.as_str(), type_name.as_str());
            prop_assert_eq!(decoded_key.as_str(), key.as_str());
        }

        /// Property: every derived key lives under its namespace prefix.
        #[test]
        fn prop_key_starts_with_prefix(
            prefix in "[a-z]{1,8}-",
            type_name in type_name_strategy(),
            key in entity_key_strategy(),
        ) {
            let derived = CacheKey::derive(&prefix, &identity_of(&type_name, &key));
            prop_assert!(derived.as_str().starts_with(prefix.as_str()));
            prop_assert_eq!(derived.prefix(), prefix.as_str());
        }
    }
}
