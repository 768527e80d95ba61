//! Identity types for naming service entities

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Separator placed between the type name and the key when an identity is
/// flattened into a single string (cache keys, log fields).
pub const KEY_SEPARATOR: char = '-';

/// Identifier of one in-memory proxy instance. Two proxies for the same
/// [`Identity`] always carry different instance ids.
pub type InstanceId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 InstanceId (timestamp-sortable).
pub fn new_instance_id() -> InstanceId {
    Uuid::now_v7()
}

// ============================================================================
// TYPE NAME
// ============================================================================

/// Name of an entity class as known to the naming service.
///
/// Type names are restricted to ASCII alphanumerics and `_`. They therefore
/// never contain [`KEY_SEPARATOR`], which is what makes flattened identities
/// unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "type_name".to_string(),
            });
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(ValidationError::InvalidValue {
                field: "type_name".to_string(),
                value: name.clone(),
                reason: format!("character {bad:?} is not allowed in a type name"),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TypeName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TypeName> for String {
    fn from(value: TypeName) -> Self {
        value.0
    }
}

impl AsRef<str> for TypeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ENTITY KEY
// ============================================================================

/// Opaque, server-issued key of an entity. Never generated client-side.
///
/// Any non-empty string is accepted, separators included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "key".to_string(),
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityKey> for String {
    fn from(value: EntityKey) -> Self {
        value.0
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Entity class discriminator.
///
/// The naming service's well-known classes get their own variant. Classes an
/// application adds at runtime are carried as [`EntityKind::Registered`] and
/// must go through a [`KindRegistry`] first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    App,
    Channel,
    Developer,
    Device,
    Group,
    Team,
    User,
    Version,
    Registered(TypeName),
}

impl EntityKind {
    /// Every well-known kind, in declaration order.
    pub const WELL_KNOWN: [EntityKind; 8] = [
        EntityKind::App,
        EntityKind::Channel,
        EntityKind::Developer,
        EntityKind::Device,
        EntityKind::Group,
        EntityKind::Team,
        EntityKind::User,
        EntityKind::Version,
    ];

    /// The type name sent over the wire and used in cache keys.
    pub fn type_name(&self) -> &str {
        match self {
            EntityKind::App => "App",
            EntityKind::Channel => "Channel",
            EntityKind::Developer => "Developer",
            EntityKind::Device => "Device",
            EntityKind::Group => "Group",
            EntityKind::Team => "Team",
            EntityKind::User => "User",
            EntityKind::Version => "Version",
            EntityKind::Registered(name) => name.as_str(),
        }
    }

    pub fn is_well_known(&self) -> bool {
        !matches!(self, EntityKind::Registered(_))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Factory producing the kind variant for a resolved type name.
pub type KindFactory = fn(&TypeName) -> EntityKind;

/// Maps type-name strings to kind factories.
///
/// This is how a type name discovered at runtime (a push notification, a
/// configuration file, a caller-supplied string) becomes an [`EntityKind`].
/// There is no auto-discovery: names that were never registered are rejected.
///
/// # Example
/// ```
/// use remora_core::{EntityKind, KindRegistry};
///
/// let mut registry = KindRegistry::new();
/// let widget = registry.register("Widget").unwrap();
///
/// assert_eq!(registry.resolve("User").unwrap(), EntityKind::User);
/// assert_eq!(registry.resolve("Widget").unwrap(), widget);
/// assert!(registry.resolve("Gadget").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct KindRegistry {
    factories: HashMap<TypeName, KindFactory>,
}

impl KindRegistry {
    /// Create a registry pre-loaded with the well-known kinds.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_factory_unchecked("App", |_| EntityKind::App);
        registry.register_factory_unchecked("Channel", |_| EntityKind::Channel);
        registry.register_factory_unchecked("Developer", |_| EntityKind::Developer);
        registry.register_factory_unchecked("Device", |_| EntityKind::Device);
        registry.register_factory_unchecked("Group", |_| EntityKind::Group);
        registry.register_factory_unchecked("Team", |_| EntityKind::Team);
        registry.register_factory_unchecked("User", |_| EntityKind::User);
        registry.register_factory_unchecked("Version", |_| EntityKind::Version);
        registry
    }

    /// Create a registry with no kinds at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    fn register_factory_unchecked(&mut self, name: &'static str, factory: KindFactory) {
        // Well-known names are valid identifiers.
        self.factories.insert(TypeName(name.to_string()), factory);
    }

    /// Register an application-defined type name.
    ///
    /// Registering a name that is already known returns the existing kind
    /// and leaves its factory untouched.
    pub fn register(&mut self, name: &str) -> Result<EntityKind, ValidationError> {
        let type_name = TypeName::new(name)?;
        let factory = *self
            .factories
            .entry(type_name.clone())
            .or_insert(|name| EntityKind::Registered(name.clone()));
        Ok(factory(&type_name))
    }

    /// Register (or replace) the factory for a type name.
    pub fn register_factory(&mut self, name: TypeName, factory: KindFactory) {
        self.factories.insert(name, factory);
    }

    /// Resolve a type name to its kind.
    pub fn resolve(&self, name: &str) -> Result<EntityKind, ValidationError> {
        let type_name = TypeName::new(name)?;
        self.factories
            .get(&type_name)
            .map(|factory| factory(&type_name))
            .ok_or_else(|| ValidationError::UnknownEntityType {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        TypeName::new(name)
            .map(|n| self.factories.contains_key(&n))
            .unwrap_or(false)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(TypeName::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// IDENTITY
// ============================================================================

/// (type name, server-issued key) pair naming exactly one remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    kind: EntityKind,
    key: EntityKey,
}

impl Identity {
    pub fn new(kind: EntityKind, key: EntityKey) -> Self {
        Self { kind, key }
    }

    /// Build an identity from a kind and a raw key string.
    pub fn parse(kind: EntityKind, key: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self::new(kind, EntityKey::new(key)?))
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, KEY_SEPARATOR, self.key)
    }
}
