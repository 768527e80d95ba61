//! Error types for remora operations

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::catalog::{ErrorCode, Responsibility};

/// Structured failure as delivered by the transport or the server.
///
/// This is the uniform shape every failure takes when surfaced to a caller;
/// [`RemoraError::to_record`] converts local failures into it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_option"
    )]
    pub kind: Option<Responsibility>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_option"
    )]
    pub suggest: Option<String>,
}

/// Optional field that reads as `None` when the value has the wrong shape.
fn lenient_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

impl ErrorRecord {
    /// Build a record from a catalog entry, rendering its template.
    pub fn from_code(code: ErrorCode, params: &[(&str, &str)]) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: code.render(params),
            kind: Some(code.responsibility()),
            suggest: Some(code.suggestion().to_string()),
        }
    }

    /// Interpret an error value returned by an RPC service.
    ///
    /// Anything that is not an object with a string `code` and `message`
    /// becomes `UNKNOWN_RPC_ERROR`.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<ErrorRecord>(value) {
            Ok(record) if !record.code.is_empty() => record,
            _ => Self::from_code(ErrorCode::UnknownRpcError, &[]),
        }
    }

    /// The catalog entry for this record's code, if it has one.
    pub fn catalog_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(&self.code)
    }

    /// Responsibility as reported, else as catalogued, else internal.
    pub fn responsibility(&self) -> Responsibility {
        self.kind
            .or_else(|| self.catalog_code().map(|c| c.responsibility()))
            .unwrap_or(Responsibility::Internal)
    }

    pub fn is_timeout(&self) -> bool {
        self.catalog_code() == Some(ErrorCode::RpcTimeout)
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

impl From<ErrorCode> for ErrorRecord {
    fn from(code: ErrorCode) -> Self {
        Self::from_code(code, &[])
    }
}

/// Caller misuse detected before anything was dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Entity type not registered: {name}")]
    UnknownEntityType { name: String },
}

/// The server answered, but not with anything this layer understands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{method} returned {found}, expected an object")]
    NotAnObject { method: String, found: String },

    #[error("{method} returned {found}, expected a list")]
    NotAList { method: String, found: String },

    #[error("{method} returned an entity without a key")]
    MissingKey { method: String },

    #[error("{method} returned a malformed entity: {reason}")]
    Malformed { method: String, reason: String },
}

impl PayloadError {
    pub fn method(&self) -> &str {
        match self {
            PayloadError::NotAnObject { method, .. }
            | PayloadError::NotAList { method, .. }
            | PayloadError::MissingKey { method }
            | PayloadError::Malformed { method, .. } => method,
        }
    }
}

/// Persistent key-value store failures.
///
/// The config cache absorbs these; they only reach a caller when a store is
/// opened or used directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to open store: {reason}")]
    Open { reason: String },

    #[error("Store transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all remora errors.
#[derive(Debug, Clone, Error)]
pub enum RemoraError {
    #[error("RPC error: {0}")]
    Rpc(#[from] ErrorRecord),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RemoraError {
    /// Convert into the uniform catalog shape.
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            RemoraError::Rpc(record) => record.clone(),
            RemoraError::Validation(err) => match err {
                ValidationError::RequiredFieldMissing { field } => {
                    ErrorRecord::from_code(ErrorCode::ParamMissing, &[("name", field.as_str())])
                }
                ValidationError::InvalidValue {
                    field,
                    value,
                    reason,
                } => ErrorRecord::from_code(
                    ErrorCode::ParamTypeMismatch,
                    &[
                        ("name", field.as_str()),
                        ("expected", reason.as_str()),
                        ("actual", value.as_str()),
                    ],
                ),
                ValidationError::UnknownEntityType { name } => {
                    ErrorRecord::from_code(ErrorCode::EntityTypeUnknown, &[("name", name.as_str())])
                }
            },
            RemoraError::Payload(err) => {
                let reason = err.to_string();
                ErrorRecord::from_code(
                    ErrorCode::UnexpectedResponse,
                    &[("method", err.method()), ("reason", reason.as_str())],
                )
            }
            RemoraError::Store(_) | RemoraError::Config(_) => {
                let mut record = ErrorRecord::from_code(ErrorCode::UnknownError, &[]);
                record.message = self.to_string();
                record
            }
        }
    }

    pub fn responsibility(&self) -> Responsibility {
        self.to_record().responsibility()
    }

    /// True when the failure is the catalog entry `code`.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.to_record().is(code)
    }
}

/// Result type alias for remora operations.
pub type RemoraResult<T> = Result<T, RemoraError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_record_keeps_code_with_unknown_kind() {
        let record = ErrorRecord::from_value(json!({
            "code": "AUTH_REQUIRED",
            "message": "Log in first",
            "kind": "server",
            "suggest": 42,
        }));
        assert_eq!(record.code, "AUTH_REQUIRED");
        assert_eq!(record.message, "Log in first");
        assert_eq!(record.kind, None);
        assert_eq!(record.suggest, None);
        assert_eq!(record.responsibility(), Responsibility::CallerMisuse);
    }

    #[test]
    fn test_server_record_without_message_is_unknown() {
        let record = ErrorRecord::from_value(json!({"code": "AUTH_REQUIRED"}));
        assert!(record.is(ErrorCode::UnknownRpcError));
    }

    #[test]
    fn test_record_from_code_renders_template() {
        let record = ErrorRecord::from_code(ErrorCode::ParamMissing, &[("name", "key")]);
        assert_eq!(record.code, "PARAM_MISSING");
        assert_eq!(record.message, "Mandatory parameter 'key' is missing");
        assert_eq!(record.kind, Some(Responsibility::CallerMisuse));
        assert!(record.suggest.is_some());
    }

    #[test]
    fn test_record_from_server_value() {
        let record = ErrorRecord::from_value(json!({
            "code": "AUTH_REQUIRED",
            "message": "This request requires an authenticated user session",
            "kind": "developer"
        }));
        assert_eq!(record.catalog_code(), Some(ErrorCode::AuthRequired));
        assert_eq!(record.responsibility(), Responsibility::CallerMisuse);
        assert_eq!(record.suggest, None);
    }

    #[test]
    fn test_record_from_garbage_is_unknown_rpc_error() {
        assert!(ErrorRecord::from_value(json!("boom")).is(ErrorCode::UnknownRpcError));
        assert!(ErrorRecord::from_value(json!({"code": ""})).is(ErrorCode::UnknownRpcError));
    }

    #[test]
    fn test_uncatalogued_code_defaults_to_internal() {
        let record = ErrorRecord {
            code: "SERVER_ON_FIRE".to_string(),
            message: "hot".to_string(),
            kind: None,
            suggest: None,
        };
        assert_eq!(record.catalog_code(), None);
        assert_eq!(record.responsibility(), Responsibility::Internal);
    }

    #[test]
    fn test_timeout_detection() {
        assert!(ErrorRecord::from(ErrorCode::RpcTimeout).is_timeout());
        assert!(!ErrorRecord::from(ErrorCode::NetworkError).is_timeout());
    }

    #[test]
    fn test_validation_errors_map_to_catalog() {
        let err = RemoraError::from(ValidationError::UnknownEntityType {
            name: "Gadget".to_string(),
        });
        let record = err.to_record();
        assert!(record.is(ErrorCode::EntityTypeUnknown));
        assert_eq!(record.message, "Entity type 'Gadget' is not registered");
        assert_eq!(err.responsibility(), Responsibility::CallerMisuse);
    }

    #[test]
    fn test_payload_errors_are_internal() {
        let err = RemoraError::from(PayloadError::NotAList {
            method: "find".to_string(),
            found: "object".to_string(),
        });
        let record = err.to_record();
        assert!(record.is(ErrorCode::UnexpectedResponse));
        assert!(record.message.starts_with("Unexpected response from 'find'"));
        assert_eq!(err.responsibility(), Responsibility::Internal);
    }

    #[test]
    fn test_remora_error_from_variants() {
        let rpc = RemoraError::from(ErrorRecord::from(ErrorCode::NetworkError));
        assert!(matches!(rpc, RemoraError::Rpc(_)));
        assert!(rpc.is(ErrorCode::NetworkError));

        let store = RemoraError::from(StoreError::LockPoisoned);
        assert!(matches!(store, RemoraError::Store(_)));
        assert!(store.to_record().message.contains("lock poisoned"));

        let config = RemoraError::from(ConfigError::MissingRequired {
            field: "service_name".to_string(),
        });
        assert!(matches!(config, RemoraError::Config(_)));
    }

    #[test]
    fn test_error_record_display() {
        let record = ErrorRecord::from(ErrorCode::NetworkError);
        assert_eq!(
            record.to_string(),
            "NETWORK_ERROR: The request could not be made due to the network being down"
        );
    }
}
