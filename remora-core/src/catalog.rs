//! Error catalog
//!
//! The closed set of named failure conditions. Each entry has a machine code,
//! a message template with `:name` placeholders, a responsibility
//! classification and remediation text. Nothing here has behavior beyond
//! lookup and template substitution.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// RESPONSIBILITY
// ============================================================================

/// Who has to act on a failure.
///
/// Serialized with the naming service's historical `kind` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Responsibility {
    /// Missing or malformed parameters, wrong arity, bad types.
    #[serde(rename = "developer")]
    CallerMisuse,
    /// Unknown service version, malformed descriptor, unexpected payload.
    #[serde(rename = "sio")]
    Internal,
    /// Connectivity down, transport not ready, no reply in time.
    #[serde(rename = "network")]
    Network,
}

impl fmt::Display for Responsibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Responsibility::CallerMisuse => f.write_str("caller misuse"),
            Responsibility::Internal => f.write_str("internal"),
            Responsibility::Network => f.write_str("network"),
        }
    }
}

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Service / transport
    // ========================================================================
    ServiceVersionUnknown,
    NetworkError,
    WebsocketNotReady,
    UnknownError,
    UnknownRpcError,
    RpcTimeout,
    ServiceNameMissing,
    ServiceDescriptorLoadError,
    /// Server answered with a payload this layer cannot interpret.
    UnexpectedResponse,

    // ========================================================================
    // Parameters
    // ========================================================================
    ParamMissing,
    ParamsLengthMismatch,
    ParamTypeMismatch,
    RpcParamFunctionError,
    MessageNotJson,
    FileParamsMissing,
    /// Type name was never registered with the kind registry.
    EntityTypeUnknown,

    // ========================================================================
    // Session / identity
    // ========================================================================
    AuthRequired,
    ChannelNameMissing,
    ChannelAppIdMissing,
    NoAppId,
    DeveloperNotLoggedIn,
    NoDeviceId,
    NoCurrentUser,
    UserNotAuthenticated,

    // ========================================================================
    // Capabilities
    // ========================================================================
    PicOpNotSupported,
    PushNotificationsNotSupported,
    UnableReadFile,
}

impl ErrorCode {
    /// Every catalog entry.
    pub const ALL: [ErrorCode; 27] = [
        ErrorCode::ServiceVersionUnknown,
        ErrorCode::NetworkError,
        ErrorCode::WebsocketNotReady,
        ErrorCode::UnknownError,
        ErrorCode::UnknownRpcError,
        ErrorCode::RpcTimeout,
        ErrorCode::ServiceNameMissing,
        ErrorCode::ServiceDescriptorLoadError,
        ErrorCode::UnexpectedResponse,
        ErrorCode::ParamMissing,
        ErrorCode::ParamsLengthMismatch,
        ErrorCode::ParamTypeMismatch,
        ErrorCode::RpcParamFunctionError,
        ErrorCode::MessageNotJson,
        ErrorCode::FileParamsMissing,
        ErrorCode::EntityTypeUnknown,
        ErrorCode::AuthRequired,
        ErrorCode::ChannelNameMissing,
        ErrorCode::ChannelAppIdMissing,
        ErrorCode::NoAppId,
        ErrorCode::DeveloperNotLoggedIn,
        ErrorCode::NoDeviceId,
        ErrorCode::NoCurrentUser,
        ErrorCode::UserNotAuthenticated,
        ErrorCode::PicOpNotSupported,
        ErrorCode::PushNotificationsNotSupported,
        ErrorCode::UnableReadFile,
    ];

    /// Machine code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ServiceVersionUnknown => "SERVICE_VERSION_UNKNOWN",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::WebsocketNotReady => "WEBSOCKET_NOT_READY",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::UnknownRpcError => "UNKNOWN_RPC_ERROR",
            ErrorCode::RpcTimeout => "RPC_TIMEOUT",
            ErrorCode::ServiceNameMissing => "SERVICE_NAME_MISSING",
            ErrorCode::ServiceDescriptorLoadError => "SERVICE_DESCRIPTOR_LOAD_ERROR",
            ErrorCode::UnexpectedResponse => "UNEXPECTED_RESPONSE",
            ErrorCode::ParamMissing => "PARAM_MISSING",
            ErrorCode::ParamsLengthMismatch => "PARAMS_LENGTH_MISMATCH",
            ErrorCode::ParamTypeMismatch => "PARAM_TYPE_MISMATCH",
            ErrorCode::RpcParamFunctionError => "RPC_PARAM_FUNCTION_ERROR",
            ErrorCode::MessageNotJson => "MESSAGE_NOT_JSON",
            ErrorCode::FileParamsMissing => "FILE_PARAMS_MISSING",
            ErrorCode::EntityTypeUnknown => "ENTITY_TYPE_UNKNOWN",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::ChannelNameMissing => "CHANNEL_NAME_MISSING",
            ErrorCode::ChannelAppIdMissing => "CHANNEL_APP_ID_MISSING",
            ErrorCode::NoAppId => "NO_APP_ID",
            ErrorCode::DeveloperNotLoggedIn => "DEVELOPER_NOT_LOGGED_IN",
            ErrorCode::NoDeviceId => "NO_DEVICE_ID",
            ErrorCode::NoCurrentUser => "NO_CURRENT_USER",
            ErrorCode::UserNotAuthenticated => "USER_NOT_AUTHENTICATED",
            ErrorCode::PicOpNotSupported => "PIC_OP_NOT_SUPPORTED",
            ErrorCode::PushNotificationsNotSupported => "PUSH_NOTIFICATIONS_NOT_SUPPORTED",
            ErrorCode::UnableReadFile => "UNABLE_READ_FILE",
        }
    }

    /// Look up a catalog entry by its machine code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Human-readable message with `:name` placeholders.
    pub fn message_template(&self) -> &'static str {
        match self {
            ErrorCode::ServiceVersionUnknown => {
                "The SDK doesn't know which version of the service is to be used"
            }
            ErrorCode::NetworkError => "The request could not be made due to the network being down",
            ErrorCode::WebsocketNotReady => {
                "The request could not be made as the websocket is not ready yet"
            }
            ErrorCode::UnknownError => "Unknown error",
            ErrorCode::UnknownRpcError => "Unknown RPC error",
            ErrorCode::RpcTimeout => {
                "RPC request has timed out as there was no reply from the server"
            }
            ErrorCode::ServiceNameMissing => "Service name is missing",
            ErrorCode::ServiceDescriptorLoadError => {
                "Error loading service descriptor from the server"
            }
            ErrorCode::UnexpectedResponse => "Unexpected response from ':method': :reason",
            ErrorCode::ParamMissing => "Mandatory parameter ':name' is missing",
            ErrorCode::ParamsLengthMismatch => {
                "The method was passed :actual params instead of the expected :expected"
            }
            ErrorCode::ParamTypeMismatch => {
                "Parameter ':name' data type mismatch. Expected ':expected', actual ':actual'"
            }
            ErrorCode::RpcParamFunctionError => {
                "Parameter number :index (:name) is a function, but only the first parameter must be a function"
            }
            ErrorCode::MessageNotJson => "message is not a JSON object",
            ErrorCode::FileParamsMissing => "File or data parameters are missing",
            ErrorCode::EntityTypeUnknown => "Entity type ':name' is not registered",
            ErrorCode::AuthRequired => "This request requires an authenticated :kind session",
            ErrorCode::ChannelNameMissing => "Channel name is missing",
            ErrorCode::ChannelAppIdMissing => "Channel appId is missing",
            ErrorCode::NoAppId => "App ID not found",
            ErrorCode::DeveloperNotLoggedIn => "Developer is not logged in",
            ErrorCode::NoDeviceId => "Device ID not found",
            ErrorCode::NoCurrentUser => "User ID not found",
            ErrorCode::UserNotAuthenticated => "User not authenticated",
            ErrorCode::PicOpNotSupported => {
                "This class of object does not support picture operations"
            }
            ErrorCode::PushNotificationsNotSupported => {
                "Push Notifications are not supported in this execution environment"
            }
            ErrorCode::UnableReadFile => "Unable to read selected file",
        }
    }

    pub fn responsibility(&self) -> Responsibility {
        match self {
            ErrorCode::NetworkError | ErrorCode::WebsocketNotReady | ErrorCode::RpcTimeout => {
                Responsibility::Network
            }

            ErrorCode::ServiceVersionUnknown
            | ErrorCode::UnknownError
            | ErrorCode::UnknownRpcError
            | ErrorCode::UnexpectedResponse
            | ErrorCode::ChannelAppIdMissing
            | ErrorCode::NoDeviceId => Responsibility::Internal,

            ErrorCode::ServiceNameMissing
            | ErrorCode::ServiceDescriptorLoadError
            | ErrorCode::ParamMissing
            | ErrorCode::ParamsLengthMismatch
            | ErrorCode::ParamTypeMismatch
            | ErrorCode::RpcParamFunctionError
            | ErrorCode::MessageNotJson
            | ErrorCode::FileParamsMissing
            | ErrorCode::EntityTypeUnknown
            | ErrorCode::AuthRequired
            | ErrorCode::ChannelNameMissing
            | ErrorCode::NoAppId
            | ErrorCode::DeveloperNotLoggedIn
            | ErrorCode::NoCurrentUser
            | ErrorCode::UserNotAuthenticated
            | ErrorCode::PicOpNotSupported
            | ErrorCode::PushNotificationsNotSupported
            | ErrorCode::UnableReadFile => Responsibility::CallerMisuse,
        }
    }

    /// Remediation guidance.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorCode::ServiceVersionUnknown => {
                "If the service name is not misspelt, contact the service operator"
            }
            ErrorCode::NetworkError => "Check network connectivity from your device",
            ErrorCode::WebsocketNotReady => {
                "The websocket should connect automatically within some time"
            }
            ErrorCode::UnknownError => {
                "Contact the service operator with a description of what caused the error"
            }
            ErrorCode::UnknownRpcError => "Fix the RPC service to return a valid error object",
            ErrorCode::RpcTimeout => {
                "Check if this was caused by network connectivity issues. If not, the service might be down. The timeout is configured with rpc_timeout"
            }
            ErrorCode::ServiceNameMissing => "Provide the service name",
            ErrorCode::ServiceDescriptorLoadError => {
                "Service name is most likely misspelt. If not, contact the service operator"
            }
            ErrorCode::UnexpectedResponse => {
                "Check that client and service agree on the naming protocol version"
            }
            ErrorCode::ParamMissing => "Provide the required parameter during the method call",
            ErrorCode::ParamsLengthMismatch => {
                "Check the number of parameters you are passing to the method"
            }
            ErrorCode::ParamTypeMismatch => "Correct the data type of the parameter",
            ErrorCode::RpcParamFunctionError => "Ensure that only the first parameter is a function",
            ErrorCode::MessageNotJson => "Use a valid JSON object instead of basic data types",
            ErrorCode::FileParamsMissing => "File or data parameters are missing",
            ErrorCode::EntityTypeUnknown => {
                "Register the type name with the kind registry before using it"
            }
            ErrorCode::AuthRequired => "Retry the request with a valid session",
            ErrorCode::ChannelNameMissing => "Provide the channel name",
            ErrorCode::ChannelAppIdMissing => {
                "Potential client bug: attempting to get a channel without an appId"
            }
            ErrorCode::NoAppId => "Use a valid App ID",
            ErrorCode::DeveloperNotLoggedIn => "Retry the request after Developer login",
            ErrorCode::NoDeviceId => "Might be a bug in device allocation",
            ErrorCode::NoCurrentUser => "Retry with a valid User ID",
            ErrorCode::UserNotAuthenticated => "Retry the request after User login",
            ErrorCode::PicOpNotSupported => {
                "This class of object does not support picture operations"
            }
            ErrorCode::PushNotificationsNotSupported => {
                "Build the application for an environment with push notification support"
            }
            ErrorCode::UnableReadFile => {
                "File is not provided or the platform does not support this operation"
            }
        }
    }

    /// Render the message template with the given parameters.
    pub fn render(&self, params: &[(&str, &str)]) -> String {
        render_template(self.message_template(), params)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace `:name` placeholders with parameter values.
///
/// A placeholder is `:` followed by one or more ASCII alphanumerics or `_`.
/// Placeholders with no matching parameter are left as they are.
pub fn render_template(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];

        match params.iter().find(|(k, _)| !name.is_empty() && *k == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push(':');
                out.push_str(name);
            }
        }
        rest = &after[name_len..];
    }
    out.push_str(rest);
    out
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: text without a `:` renders unchanged.
        #[test]
        fn prop_plain_text_is_untouched(
            text in "[A-Za-z0-9 '.,_-]{0,40}",
            value in "[a-z]{0,8}",
        ) {
            prop_assert_eq!(render_template(&text, &[("name", value.as_str())]), text);
        }

        /// Property: a known placeholder is replaced by its value.
        #[test]
        fn prop_placeholder_is_substituted(
            before in "[A-Za-z ]{0,12}",
            after in "[ .]{0,6}",
            value in "[A-Za-z0-9 ]{0,12}",
        ) {
            let template = format!("{before}:name{after}");
            prop_assert_eq!(
                render_template(&template, &[("name", value.as_str())]),
                format!("{before}{value}{after}")
            );
        }

        /// Property: every catalog entry resolves back from its code.
        #[test]
        fn prop_codes_round_trip(index in 0..ErrorCode::ALL.len()) {
            let code = ErrorCode::ALL[index];
            prop_assert_eq!(ErrorCode::from_code(code.as_str()), Some(code));
        }
    }
}
