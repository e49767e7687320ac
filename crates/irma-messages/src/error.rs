//! Error kinds and the wire error envelope.
//!
//! Error *kinds* are a closed taxonomy shared by both the client-facing and
//! the requestor-facing API; the envelope carries the kind name, a canned
//! description, an optional detail message and (in verbose servers) a
//! stacktrace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed taxonomy of session error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "protocolVersionNotSupported")]
    ProtocolVersionNotSupported,
    #[serde(rename = "invalidRequest")]
    InvalidRequest,
    #[serde(rename = "unknownAction")]
    UnknownAction,
    #[serde(rename = "transport")]
    Transport,
    #[serde(rename = "https")]
    Https,
    #[serde(rename = "serverResponse")]
    ServerResponse,
    #[serde(rename = "sessionUnknown")]
    SessionUnknown,
    #[serde(rename = "unexpectedRequest")]
    UnexpectedRequest,
    #[serde(rename = "unauthorized")]
    Unauthorized,
    #[serde(rename = "irmaUnauthorized")]
    IrmaUnauthorized,
    #[serde(rename = "pairingRequired")]
    PairingRequired,
    #[serde(rename = "pairingRejected")]
    PairingRejected,
    #[serde(rename = "crypto")]
    Crypto,
    #[serde(rename = "revocation")]
    Revocation,
    #[serde(rename = "keyshare")]
    Keyshare,
    #[serde(rename = "keyshareUnenrolled")]
    KeyshareUnenrolled,
    #[serde(rename = "randomBlind")]
    RandomBlind,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "requiredAttributeMissing")]
    RequiredAttributeMissing,
    #[serde(rename = "unknownIdentifier")]
    UnknownIdentifier,
    #[serde(rename = "unknownSchemeManager")]
    UnknownSchemeManager,
    #[serde(rename = "invalidSchemeManager")]
    InvalidSchemeManager,
    #[serde(rename = "configurationDownload")]
    ConfigurationDownload,
    #[serde(rename = "serialization")]
    Serialization,
    #[serde(rename = "panic")]
    Panic,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "internal")]
    Internal,
}

impl ErrorKind {
    /// The HTTP status the envelope carries for this kind.
    pub fn status(&self) -> u16 {
        use ErrorKind::*;
        match self {
            ProtocolVersionNotSupported | InvalidRequest | UnknownAction | SessionUnknown
            | UnexpectedRequest | Rejected | RequiredAttributeMissing | UnknownIdentifier
            | UnknownSchemeManager | InvalidSchemeManager | Serialization | Crypto | Revocation
            | Keyshare | KeyshareUnenrolled | RandomBlind => 400,
            Unauthorized | IrmaUnauthorized | PairingRequired | PairingRejected | Https => 403,
            Transport | ServerResponse | ConfigurationDownload | Panic | Internal => 500,
            Busy => 503,
        }
    }

    /// The kind name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            ProtocolVersionNotSupported => "protocolVersionNotSupported",
            InvalidRequest => "invalidRequest",
            UnknownAction => "unknownAction",
            Transport => "transport",
            Https => "https",
            ServerResponse => "serverResponse",
            SessionUnknown => "sessionUnknown",
            UnexpectedRequest => "unexpectedRequest",
            Unauthorized => "unauthorized",
            IrmaUnauthorized => "irmaUnauthorized",
            PairingRequired => "pairingRequired",
            PairingRejected => "pairingRejected",
            Crypto => "crypto",
            Revocation => "revocation",
            Keyshare => "keyshare",
            KeyshareUnenrolled => "keyshareUnenrolled",
            RandomBlind => "randomBlind",
            Rejected => "rejected",
            RequiredAttributeMissing => "requiredAttributeMissing",
            UnknownIdentifier => "unknownIdentifier",
            UnknownSchemeManager => "unknownSchemeManager",
            InvalidSchemeManager => "invalidSchemeManager",
            ConfigurationDownload => "configurationDownload",
            Serialization => "serialization",
            Panic => "panic",
            Busy => "busy",
            Internal => "internal",
        }
    }

    /// Canned human-readable description of the kind.
    pub fn description(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            ProtocolVersionNotSupported => "Protocol version not supported",
            InvalidRequest => "Invalid HTTP request",
            UnknownAction => "Unknown session type",
            Transport => "HTTP request failed",
            Https => "HTTPS required",
            ServerResponse => "Server returned unexpected response",
            SessionUnknown => "Session unknown or expired",
            UnexpectedRequest => "Unexpected request in this state",
            Unauthorized => "You are not authorized to issue or verify these attributes",
            IrmaUnauthorized => "You are not authorized to perform this action",
            PairingRequired => "Pairing is required first",
            PairingRejected => "Pairing was rejected",
            Crypto => "Crypto error",
            Revocation => "Revocation error",
            Keyshare => "Keyshare error",
            KeyshareUnenrolled => "Not enrolled at the required keyshare server",
            RandomBlind => "Error involving random blind attributes",
            Rejected => "Session request rejected",
            RequiredAttributeMissing => "Required attribute missing",
            UnknownIdentifier => "Unknown identifier",
            UnknownSchemeManager => "Unknown scheme manager",
            InvalidSchemeManager => "Invalid scheme manager",
            ConfigurationDownload => "Failed to download scheme configuration",
            Serialization => "Could not (de)serialize message",
            Panic => "Internal server error: recovered from panic",
            Busy => "Server too busy, try again shortly",
            Internal => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error envelope returned by both the client-facing and the
/// requestor-facing API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub status: u16,
    #[serde(rename = "error", default, skip_serializing_if = "String::is_empty")]
    pub error_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stacktrace: String,
}

fn is_zero(status: &u16) -> bool {
    *status == 0
}

impl RemoteError {
    /// Envelope for the given kind with an optional detail message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: kind.status(),
            error_name: kind.as_str().to_string(),
            description: kind.description().to_string(),
            message: message.into(),
            stacktrace: String::new(),
        }
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = stacktrace.into();
        self
    }

    /// Prefix the detail message, building an informational prefix chain.
    pub fn wrap(mut self, prefix: &str) -> Self {
        self.message = if self.message.is_empty() {
            prefix.to_string()
        } else {
            format!("{}: {}", prefix, self.message)
        };
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}: {}", self.error_name, self.description)
        } else {
            write!(f, "{} ({}): {}", self.error_name, self.message, self.description)
        }
    }
}

impl std::error::Error for RemoteError {}
