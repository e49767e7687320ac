//! Session tokens, bearer secrets and pairing codes.
//!
//! Two token families exist. *Session tokens* (`RequestorToken`,
//! `ClientToken`) identify a session towards one of the parties and are
//! accepted from the outside, so they are validated on parse. *Bearer
//! secrets* (`FrontendAuth`, `ClientAuth`) prove that a caller is the party a
//! session was bound to; they are only ever minted locally and compared, never
//! parsed, and they carry at least 128 bits of entropy. None of these values
//! may appear in logs.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a session token in alphanumeric characters.
const SESSION_TOKEN_LENGTH: usize = 20;

/// Length of a bearer secret in alphanumeric characters. 24 alphanumerics
/// carry ~142 bits of entropy; 20 would fall short of 128.
const AUTH_TOKEN_LENGTH: usize = 24;

/// Error validating a token received from the outside.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("token did not pass input validation")]
    Invalid,
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn valid_session_token(s: &str) -> bool {
    s.len() >= SESSION_TOKEN_LENGTH && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

macro_rules! session_token {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random token.
            pub fn random() -> Self {
                Self(random_alphanumeric(SESSION_TOKEN_LENGTH))
            }

            /// Validate and wrap a token received from the outside.
            pub fn parse(s: &str) -> Result<Self, TokenError> {
                if valid_session_token(s) {
                    Ok(Self(s.to_string()))
                } else {
                    Err(TokenError::Invalid)
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = TokenError;

            fn try_from(s: String) -> Result<Self, TokenError> {
                Self::parse(&s)
            }
        }

        impl From<$name> for String {
            fn from(t: $name) -> String {
                t.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

session_token!(
    /// Opaque session identifier shown to the requestor.
    RequestorToken
);
session_token!(
    /// Opaque session identifier given to the client (wallet). Distinct from
    /// the requestor token; both map to the same session.
    ClientToken
);

macro_rules! bearer_secret {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random secret.
            pub fn random() -> Self {
                Self(random_alphanumeric(AUTH_TOKEN_LENGTH))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// The raw secret bytes, for constant-time comparison only.
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        // Secrets must never leak through Debug output.
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }
    };
}

bearer_secret!(
    /// Bearer secret the frontend presents when polling a session.
    FrontendAuth
);
bearer_secret!(
    /// Bearer secret bound to the wallet once it connects.
    ClientAuth
);

/// An 8-digit pairing code, shown out-of-band to the user.
pub fn new_pairing_code() -> String {
    format!("{:08}", rand::thread_rng().gen_range(0..100_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_shape() {
        let t = RequestorToken::random();
        assert_eq!(t.as_str().len(), SESSION_TOKEN_LENGTH);
        assert!(t.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_session_token_validation() {
        assert!(ClientToken::parse("abcdefghij0123456789").is_ok());
        assert!(ClientToken::parse("too-short").is_err());
        assert!(ClientToken::parse("abcdefghij012345678!").is_err());
        // Longer than the minimum is fine.
        assert!(ClientToken::parse("abcdefghij0123456789extra").is_ok());
    }

    #[test]
    fn test_session_token_serde_validates() {
        let ok: Result<ClientToken, _> = serde_json::from_str("\"abcdefghij0123456789\"");
        assert!(ok.is_ok());
        let bad: Result<ClientToken, _> = serde_json::from_str("\"../../etc/passwd\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_bearer_secret_entropy_and_debug() {
        let a = FrontendAuth::random();
        assert_eq!(a.as_bytes().len(), AUTH_TOKEN_LENGTH);
        // Debug output must not contain the secret.
        let rendered = format!("{:?}", a);
        assert_eq!(rendered, "FrontendAuth(..)");
    }

    #[test]
    fn test_pairing_code_is_eight_digits() {
        for _ in 0..32 {
            let code = new_pairing_code();
            assert_eq!(code.len(), 8);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }
}
