//! The session-start QR payload handed to the wallet.

use serde::{Deserialize, Serialize};

use crate::status::Action;

/// Contents of a session QR: the absolute session URL and the session type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qr {
    /// Server URL with which to perform the session.
    #[serde(rename = "u")]
    pub url: String,
    /// Session type.
    #[serde(rename = "irmaqr")]
    pub session_type: Action,
}

impl Qr {
    pub fn new(url: impl Into<String>, session_type: Action) -> Self {
        Self {
            url: url.into(),
            session_type,
        }
    }

    /// Validate the payload: a parseable absolute URL and a session type a
    /// wallet can start.
    pub fn validate(&self) -> Result<(), QrError> {
        if self.url.is_empty() {
            return Err(QrError::MissingUrl);
        }
        url::Url::parse(&self.url).map_err(|e| QrError::InvalidUrl(e.to_string()))?;
        match self.session_type {
            Action::Disclosing | Action::Signing | Action::Issuing | Action::Redirect => Ok(()),
            Action::Revoking => Err(QrError::UnsupportedType),
        }
    }
}

/// Error validating a QR payload.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QrError {
    #[error("no URL specified")]
    MissingUrl,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported session type")]
    UnsupportedType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_wire_shape() {
        let qr = Qr::new("https://example.com/irma/session/abc", Action::Disclosing);
        let json = serde_json::to_value(&qr).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "u": "https://example.com/irma/session/abc",
                "irmaqr": "disclosing",
            })
        );
    }

    #[test]
    fn test_qr_validation() {
        assert!(Qr::new("https://example.com/s/x", Action::Issuing)
            .validate()
            .is_ok());
        assert!(matches!(
            Qr::new("", Action::Disclosing).validate(),
            Err(QrError::MissingUrl)
        ));
        assert!(matches!(
            Qr::new("not a url", Action::Disclosing).validate(),
            Err(QrError::InvalidUrl(_))
        ));
        assert!(matches!(
            Qr::new("https://example.com", Action::Revoking).validate(),
            Err(QrError::UnsupportedType)
        ));
    }
}
