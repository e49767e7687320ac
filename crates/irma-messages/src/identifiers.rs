//! Identifiers of schemes, credential types and attribute types.
//!
//! Identifiers are dot-separated paths: `scheme.issuer.credential.attribute`.
//! Each narrower identifier knows how to produce its parent.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$doc:meta])* $name:ident, $segments:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier has the expected number of segments and
            /// no empty segment.
            pub fn is_valid(&self) -> bool {
                let parts: Vec<&str> = self.0.split('.').collect();
                parts.len() == $segments && parts.iter().all(|p| !p.is_empty())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

identifier!(
    /// A scheme manager, e.g. `pbdf`.
    SchemeManagerIdentifier,
    1
);

identifier!(
    /// A credential type, e.g. `pbdf.pbdf.email`.
    CredentialTypeIdentifier,
    3
);

identifier!(
    /// An attribute type, e.g. `pbdf.pbdf.email.email`.
    AttributeTypeIdentifier,
    4
);

impl AttributeTypeIdentifier {
    /// The credential type this attribute belongs to.
    pub fn credential_type(&self) -> CredentialTypeIdentifier {
        let parent = self.0.rsplitn(2, '.').nth(1).unwrap_or("");
        CredentialTypeIdentifier(parent.to_string())
    }
}

impl CredentialTypeIdentifier {
    /// The scheme manager this credential type belongs to.
    pub fn scheme_manager(&self) -> SchemeManagerIdentifier {
        let scheme = self.0.split('.').next().unwrap_or("");
        SchemeManagerIdentifier(scheme.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents() {
        let attr = AttributeTypeIdentifier::from("pbdf.pbdf.email.email");
        assert_eq!(attr.credential_type().as_str(), "pbdf.pbdf.email");
        assert_eq!(
            attr.credential_type().scheme_manager().as_str(),
            "pbdf"
        );
    }

    #[test]
    fn test_validity() {
        assert!(AttributeTypeIdentifier::from("pbdf.pbdf.email.email").is_valid());
        assert!(!AttributeTypeIdentifier::from("pbdf.pbdf.email").is_valid());
        assert!(!AttributeTypeIdentifier::from("pbdf..email.email").is_valid());
        assert!(CredentialTypeIdentifier::from("pbdf.pbdf.email").is_valid());
    }
}
