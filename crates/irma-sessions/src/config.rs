//! Server configuration with validation.
//!
//! The configuration is populated externally (CLI, file, environment); this
//! module only defines the knobs, their defaults, and the validation applied
//! before the server starts.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use irma_messages::{Action, AttributeConDisCon, ClientToken, CredentialRequest};

/// Main server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// External base URL at which clients reach the server.
    pub url: String,
    /// Address at which the requestor API listens.
    pub listen_address: IpAddr,
    /// Port at which the requestor API listens.
    pub port: u16,
    /// Address for the separate client endpoint listener, when split.
    pub client_listen_address: IpAddr,
    /// When set, client endpoints are served on a separate listener at this
    /// port.
    pub client_port: Option<u16>,
    /// Maximum lifetime of a connected session, in minutes.
    pub max_session_lifetime: u64,
    /// How long results of finished sessions remain available, in minutes.
    pub session_result_lifetime: u64,
    /// Issuer name put into result JWTs.
    pub jwt_issuer: String,
    /// PEM-encoded RSA private key for signing result JWTs.
    pub jwt_private_key: Option<String>,
    /// Path to the result-JWT private key; alternative to the inline key.
    pub jwt_private_key_file: Option<PathBuf>,
    /// Maximum age in seconds of a requestor JWT before it is rejected.
    pub max_request_age: u64,
    /// Skip requestor authentication entirely (development setups).
    pub disable_requestor_authentication: bool,
    /// Known requestors with their credentials and permissions.
    pub requestors: HashMap<String, Requestor>,
    /// Permissions granted to every requestor.
    pub global_permissions: Permissions,
    /// Whether the server may append the session token to client return URLs.
    pub augment_client_return_url: bool,
    /// Which session store to use.
    pub store_type: StoreType,
    /// Connection string of the remote session store.
    pub store_url: Option<String>,
    /// Verbose mode: attach stacktraces to wire errors.
    pub verbose: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            url: String::new(),
            listen_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8088,
            client_listen_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            client_port: None,
            max_session_lifetime: 5,
            session_result_lifetime: 5,
            jwt_issuer: "irmaserver".to_string(),
            jwt_private_key: None,
            jwt_private_key_file: None,
            max_request_age: 300,
            disable_requestor_authentication: false,
            requestors: HashMap::new(),
            global_permissions: Permissions::default(),
            augment_client_return_url: false,
            store_type: StoreType::Memory,
            store_url: None,
            verbose: false,
        }
    }
}

impl Configuration {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        if self.client_port == Some(self.port) {
            return Err(ConfigError::DuplicatePorts);
        }
        if self.max_session_lifetime == 0 {
            return Err(ConfigError::Invalid("max_session_lifetime cannot be 0".into()));
        }
        if self.jwt_private_key.is_some() && self.jwt_private_key_file.is_some() {
            return Err(ConfigError::JwtKeyConflict);
        }
        if self.store_type == StoreType::Redis && self.store_url.is_none() {
            return Err(ConfigError::MissingStoreUrl);
        }
        Ok(())
    }

    /// Bind address of the requestor API.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }

    /// Bind address of the split client listener, when configured.
    pub fn client_listen_addr(&self) -> Option<SocketAddr> {
        self.client_port
            .map(|port| SocketAddr::new(self.client_listen_address, port))
    }

    pub fn max_session_duration(&self) -> Duration {
        Duration::from_secs(self.max_session_lifetime * 60)
    }

    pub fn result_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_result_lifetime * 60)
    }

    /// Absolute URL of a client session.
    pub fn session_url(&self, token: &ClientToken) -> String {
        format!("{}/irma/session/{}", self.url.trim_end_matches('/'), token)
    }

    /// The PEM of the result-JWT signing key, resolving the file variant.
    pub fn jwt_private_key_pem(&self) -> Result<Option<String>, ConfigError> {
        if let Some(pem) = &self.jwt_private_key {
            return Ok(Some(pem.clone()));
        }
        match &self.jwt_private_key_file {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    /// Effective permissions for a requestor: its own entry unioned with the
    /// global permissions. `None` means an unauthenticated requestor, which
    /// only holds the global permissions.
    pub fn permissions_for(&self, requestor: Option<&str>) -> Permissions {
        let mut perms = self.global_permissions.clone();
        if let Some(entry) = requestor.and_then(|name| self.requestors.get(name)) {
            perms.disclosing.extend(entry.permissions.disclosing.iter().cloned());
            perms.signing.extend(entry.permissions.signing.iter().cloned());
            perms.issuing.extend(entry.permissions.issuing.iter().cloned());
        }
        perms
    }
}

/// Which session store backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Memory,
    Redis,
}

/// How a requestor authenticates itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Static bearer token in the `Authorization` header.
    Token,
    /// Session requests arrive as RS256 JWTs signed with the requestor's key.
    #[serde(rename = "publickey")]
    PublicKey,
}

/// A configured requestor: credentials plus its extra permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requestor {
    pub auth_method: AuthMethod,
    /// The bearer token, or the PEM-encoded RSA public key, depending on the
    /// auth method.
    pub key: String,
    #[serde(flatten)]
    pub permissions: Permissions,
}

/// Permission patterns over credential and attribute identifiers. A pattern
/// is a dot-separated path in which `*` matches any remainder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub disclosing: Vec<String>,
    pub signing: Vec<String>,
    pub issuing: Vec<String>,
}

impl Permissions {
    /// Whether a disclosure or signature request over the given attributes is
    /// permitted.
    pub fn can_verify_or_sign(&self, action: Action, disclose: &AttributeConDisCon) -> bool {
        let patterns = match action {
            Action::Disclosing => &self.disclosing,
            Action::Signing => &self.signing,
            // Attributes disclosed within an issuance session fall under the
            // disclosure permissions.
            Action::Issuing => &self.disclosing,
            _ => return false,
        };
        disclose.0.iter().flatten().flatten().all(|attr| {
            patterns
                .iter()
                .any(|p| match_pattern(p, attr.attr_type.as_str()))
        })
    }

    /// Whether issuing the given credentials is permitted.
    pub fn can_issue(&self, credentials: &[CredentialRequest]) -> bool {
        credentials.iter().all(|cred| {
            self.issuing
                .iter()
                .any(|p| match_pattern(p, cred.credential_type.as_str()))
        })
    }
}

/// Segment-wise wildcard match: `pbdf.pbdf.*` covers everything below
/// `pbdf.pbdf`, a bare `*` covers everything.
fn match_pattern(pattern: &str, id: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut id = id.split('.');
    loop {
        match (pattern.next(), id.next()) {
            (None, None) => return true,
            (Some("*"), _) => return true,
            (Some(p), Some(i)) if p == i => continue,
            _ => return false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no external URL configured")]
    MissingUrl,
    #[error("invalid external URL: {0}")]
    InvalidUrl(String),
    #[error("requestor and client listeners cannot share a port")]
    DuplicatePorts,
    #[error("jwt_private_key and jwt_private_key_file are mutually exclusive")]
    JwtKeyConflict,
    #[error("store_type is redis but no store_url is configured")]
    MissingStoreUrl,
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not read key file: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use irma_messages::AttributeRequest;

    fn valid_config() -> Configuration {
        Configuration {
            url: "https://irma.example.com".to_string(),
            ..Configuration::default()
        }
    }

    #[test]
    fn test_default_config_needs_url() {
        assert!(matches!(
            Configuration::default().validate(),
            Err(ConfigError::MissingUrl)
        ));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let mut conf = valid_config();
        conf.client_port = Some(conf.port);
        assert!(matches!(conf.validate(), Err(ConfigError::DuplicatePorts)));
    }

    #[test]
    fn test_redis_store_requires_url() {
        let mut conf = valid_config();
        conf.store_type = StoreType::Redis;
        assert!(matches!(conf.validate(), Err(ConfigError::MissingStoreUrl)));
        conf.store_url = Some("redis://localhost".to_string());
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_session_url() {
        let mut conf = valid_config();
        conf.url = "https://irma.example.com/".to_string();
        let token = ClientToken::parse("abcdefghij0123456789").unwrap();
        assert_eq!(
            conf.session_url(&token),
            "https://irma.example.com/irma/session/abcdefghij0123456789"
        );
    }

    #[test]
    fn test_pattern_matching() {
        assert!(match_pattern("*", "pbdf.pbdf.email.email"));
        assert!(match_pattern("pbdf.*", "pbdf.pbdf.email.email"));
        assert!(match_pattern("pbdf.pbdf.email.*", "pbdf.pbdf.email.email"));
        assert!(match_pattern(
            "pbdf.pbdf.email.email",
            "pbdf.pbdf.email.email"
        ));
        assert!(!match_pattern("pbdf.sidn-pbdf.*", "pbdf.pbdf.email.email"));
        assert!(!match_pattern("pbdf.pbdf.email", "pbdf.pbdf.email.email"));
    }

    #[test]
    fn test_permissions() {
        let perms = Permissions {
            disclosing: vec!["pbdf.pbdf.email.*".to_string()],
            signing: vec![],
            issuing: vec!["pbdf.pbdf.*".to_string()],
        };
        let disclose = AttributeConDisCon(vec![vec![vec![AttributeRequest::new(
            "pbdf.pbdf.email.email",
        )]]]);
        assert!(perms.can_verify_or_sign(Action::Disclosing, &disclose));
        assert!(!perms.can_verify_or_sign(Action::Signing, &disclose));

        let other = AttributeConDisCon(vec![vec![vec![AttributeRequest::new(
            "pbdf.gemeente.address.city",
        )]]]);
        assert!(!perms.can_verify_or_sign(Action::Disclosing, &other));
    }

    #[test]
    fn test_permissions_for_merges_global_and_requestor() {
        let mut conf = valid_config();
        conf.global_permissions.disclosing = vec!["pbdf.pbdf.email.*".to_string()];
        conf.requestors.insert(
            "verifier".to_string(),
            Requestor {
                auth_method: AuthMethod::Token,
                key: "secret".to_string(),
                permissions: Permissions {
                    disclosing: vec!["pbdf.gemeente.*".to_string()],
                    signing: vec![],
                    issuing: vec![],
                },
            },
        );

        let anon = conf.permissions_for(None);
        assert_eq!(anon.disclosing.len(), 1);

        let named = conf.permissions_for(Some("verifier"));
        assert_eq!(named.disclosing.len(), 2);
    }
}
