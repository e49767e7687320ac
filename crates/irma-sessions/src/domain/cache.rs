//! Per-session response cache.
//!
//! The client's HTTP library retries failed requests for up to ten seconds.
//! A retried request must not re-consume cryptographic state, so the last
//! response to a POST is kept and replayed verbatim when the identical
//! request arrives again in time. One entry per session.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use irma_messages::ServerStatus;

use crate::domain::session::SessionData;

/// How long a cached response stays replayable. The client's retry loop
/// gives up before this.
pub const RETRY_TIME_LIMIT: Duration = Duration::from_secs(10);

/// The recorded (request, response) pair of the last handled POST.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub endpoint: String,
    /// SHA-256 of the request body the response belongs to.
    #[serde(with = "b64")]
    pub message_digest: Vec<u8>,
    #[serde(with = "b64")]
    pub response: Vec<u8>,
    pub status: u16,
    /// Session status at the time the response was recorded. Replay is only
    /// valid while the session still has this status, which keeps replays
    /// from crossing the terminal boundary.
    pub session_status: ServerStatus,
}

impl SessionData {
    /// Return the cached response if it is valid for this request: same
    /// endpoint, same body, unchanged session status, and recent enough.
    /// A stale or mismatching entry is dropped.
    pub fn check_cache(&mut self, endpoint: &str, message: &[u8]) -> Option<(u16, Vec<u8>)> {
        let cache = self.response_cache.take()?;
        let valid = cache.endpoint == endpoint
            && !cache.response.is_empty()
            && cache.session_status == self.status
            && self.idle_time(SystemTime::now()) <= RETRY_TIME_LIMIT
            && cache.message_digest == digest(message);
        if !valid {
            return None;
        }
        let replay = (cache.status, cache.response.clone());
        self.response_cache = Some(cache);
        Some(replay)
    }

    /// Record the response to a handled request, replacing any prior entry.
    pub fn record_response(
        &mut self,
        endpoint: &str,
        message: &[u8],
        status: u16,
        response: &[u8],
    ) {
        self.response_cache = Some(CachedResponse {
            endpoint: endpoint.to_string(),
            message_digest: digest(message),
            response: response.to_vec(),
            status,
            session_status: self.status,
        });
    }
}

fn digest(message: &[u8]) -> Vec<u8> {
    Sha256::digest(message).to_vec()
}

mod b64 {
    //! Byte fields of the cache serialize as base64 so the canonical session
    //! JSON stays compact.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
