//! HTTP implementation of the callback sink.
//!
//! Results are POSTed to requestor-provided URLs: JWT-signed as `text/plain`
//! when the server holds a signing key, plain JSON otherwise. The same
//! channel fetches the follow-up request of a chained session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use irma_messages::{ErrorKind, RequestorRequest, SessionResult};
use irma_sessions::{CallbackSink, Configuration, ServerError};

use crate::jwt::sign_result_jwt;

/// `CallbackSink` over plain HTTP.
pub struct HttpCallbackSink {
    client: reqwest::Client,
    conf: Arc<Configuration>,
}

impl HttpCallbackSink {
    pub fn new(conf: Arc<Configuration>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, conf }
    }

    async fn post_result(
        &self,
        url: &str,
        result: &SessionResult,
    ) -> Result<reqwest::Response, ServerError> {
        let has_key = self
            .conf
            .jwt_private_key_pem()
            .map(|key| key.is_some())
            .unwrap_or(false);
        let request = if has_key {
            let jwt = sign_result_jwt(&self.conf, result, None)?;
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(jwt)
        } else {
            self.client.post(url).json(result)
        };
        let response = request
            .send()
            .await
            .map_err(|e| ServerError::new(ErrorKind::Transport, e.to_string()))?
            .error_for_status()
            .map_err(|e| ServerError::new(ErrorKind::ServerResponse, e.to_string()))?;
        Ok(response)
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn deliver_result(&self, url: &str, result: &SessionResult) -> Result<(), ServerError> {
        self.post_result(url, result).await?;
        debug!(session = %result.token, "result callback delivered");
        Ok(())
    }

    async fn next_session(
        &self,
        url: &str,
        result: &SessionResult,
    ) -> Result<Option<RequestorRequest>, ServerError> {
        let response = self.post_result(url, result).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ServerError::new(ErrorKind::Transport, e.to_string()))?;
        if body.is_empty() {
            return Ok(None);
        }
        let rrequest = serde_json::from_slice(&body).map_err(|e| {
            ServerError::new(ErrorKind::ServerResponse, format!("bad next session: {e}"))
        })?;
        Ok(Some(rrequest))
    }
}
