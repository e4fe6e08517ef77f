//! Request dispatch: build, authenticate, send, classify.
//!
//! [`RequestDispatcher`] is the single path every outbound call takes. It
//! resolves a path against the service's base address, serializes the body,
//! attaches a bearer credential when the call requires one, and turns the
//! outcome into either a typed body or a [`DispatchError`].
//!
//! # Ordering of checks
//!
//! ```text
//! resolve path ─▶ encode body ─▶ credential ─▶ send ─▶ status ─▶ decode
//!   InvalidRequest  InvalidRequest  AuthRequired  Network  Client/Server  Decode
//! ```
//!
//! Everything left of `send` happens without touching the network, so an
//! authenticated call with no usable credential never produces a request.

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialProvider;
use crate::error::DispatchError;

/// Per-call dispatch options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Attach a bearer credential; fail with `AuthRequired` if none is valid.
    pub requires_auth: bool,
}

impl CallOptions {
    pub const PUBLIC: CallOptions = CallOptions {
        requires_auth: false,
    };
    pub const AUTHENTICATED: CallOptions = CallOptions {
        requires_auth: true,
    };
}

/// Sends calls to one backend service.
///
/// Cheap to clone; clones share the connection pool and credential source.
#[derive(Clone)]
pub struct RequestDispatcher {
    service: Arc<str>,
    base_url: Url,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl RequestDispatcher {
    /// Create a dispatcher for the service at `base_url`.
    ///
    /// `service` is only used to label log events.
    pub fn new(
        service: &str,
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, DispatchError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            DispatchError::InvalidRequest(format!("invalid base address '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DispatchError::InvalidRequest(format!(
                "'{}' cannot be used as a base address",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DispatchError::Network)?;

        Ok(Self {
            service: Arc::from(service),
            base_url,
            client,
            credentials,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` (which must start with `/`) against the base address.
    ///
    /// The path is appended to the base path rather than replacing it, so a
    /// base of `http://host/api` and a path of `/ping` give
    /// `http://host/api/ping`.
    pub fn resolve(&self, path: &str) -> Result<Url, DispatchError> {
        if !path.starts_with('/') {
            return Err(DispatchError::InvalidRequest(format!(
                "path must start with '/': '{}'",
                path
            )));
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path)).map_err(|e| {
            DispatchError::InvalidRequest(format!("cannot resolve '{}': {}", path, e))
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<T, DispatchError> {
        self.dispatch::<(), T>(Method::GET, path, None, options).await
    }

    pub async fn post<B, T>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<T, DispatchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.dispatch(Method::POST, path, Some(body), options).await
    }

    /// Send one call and decode its success body as `T`.
    pub async fn dispatch<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: CallOptions,
    ) -> Result<T, DispatchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body, options).await?;
        let bytes = response.bytes().await.map_err(DispatchError::Network)?;
        decode_body(&bytes)
    }

    /// Send one call and return the response once its status has been
    /// classified as success. The body is left unread, which is what the
    /// stream decoder needs.
    pub async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: CallOptions,
    ) -> Result<Response, DispatchError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.resolve(path)?;
        let payload = body.map(encode_body).transpose()?;

        let mut request = self.client.request(method.clone(), url.clone());
        if options.requires_auth {
            let now = Utc::now();
            let credential = self
                .credentials
                .credential()
                .await
                .filter(|c| c.is_valid_at(now))
                .ok_or_else(|| DispatchError::AuthRequired {
                    path: path.to_string(),
                })?;
            request = request.header(AUTHORIZATION, format!("Bearer {}", credential.token()));
        }
        if let Some(payload) = payload {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(payload);
        }

        tracing::debug!(service = %self.service, %method, %url, "dispatching request");

        let response = request.send().await.map_err(|e| {
            tracing::warn!(service = %self.service, %method, %url, error = %e, "request failed");
            DispatchError::Network(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(
                    service = %self.service,
                    %url,
                    error = %e,
                    "failed to read error body"
                );
                String::new()
            }
        };
        let err = DispatchError::from_status(status, &text);
        tracing::warn!(
            service = %self.service,
            %method,
            %url,
            status = status.as_u16(),
            error = %err,
            "request rejected"
        );
        Err(err)
    }
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Bytes, DispatchError> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| DispatchError::InvalidRequest(format!("body is not representable: {}", e)))
}

/// Decode a success body. An empty body decodes as JSON `null`, so unit
/// and `Option` result types accept `204 No Content`.
fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DispatchError> {
    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        bytes
    };
    serde_json::from_slice(bytes).map_err(|e| DispatchError::Decode(e.to_string()))
}
