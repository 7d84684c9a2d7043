//! Remote state client for the GhostBox device.
//!
//! The device exposes three JSON endpoints: `GET /options`, `POST /options`
//! and `GET /status`. `RemoteState` is the seam the session talks through;
//! `HttpRemote` is the reqwest implementation used at runtime.

use crate::error::{SubmitError, TransportError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

const OPTIONS_PATH: &str = "/options";
const STATUS_PATH: &str = "/status";

/// Flat mapping of option name to value, as served by `/options`.
pub type OptionsMap = serde_json::Map<String, serde_json::Value>;

/// One device-reported measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic identifier assigned by the device.
    pub id: i64,
    pub frequency: f64,
    pub strength: f64,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub current_frequency: f64,
    /// Rolling window of recent samples, oldest first.
    #[serde(default)]
    pub signal_strength_history: Vec<Sample>,
}

/// One entry of the array returned by a rejected `POST /options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub camel_key: String,
    pub message: String,
}

/// Request/response access to the device state.
///
/// Every call resolves exactly once, either with the decoded body or with
/// an error; nothing is retried here.
pub trait RemoteState {
    /// Fetch the authoritative options snapshot.
    fn fetch_options(&self) -> impl Future<Output = Result<OptionsMap, TransportError>> + Send;

    /// Submit the full options mapping; the device echoes its accepted state.
    fn submit_options(
        &self,
        options: &OptionsMap,
    ) -> impl Future<Output = Result<OptionsMap, SubmitError>> + Send;

    /// Fetch the current frequency and recent signal history.
    fn fetch_status(&self) -> impl Future<Output = Result<StatusReport, TransportError>> + Send;
}

/// HTTP implementation of [`RemoteState`].
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

/// A completed exchange, before the status code is interpreted.
struct Exchange {
    status: reqwest::StatusCode,
    body: String,
}

impl HttpRemote {
    /// Create a client for the device at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the device base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn exchange(
        &self,
        request: reqwest::RequestBuilder,
        path: &'static str,
    ) -> Result<Exchange, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|source| TransportError::Request { path, source })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request { path, source })?;

        tracing::debug!(path, status = status.as_u16(), bytes = body.len(), "device response");
        Ok(Exchange { status, body })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, TransportError> {
        let exchange = self.exchange(self.client.get(self.url(path)), path).await?;
        if !exchange.status.is_success() {
            return Err(TransportError::Status {
                path,
                code: exchange.status.as_u16(),
            });
        }
        decode(path, &exchange.body)
    }
}

impl RemoteState for HttpRemote {
    async fn fetch_options(&self) -> Result<OptionsMap, TransportError> {
        self.get_json(OPTIONS_PATH).await
    }

    async fn submit_options(&self, options: &OptionsMap) -> Result<OptionsMap, SubmitError> {
        let request = self.client.post(self.url(OPTIONS_PATH)).json(options);
        let exchange = self.exchange(request, OPTIONS_PATH).await?;

        if exchange.status.is_success() {
            return Ok(decode(OPTIONS_PATH, &exchange.body)?);
        }
        Err(classify_rejection(exchange.status.as_u16(), &exchange.body))
    }

    async fn fetch_status(&self) -> Result<StatusReport, TransportError> {
        self.get_json(STATUS_PATH).await
    }
}

fn decode<T: DeserializeOwned>(path: &'static str, body: &str) -> Result<T, TransportError> {
    serde_json::from_str(body).map_err(|source| TransportError::Decode { path, source })
}

/// Interpret a failed `POST /options`.
///
/// A body that parses as a list of field errors is a validation rejection;
/// anything else is reported as a plain HTTP failure.
pub fn classify_rejection(code: u16, body: &str) -> SubmitError {
    match serde_json::from_str::<Vec<FieldError>>(body) {
        Ok(errors) => SubmitError::Rejected(errors),
        Err(_) => SubmitError::Transport(TransportError::Status {
            path: OPTIONS_PATH,
            code,
        }),
    }
}
