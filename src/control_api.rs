use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::error::{AdapterError, Result};
use crate::types::{AmplifierDetail, AmplifierSummary, Axis};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response side of the amplifier API
///
/// Implemented over HTTP by [`HttpControlApi`]; tests substitute their own.
pub trait ControlApi: Send + Sync + 'static {
    /// `GET /amplifiers`
    fn list_amplifiers(&self) -> impl Future<Output = Result<Vec<AmplifierSummary>>> + Send;

    /// `GET /amplifiers/{id}`
    fn get_amplifier(&self, id: &str) -> impl Future<Output = Result<AmplifierDetail>> + Send;

    /// `POST /amplifiers/{id}/{axis}` with a plain-text body; succeeds only on 204
    fn write(&self, id: &str, axis: Axis, body: String) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP client for the amplifier control API (HTTP Basic auth)
pub struct HttpControlApi {
    http: reqwest::Client,
    base_path: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpControlApi {
    pub fn new(
        base_path: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::from_reqwest(base_path, http, username, password))
    }

    /// Wrap an existing `reqwest::Client`
    pub fn from_reqwest(
        base_path: impl Into<String>,
        http: reqwest::Client,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        let base_path = base_path.into().trim_end_matches('/').to_owned();
        Self {
            http,
            base_path,
            username,
            password,
        }
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let base_path = config
            .base_path
            .clone()
            .ok_or_else(|| AdapterError::Config("http.basePath is required".into()))?;
        Self::new(base_path, config.username.clone(), config.password.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_path, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self.authorize(self.http.get(&url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| AdapterError::MalformedResponse {
            url,
            reason: e.to_string(),
        })
    }

    async fn post_text(&self, path: &str, body: String) -> Result<()> {
        let url = self.url(path);
        tracing::debug!("POST {} body={}", url, body);

        let resp = self
            .authorize(self.http.post(&url))
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(AdapterError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            }),
        }
    }
}

impl ControlApi for HttpControlApi {
    async fn list_amplifiers(&self) -> Result<Vec<AmplifierSummary>> {
        self.get_json("amplifiers").await
    }

    async fn get_amplifier(&self, id: &str) -> Result<AmplifierDetail> {
        self.get_json(&format!("amplifiers/{id}")).await
    }

    async fn write(&self, id: &str, axis: Axis, body: String) -> Result<()> {
        self.post_text(&format!("amplifiers/{id}/{}", axis.segment()), body)
            .await
    }
}
