use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::prometheus::{ApiResponse, ApiStatus, MetricMetadata};
use crate::promql::types::{Labels, QueryResult};
use crate::state::reducer::{ServerAccess, ServerSettings};

/// Statuses whose bodies still carry a Prometheus API JSON payload.
const API_ERROR_STATUSES: [u16; 3] = [400, 422, 503];

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was cancelled because its result is no longer wanted.
    #[error("request aborted")]
    Aborted,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("{0}")]
    Api(String),
    #[error("missing \"data\" field in response JSON")]
    MissingData,
    #[error("proxy access requires a datasource ID")]
    MissingDatasource,
}

impl ApiError {
    /// Aborted requests are not failures and should not be shown to users.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ApiError::Aborted)
    }
}

/// Instant query access, the part of the API the explain view needs.
#[async_trait]
pub trait InstantQuerier: Send + Sync {
    async fn instant_query(
        &self,
        expr: &str,
        time: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, ApiError>;
}

/// Client for a Prometheus server's HTTP API, either directly or through a
/// Grafana datasource proxy.
#[derive(Debug, Clone)]
pub struct PromApi {
    client: reqwest::Client,
    settings: ServerSettings,
    path_prefix: String,
}

impl PromApi {
    pub fn new(
        settings: ServerSettings,
        path_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            settings,
            path_prefix: path_prefix.into(),
        })
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Full URL for an API resource path such as `/api/v1/labels`.
    pub fn resource_url(&self, resource: &str) -> Result<String, ApiError> {
        match self.settings.access {
            ServerAccess::Direct => Ok(format!("{}{resource}", self.settings.url.trim_end_matches('/'))),
            ServerAccess::Proxy => {
                let id = self.settings.datasource_id.ok_or(ApiError::MissingDatasource)?;
                Ok(format!(
                    "{}/api/grafana/api/datasources/proxy/{id}{resource}",
                    self.path_prefix.trim_end_matches('/')
                ))
            }
        }
    }

    async fn fetch_api<T: DeserializeOwned>(
        &self,
        resource: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let url = self.resource_url(resource)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("aborted request to {url}");
                Err(ApiError::Aborted)
            }
            res = self.send::<T>(&url) => res,
        }
    }

    async fn send<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() && !API_ERROR_STATUSES.contains(&status.as_u16()) {
            return Err(ApiError::Status(status));
        }
        let body: ApiResponse<T> = res.json().await?;
        into_data(body)
    }

    pub async fn query(
        &self,
        expr: &str,
        time: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, ApiError> {
        let mut resource = format!("/api/v1/query?query={}", urlencoding::encode(expr));
        if let Some(t) = time {
            resource.push_str(&format!("&time={t}"));
        }
        self.fetch_api(&resource, cancel).await
    }

    /// Range query. `start`/`end` in Unix seconds, `step` in seconds.
    pub async fn query_range(
        &self,
        expr: &str,
        start: f64,
        end: f64,
        step: f64,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, ApiError> {
        let resource = format!(
            "/api/v1/query_range?query={}&start={start}&end={end}&step={step}",
            urlencoding::encode(expr)
        );
        self.fetch_api(&resource, cancel).await
    }

    pub async fn series(
        &self,
        matchers: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Labels>, ApiError> {
        let params: Vec<String> = matchers
            .iter()
            .map(|m| format!("match[]={}", urlencoding::encode(m)))
            .collect();
        let resource = format!("/api/v1/series?{}", params.join("&"));
        self.fetch_api(&resource, cancel).await
    }

    pub async fn label_names(&self, cancel: &CancellationToken) -> Result<Vec<String>, ApiError> {
        self.fetch_api("/api/v1/labels", cancel).await
    }

    pub async fn label_values(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ApiError> {
        let resource = format!("/api/v1/label/{}/values", urlencoding::encode(name));
        self.fetch_api(&resource, cancel).await
    }

    pub async fn metadata(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<MetricMetadata>>, ApiError> {
        self.fetch_api("/api/v1/metadata", cancel).await
    }
}

#[async_trait]
impl InstantQuerier for PromApi {
    async fn instant_query(
        &self,
        expr: &str,
        time: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, ApiError> {
        self.query(expr, time, cancel).await
    }
}

fn into_data<T>(body: ApiResponse<T>) -> Result<T, ApiError> {
    if body.status == ApiStatus::Error {
        return Err(ApiError::Api(
            body.error
                .unwrap_or_else(|| "missing \"error\" field in response JSON".to_string()),
        ));
    }
    body.data.ok_or(ApiError::MissingData)
}
