//! # HTTP Run Service Client
//!
//! reqwest-based [`ParameterStore`] talking to the remote run service:
//!
//! | operation                | request                                         |
//! |--------------------------|-------------------------------------------------|
//! | get parameter            | `GET    /run/{run_id}/{key}` (404 = not set)    |
//! | set parameter            | `PUT    /run/{run_id}/{key}`                    |
//! | delete parameter         | `DELETE /run/{run_id}/{key}`                    |
//! | run document             | `GET    /run/{run_id}`                          |
//! | phase complete           | `POST   /run/{run_id}/instances/{name}/complete`|
//! | remove instances         | `DELETE /run/{run_id}/nodes/{node}?ids=1,2`     |
//! | delete run               | `DELETE /run/{run_id}`                          |
//!
//! Network errors and 5xx responses are retried with exponential backoff;
//! other client errors fail immediately.

use super::traits::{ParameterStore, ParameterStoreFactory};
use crate::config::{BackoffConfig, ServiceConfig};
use crate::error::{DeployerError, Result};
use crate::models::RunDocument;
use crate::resilience::{retry_with_backoff, ExponentialBackoff, RetryDecision};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct HttpParameterStore {
    client: Client,
    config: Arc<ServiceConfig>,
    backoff: ExponentialBackoff,
    run_id: Uuid,
    base_url: Url,
}

impl std::fmt::Debug for HttpParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpParameterStore")
            .field("base_url", &self.base_url.as_str())
            .field("run_id", &self.run_id)
            .field("timeout_ms", &self.config.timeout_ms)
            .field("max_attempts", &self.backoff.max_attempts())
            .finish()
    }
}

impl HttpParameterStore {
    /// Create a client with its own connection pool
    pub fn new(config: Arc<ServiceConfig>, backoff: &BackoffConfig) -> Result<Self> {
        let run_id = config.run_id.ok_or_else(|| {
            DeployerError::Configuration("service.run_id is required".to_string())
        })?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| DeployerError::Configuration(format!("Invalid base URL: {e}")))?;

        let mut default_headers = reqwest::header::HeaderMap::new();
        if !config.bearer_token.is_empty() {
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", config.bearer_token)
                    .parse()
                    .map_err(|e| {
                        DeployerError::Configuration(format!("Invalid bearer token: {e}"))
                    })?,
            );
        } else if !config.api_key.is_empty() {
            default_headers.insert(
                reqwest::header::HeaderName::from_bytes(config.api_key_header.as_bytes())
                    .map_err(|e| {
                        DeployerError::Configuration(format!("Invalid API key header name: {e}"))
                    })?,
                config.api_key.parse().map_err(|e| {
                    DeployerError::Configuration(format!("Invalid API key: {e}"))
                })?,
            );
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("deployer-core/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()
            .map_err(|e| {
                DeployerError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        debug!(
            base_url = %config.base_url,
            run_id = %run_id,
            "Created run service client"
        );

        Ok(Self {
            client,
            backoff: ExponentialBackoff::from_config(backoff),
            run_id,
            base_url,
            config,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        let run_id = self.run_id.to_string();
        url.path_segments_mut()
            .map_err(|_| {
                DeployerError::Configuration(format!(
                    "Base URL cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push("run")
            .push(&run_id)
            .extend(segments);
        Ok(url)
    }

    /// Send a request, retrying transient failures. 404 is handed back to the caller.
    async fn send(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        retry_with_backoff(&self.backoff, operation, |_| {
            let request = build();
            async move {
                match request.send().await {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() || status == StatusCode::NOT_FOUND {
                            RetryDecision::Done(response)
                        } else if status.is_server_error() {
                            RetryDecision::Retry(DeployerError::service(
                                operation,
                                format!("HTTP {status}"),
                            ))
                        } else {
                            let body = response
                                .text()
                                .await
                                .unwrap_or_else(|_| "Unknown error".to_string());
                            RetryDecision::Fail(DeployerError::service(
                                operation,
                                format!("HTTP {status}: {body}"),
                            ))
                        }
                    }
                    Err(e) => RetryDecision::Retry(DeployerError::service(
                        operation,
                        format!("network error: {e}"),
                    )),
                }
            }
        })
        .await
    }

    async fn send_expect_success(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let response = self.send(operation, build).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DeployerError::service(operation, "HTTP 404 Not Found"));
        }
        Ok(response)
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.client.request(method, url.clone())
    }
}

#[async_trait]
impl ParameterStore for HttpParameterStore {
    async fn get_runtime_parameter(&mut self, key: &str) -> Result<Option<String>> {
        let url = self.endpoint(&[key])?;
        let response = self
            .send("get_runtime_parameter", || self.request(Method::GET, &url))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value = response
            .text()
            .await
            .map_err(|e| DeployerError::service("get_runtime_parameter", e.to_string()))?;
        Ok(Some(value))
    }

    async fn set_runtime_parameter(&mut self, key: &str, value: &str) -> Result<()> {
        let url = self.endpoint(&[key])?;
        self.send_expect_success("set_runtime_parameter", || {
            self.request(Method::PUT, &url).body(value.to_string())
        })
        .await?;
        Ok(())
    }

    async fn delete_runtime_parameter(&mut self, key: &str) -> Result<()> {
        let url = self.endpoint(&[key])?;
        // deleting something that was never set is not an error
        self.send("delete_runtime_parameter", || {
            self.request(Method::DELETE, &url)
        })
        .await?;
        Ok(())
    }

    async fn get_run_document(&mut self) -> Result<RunDocument> {
        let url = self.endpoint(&[])?;
        let response = self
            .send_expect_success("get_run_document", || {
                self.request(Method::GET, &url)
                    .header(reqwest::header::ACCEPT, "application/json")
            })
            .await?;
        response
            .json::<RunDocument>()
            .await
            .map_err(|e| DeployerError::service("get_run_document", format!("invalid body: {e}")))
    }

    async fn signal_phase_complete(&mut self, instance_name: &str) -> Result<()> {
        let url = self.endpoint(&["instances", instance_name, "complete"])?;
        self.send_expect_success("signal_phase_complete", || {
            self.request(Method::POST, &url)
        })
        .await?;
        Ok(())
    }

    async fn remove_instances(&mut self, node_name: &str, ids: &[u32]) -> Result<()> {
        let mut url = self.endpoint(&["nodes", node_name])?;
        let ids = ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut().append_pair("ids", &ids);
        self.send_expect_success("remove_instances", || {
            self.request(Method::DELETE, &url)
        })
        .await?;
        info!(node = node_name, ids = %ids, "Requested instance removal");
        Ok(())
    }

    async fn delete_run(&mut self) -> Result<()> {
        let url = self.endpoint(&[])?;
        self.send_expect_success("delete_run", || self.request(Method::DELETE, &url))
            .await?;
        info!(run_id = %self.run_id, "Requested run deletion");
        Ok(())
    }
}

/// Factory handing out one [`HttpParameterStore`] per caller
#[derive(Debug, Clone)]
pub struct HttpParameterStoreFactory {
    config: Arc<ServiceConfig>,
    backoff: BackoffConfig,
}

impl HttpParameterStoreFactory {
    pub fn new(config: ServiceConfig, backoff: BackoffConfig) -> Self {
        Self {
            config: Arc::new(config),
            backoff,
        }
    }
}

impl ParameterStoreFactory for HttpParameterStoreFactory {
    fn create(&self) -> Result<Box<dyn ParameterStore>> {
        Ok(Box::new(HttpParameterStore::new(
            Arc::clone(&self.config),
            &self.backoff,
        )?))
    }
}
