//! HTTP client for the per-cluster in-cluster agents.
//!
//! The agent owns the Kubernetes-side lifecycle of submitted applications;
//! the gateway only talks to its small HTTP API. Per-cluster base endpoints
//! are rendered once at startup from the configured hostname template, so the
//! request path performs no templating.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::{
    application::{ApplicationStatus, SparkApplication},
    config::{DebugPorts, SparkManagerConfig},
    error::ErrorKind,
    fleet::Cluster,
    routing::render_cluster_hostname,
};

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum AgentError {
    #[snafu(display("no agent endpoint is known for cluster {cluster:?}"))]
    UnknownCluster { cluster: String },

    #[snafu(display("failed to render agent hostname for cluster {cluster:?}"))]
    RenderHostname { source: tera::Error, cluster: String },

    #[snafu(display("request to the agent of cluster {cluster:?} failed"))]
    Request {
        source: reqwest::Error,
        cluster: String,
    },

    #[snafu(display("failed to decode the agent response from cluster {cluster:?}"))]
    DecodeResponse {
        source: reqwest::Error,
        cluster: String,
    },

    #[snafu(display("agent of cluster {cluster:?} responded with {status}: {message}"))]
    Upstream {
        cluster: String,
        status: StatusCode,
        message: String,
    },
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Upstream { status, .. } => ErrorKind::from_status(*status),
            _ => ErrorKind::Internal,
        }
    }
}

/// The agent API the gateway depends on. The production implementation is
/// [`HttpAgentClient`]; tests substitute doubles.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Submits an application, returning the agent's echo of the payload.
    async fn create(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        application: &SparkApplication,
    ) -> Result<SparkApplication>;

    async fn get(&self, cluster: &str, namespace: &str, name: &str) -> Result<SparkApplication>;

    async fn list(&self, cluster: &str, namespace: &str) -> Result<Vec<SparkApplication>>;

    async fn status(&self, cluster: &str, namespace: &str, name: &str)
    -> Result<ApplicationStatus>;

    /// Fetches up to `lines` driver log lines as one string.
    async fn logs(&self, cluster: &str, namespace: &str, name: &str, lines: i64) -> Result<String>;

    async fn delete(&self, cluster: &str, namespace: &str, name: &str) -> Result<()>;
}

/// Error body the agents respond with.
#[derive(Debug, Deserialize)]
struct AgentErrorBody {
    error: String,
}

/// Production agent client over HTTP.
#[derive(Debug)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    endpoints: HashMap<String, String>,
}

impl HttpAgentClient {
    /// Builds the client, rendering one base endpoint per cluster from the
    /// hostname template and the configured (or per-cluster debug) port.
    pub fn new(
        clusters: &[Cluster],
        spark_manager: &SparkManagerConfig,
        debug_ports: &HashMap<String, DebugPorts>,
    ) -> Result<Self> {
        let mut endpoints = HashMap::with_capacity(clusters.len());

        for cluster in clusters {
            let host = render_cluster_hostname(&spark_manager.hostname_template, &cluster.name)
                .context(RenderHostnameSnafu {
                    cluster: cluster.name.clone(),
                })?;
            let port = debug_ports
                .get(&cluster.name)
                .and_then(|ports| ports.spark_manager_port)
                .unwrap_or(spark_manager.port);

            endpoints.insert(cluster.name.clone(), format!("http://{host}:{port}/api/v1"));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoints,
        })
    }

    fn endpoint(&self, cluster: &str) -> Result<&str> {
        self.endpoints
            .get(cluster)
            .map(String::as_str)
            .context(UnknownClusterSnafu { cluster })
    }

    /// Converts a non-success response into an [`AgentError::Upstream`],
    /// preserving the agent's status code and error message.
    async fn check(cluster: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<AgentErrorBody>(&raw)
            .map(|body| body.error)
            .unwrap_or(raw);

        UpstreamSnafu {
            cluster,
            status: StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message,
        }
        .fail()
    }
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    #[instrument(skip(self, application))]
    async fn create(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        application: &SparkApplication,
    ) -> Result<SparkApplication> {
        let url = format!("{}/{namespace}/{name}", self.endpoint(cluster)?);
        let response = self
            .http
            .post(url)
            .json(application)
            .send()
            .await
            .context(RequestSnafu { cluster })?;

        Self::check(cluster, response)
            .await?
            .json()
            .await
            .context(DecodeResponseSnafu { cluster })
    }

    #[instrument(skip(self))]
    async fn get(&self, cluster: &str, namespace: &str, name: &str) -> Result<SparkApplication> {
        let url = format!("{}/{namespace}/{name}", self.endpoint(cluster)?);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context(RequestSnafu { cluster })?;

        Self::check(cluster, response)
            .await?
            .json()
            .await
            .context(DecodeResponseSnafu { cluster })
    }

    #[instrument(skip(self))]
    async fn list(&self, cluster: &str, namespace: &str) -> Result<Vec<SparkApplication>> {
        let url = format!("{}/{namespace}", self.endpoint(cluster)?);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context(RequestSnafu { cluster })?;

        Self::check(cluster, response)
            .await?
            .json()
            .await
            .context(DecodeResponseSnafu { cluster })
    }

    #[instrument(skip(self))]
    async fn status(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<ApplicationStatus> {
        let url = format!("{}/{namespace}/{name}/status", self.endpoint(cluster)?);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context(RequestSnafu { cluster })?;

        Self::check(cluster, response)
            .await?
            .json()
            .await
            .context(DecodeResponseSnafu { cluster })
    }

    #[instrument(skip(self))]
    async fn logs(&self, cluster: &str, namespace: &str, name: &str, lines: i64) -> Result<String> {
        let url = format!("{}/{namespace}/{name}/logs", self.endpoint(cluster)?);
        let response = self
            .http
            .get(url)
            .query(&[("lines", lines)])
            .send()
            .await
            .context(RequestSnafu { cluster })?;

        Self::check(cluster, response)
            .await?
            .json()
            .await
            .context(DecodeResponseSnafu { cluster })
    }

    #[instrument(skip(self))]
    async fn delete(&self, cluster: &str, namespace: &str, name: &str) -> Result<()> {
        let url = format!("{}/{namespace}/{name}", self.endpoint(cluster)?);
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .context(RequestSnafu { cluster })?;

        Self::check(cluster, response).await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path, query_param},
    };

    use super::*;
    use crate::{config::MetricsServerConfig, fleet::test_cluster};

    fn client_for(server: &MockServer) -> HttpAgentClient {
        let address = server.address();
        let spark_manager = SparkManagerConfig {
            hostname_template: address.ip().to_string(),
            port: address.port(),
            metrics_server: MetricsServerConfig {
                port: 9090,
                endpoint: "/metrics".to_owned(),
            },
        };

        HttpAgentClient::new(
            &[test_cluster("alpha", "ca", &[("spark", "ns1")])],
            &spark_manager,
            &HashMap::new(),
        )
        .expect("agent client builds")
    }

    #[tokio::test]
    async fn create_posts_payload_and_decodes_echo() {
        let server = MockServer::start().await;
        let payload: SparkApplication = serde_json::from_value(json!({
            "metadata": {"name": "ca-ns1-app", "namespace": "spark"},
            "spec": {"proxyUser": "alice"}
        }))
        .expect("payload deserializes");

        Mock::given(method("POST"))
            .and(path("/api/v1/spark/ca-ns1-app"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(201).set_body_json(&payload))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let echoed = client
            .create("alpha", "spark", "ca-ns1-app", &payload)
            .await
            .expect("create succeeds");

        assert_eq!(echoed, payload);
    }

    #[tokio::test]
    async fn logs_pass_the_line_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/spark/app/logs"))
            .and(query_param("lines", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json("line one\nline two"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let logs = client
            .logs("alpha", "spark", "app", 42)
            .await
            .expect("logs fetch succeeds");

        assert_eq!(logs, "line one\nline two");
    }

    #[tokio::test]
    async fn upstream_status_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/spark/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "application not found"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let error = client.get("alpha", "spark", "missing").await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.to_string().contains("application not found"));
    }

    #[tokio::test]
    async fn unknown_cluster_is_rejected_locally() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let error = client.get("unknown", "spark", "app").await.unwrap_err();
        assert!(matches!(error, AgentError::UnknownCluster { .. }));
        assert_eq!(error.kind(), ErrorKind::Internal);
    }
}
