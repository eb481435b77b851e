//! Per-cluster metrics scraping for the weight based routing policy.
//!
//! The router reads a single scalar per cluster from the cluster's metrics
//! endpoint (Prometheus text exposition). The series is identified by the
//! configured metric name and label set plus two well-known labels stamped by
//! the agents: `cluster` and `namespace`. Exactly one series must match,
//! otherwise the routing decision would be ambiguous and the whole call
//! fails.

use std::collections::{BTreeMap, HashMap};

use prometheus_parse::{Scrape, Value};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    config::{DebugPorts, PrometheusQueryConfig, SparkManagerConfig},
    fleet::Cluster,
    routing::render_cluster_hostname,
};

pub type Result<T, E = MetricsError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum MetricsError {
    #[snafu(display("no metrics endpoint is known for cluster {cluster:?}"))]
    UnknownCluster { cluster: String },

    #[snafu(display("failed to render metrics hostname for cluster {cluster:?}"))]
    RenderHostname { source: tera::Error, cluster: String },

    #[snafu(display("failed to scrape metrics endpoint {endpoint:?}"))]
    Fetch {
        source: reqwest::Error,
        endpoint: String,
    },

    #[snafu(display("failed to read metrics response from {endpoint:?}"))]
    ReadBody {
        source: reqwest::Error,
        endpoint: String,
    },

    #[snafu(display("failed to parse metrics exposition from {endpoint:?}"))]
    Parse {
        source: std::io::Error,
        endpoint: String,
    },

    #[snafu(display(
        "expected exactly one series of metric {metric:?} for cluster {cluster:?}, found {count}"
    ))]
    SeriesCardinality {
        metric: String,
        cluster: String,
        count: usize,
    },

    #[snafu(display("metric {metric:?} is not a scalar sample type"))]
    UnsupportedSampleType { metric: String },
}

/// Scrapes the single routing metric from per-cluster metrics endpoints.
///
/// Endpoint URLs are rendered once at construction time; the client itself is
/// stateless and safe to share between concurrent requests.
#[derive(Debug)]
pub struct MetricsClient {
    http: reqwest::Client,
    endpoints: HashMap<String, String>,
    metric: String,
    additional_labels: BTreeMap<String, String>,
}

impl MetricsClient {
    pub fn new(
        clusters: &[Cluster],
        query: &PrometheusQueryConfig,
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
                .and_then(|ports| ports.metrics_port)
                .unwrap_or(spark_manager.metrics_server.port);

            endpoints.insert(
                cluster.name.clone(),
                format!("http://{host}:{port}{}", spark_manager.metrics_server.endpoint),
            );
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoints,
            metric: query.metric.clone(),
            additional_labels: query.additional_labels.clone(),
        })
    }

    /// Fetches the routing metric for `cluster`. The `namespace` label value
    /// is the empty string when routing on the cluster dimension.
    pub async fn cluster_metric(&self, cluster: &Cluster, namespace: &str) -> Result<f64> {
        let endpoint = self
            .endpoints
            .get(&cluster.name)
            .context(UnknownClusterSnafu {
                cluster: cluster.name.clone(),
            })?;

        let response = self
            .http
            .get(endpoint)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .context(FetchSnafu { endpoint })?;
        let body = response
            .text()
            .await
            .context(ReadBodySnafu { endpoint })?;

        let scrape = Scrape::parse(body.lines().map(|line| Ok(line.to_owned())))
            .context(ParseSnafu { endpoint })?;

        let matched = scrape
            .samples
            .iter()
            .filter(|sample| {
                sample.metric == self.metric
                    && sample.labels.get("cluster").unwrap_or("") == cluster.name
                    && sample.labels.get("namespace").unwrap_or("") == namespace
                    && self
                        .additional_labels
                        .iter()
                        .all(|(key, value)| sample.labels.get(key).unwrap_or("") == value.as_str())
            })
            .collect::<Vec<_>>();

        ensure!(
            matched.len() == 1,
            SeriesCardinalitySnafu {
                metric: self.metric.clone(),
                cluster: cluster.name.clone(),
                count: matched.len()
            }
        );

        match matched[0].value {
            Value::Counter(value) | Value::Gauge(value) | Value::Untyped(value) => Ok(value),
            _ => UnsupportedSampleTypeSnafu {
                metric: self.metric.clone(),
            }
            .fail(),
        }
    }
}
