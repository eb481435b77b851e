//! The cluster router: picks the target cluster for a submission.
//!
//! Three policies exist as a closed set: `random`, `weightBasedRandom` and
//! `weightBased`. Every policy first narrows the fleet to clusters that
//! contain the requested namespace; a single eligible cluster short-circuits
//! without consulting weights or metrics. Eligible clusters are always walked
//! in ascending cluster id order so that draws and tie-breaks do not depend
//! on map iteration order.

use std::{collections::HashMap, sync::Arc};

use rand::Rng;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{instrument, warn};

use crate::{
    config::{ClusterRouterConfig, DebugPorts, Dimension, RouterType, SparkManagerConfig},
    error::ErrorKind,
    fleet::{Cluster, ClusterRegistry},
};

pub mod metrics;

pub use metrics::MetricsClient;

pub type Result<T, E = RoutingError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum RoutingError {
    #[snafu(display("no cluster is eligible for namespace {namespace:?}"))]
    NoCluster { namespace: String },

    #[snafu(display("failed to read the routing metric for cluster {cluster:?}"))]
    Metrics {
        source: metrics::MetricsError,
        cluster: String,
    },

    #[snafu(display("router type {router_type:?} requires a metrics client"))]
    MetricsClientRequired { router_type: RouterType },

    #[snafu(display("failed to build the metrics client"))]
    BuildMetricsClient { source: metrics::MetricsError },

    #[snafu(display("both primary and fallback router failed for namespace {namespace:?}"))]
    Unavailable {
        #[snafu(source(from(RoutingError, Box::new)))]
        source: Box<RoutingError>,
        namespace: String,
    },
}

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // The fleet simply does not serve this namespace, which is an
            // addressing problem on the caller's side.
            RoutingError::NoCluster { .. } => ErrorKind::BadRequest,
            RoutingError::Metrics { .. }
            | RoutingError::MetricsClientRequired { .. }
            | RoutingError::BuildMetricsClient { .. } => ErrorKind::Internal,
            RoutingError::Unavailable { source, .. } => source.kind(),
        }
    }
}

enum Policy {
    Random,
    WeightBasedRandom {
        dimension: Dimension,
    },
    WeightBased {
        dimension: Dimension,
        metrics: MetricsClient,
    },
}

/// A single routing policy over the cluster fleet.
pub struct ClusterRouter {
    registry: Arc<ClusterRegistry>,
    policy: Policy,
}

impl ClusterRouter {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        router_type: RouterType,
        config: &ClusterRouterConfig,
        spark_manager: &SparkManagerConfig,
        debug_ports: &HashMap<String, DebugPorts>,
    ) -> Result<Self> {
        let policy = match router_type {
            RouterType::Random => Policy::Random,
            RouterType::WeightBasedRandom => Policy::WeightBasedRandom {
                dimension: config.dimension,
            },
            RouterType::WeightBased => {
                let query = config
                    .prometheus_query
                    .as_ref()
                    .ok_or(RoutingError::MetricsClientRequired { router_type })?;
                let metrics =
                    MetricsClient::new(registry.all(), query, spark_manager, debug_ports)
                        .context(BuildMetricsClientSnafu)?;

                Policy::WeightBased {
                    dimension: config.dimension,
                    metrics,
                }
            }
        };

        Ok(Self { registry, policy })
    }

    /// Picks the target cluster for a submission into `namespace`.
    #[instrument(skip(self))]
    pub async fn pick(&self, namespace: &str) -> Result<&Cluster> {
        let mut eligible = self.registry.with_namespace(namespace);
        ensure!(!eligible.is_empty(), NoClusterSnafu { namespace });

        if let [only] = eligible[..] {
            return Ok(only);
        }

        // Stable traversal order for reproducible draws and tie-breaks.
        eligible.sort_by(|a, b| a.id.cmp(&b.id));

        match &self.policy {
            Policy::Random => {
                let index = rand::rng().random_range(0..eligible.len());
                Ok(eligible[index])
            }
            Policy::WeightBasedRandom { dimension } => {
                let weighted = weights(&eligible, *dimension, namespace);
                let total = weighted.iter().map(|(_, weight)| weight).sum::<f64>();
                ensure!(total > 0.0, NoClusterSnafu { namespace });

                let draw = rand::rng().random_range(0.0..total);
                Ok(pick_weighted(&weighted, draw))
            }
            Policy::WeightBased { dimension, metrics } => {
                let weighted = weights(&eligible, *dimension, namespace);
                let total = weighted.iter().map(|(_, weight)| weight).sum::<f64>();
                ensure!(total > 0.0, NoClusterSnafu { namespace });

                let namespace_label = match dimension {
                    Dimension::Cluster => "",
                    Dimension::Namespace => namespace,
                };

                let mut measured = Vec::with_capacity(weighted.len());
                for (cluster, weight) in &weighted {
                    let metric = metrics
                        .cluster_metric(cluster, namespace_label)
                        .await
                        .context(MetricsSnafu {
                            cluster: cluster.name.clone(),
                        })?;
                    measured.push((*cluster, *weight, metric));
                }

                Ok(pick_least_loaded(&measured, total))
            }
        }
    }
}

impl std::fmt::Debug for ClusterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let policy = match &self.policy {
            Policy::Random => "random",
            Policy::WeightBasedRandom { .. } => "weightBasedRandom",
            Policy::WeightBased { .. } => "weightBased",
        };

        f.debug_struct("ClusterRouter").field("policy", &policy).finish()
    }
}

/// Extracts the routing weight per eligible cluster. Under the namespace
/// dimension a cluster without the namespace is skipped rather than treated
/// as weight zero.
fn weights<'a>(
    eligible: &[&'a Cluster],
    dimension: Dimension,
    namespace: &str,
) -> Vec<(&'a Cluster, f64)> {
    eligible
        .iter()
        .filter_map(|cluster| match dimension {
            Dimension::Cluster => Some((*cluster, cluster.routing_weight)),
            Dimension::Namespace => cluster
                .namespace(namespace)
                .map(|ns| (*cluster, ns.routing_weight)),
        })
        .collect()
}

/// Walks the weighted clusters in order, returning the first cluster whose
/// accumulated weight interval contains `draw`.
fn pick_weighted<'a>(weighted: &[(&'a Cluster, f64)], draw: f64) -> &'a Cluster {
    let mut accumulated = 0.0;
    for (cluster, weight) in weighted {
        accumulated += weight;
        if draw < accumulated {
            return cluster;
        }
    }

    // Float rounding can leave the draw marginally outside the final
    // interval; the last cluster owns that remainder.
    weighted
        .last()
        .map(|(cluster, _)| *cluster)
        .expect("weighted cluster list is never empty")
}

/// Returns the cluster whose weight share exceeds its observed load share the
/// most. `measured` must be sorted by ascending cluster id; ties keep the
/// earlier entry.
fn pick_least_loaded<'a>(
    measured: &[(&'a Cluster, f64, f64)],
    weight_total: f64,
) -> &'a Cluster {
    let metric_total = measured.iter().map(|(_, _, metric)| metric).sum::<f64>();

    let mut best: Option<(&Cluster, f64)> = None;
    for (cluster, weight, metric) in measured {
        let weight_ratio = weight / weight_total;
        let metric_ratio = if metric_total > 0.0 {
            metric / metric_total
        } else {
            1.0
        };
        let ratio_diff = weight_ratio - metric_ratio;

        if best.is_none_or(|(_, best_diff)| ratio_diff > best_diff) {
            best = Some((cluster, ratio_diff));
        }
    }

    best.map(|(cluster, _)| cluster)
        .expect("measured cluster list is never empty")
}

/// A primary router with a single-shot fallback. The fallback is consulted
/// once when the primary fails; if it fails too, the submission fails.
pub struct FallbackRouter {
    primary: ClusterRouter,
    fallback: ClusterRouter,
}

impl FallbackRouter {
    pub fn new(primary: ClusterRouter, fallback: ClusterRouter) -> Self {
        Self { primary, fallback }
    }

    pub async fn pick(&self, namespace: &str) -> Result<&Cluster> {
        match self.primary.pick(namespace).await {
            Ok(cluster) => Ok(cluster),
            Err(error) => {
                warn!(
                    error = %error,
                    namespace,
                    "primary cluster router failed, consulting fallback"
                );

                self.fallback
                    .pick(namespace)
                    .await
                    .context(UnavailableSnafu { namespace })
            }
        }
    }
}

impl std::fmt::Debug for FallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRouter")
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Renders the agent hostname template for a cluster. The template only sees
/// the `clusterName` variable.
pub fn render_cluster_hostname(template: &str, cluster_name: &str) -> Result<String, tera::Error> {
    let mut context = tera::Context::new();
    context.insert("clusterName", cluster_name);

    tera::Tera::one_off(template, &context, false)
}
