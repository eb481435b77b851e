//! Gateway configuration.
//!
//! The whole gateway is configured from a single YAML file which is
//! deserialized into [`GatewayConfig`] and validated once at startup. All
//! regular expressions referenced anywhere in the configuration are compiled
//! during [`GatewayConfig::validate`] so invalid config never reaches the
//! request path.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use crate::fleet::{Cluster, FleetError};

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to deserialize config file {path:?}"))]
    Deserialize {
        source: serde_yaml::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("fleet configuration is invalid"))]
    InvalidFleet { source: FleetError },

    #[snafu(display("at least one cluster must be configured"))]
    NoClusters,

    #[snafu(display(
        "cluster router type {router_type:?} requires a prometheusQuery configuration"
    ))]
    MissingPrometheusQuery { router_type: RouterType },

    #[snafu(display("middleware configuration at index {index} is invalid"))]
    InvalidMiddleware {
        source: crate::http::auth::AuthError,
        index: usize,
    },

    #[snafu(display("status url template {name:?} is invalid"))]
    InvalidStatusUrlTemplate { source: tera::Error, name: String },

    #[snafu(display("hostname template {template:?} is invalid"))]
    InvalidHostnameTemplate { source: tera::Error, template: String },
}

/// Top-level gateway configuration, mirroring the YAML config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub clusters: Vec<Cluster>,

    pub cluster_router: ClusterRouterConfig,

    pub gateway: GatewaySection,

    pub spark_manager: SparkManagerConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_value: Option<String>,

    /// Per-cluster port overrides, used when port-forwarding to agents from
    /// outside the clusters.
    #[serde(default)]
    pub debug_ports: HashMap<String, DebugPorts>,

    /// Database backing the numeric-id surface. The surface is disabled when
    /// this section is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub livy: LivyConfig,
}

impl GatewayConfig {
    /// Reads and deserializes the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;

        serde_yaml::from_str(&raw).context(DeserializeSnafu { path })
    }

    /// Validates the whole configuration. Regex compilation and template
    /// parsing happen here so startup fails fast on invalid config.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.clusters.is_empty(), NoClustersSnafu);
        for cluster in &self.clusters {
            cluster.validate().context(InvalidFleetSnafu)?;
        }

        self.cluster_router.validate()?;
        self.gateway.validate()?;
        self.spark_manager.validate()?;

        Ok(())
    }

    /// The selector label applied to every submitted application, when
    /// configured.
    pub fn selector(&self) -> Option<(String, String)> {
        match (&self.selector_key, &self.selector_value) {
            (Some(key), Some(value)) => Some((key.clone(), value.clone())),
            _ => None,
        }
    }
}

/// The routing policies the cluster router can run.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RouterType {
    #[serde(rename = "random")]
    Random,

    #[serde(rename = "weightBasedRandom")]
    WeightBasedRandom,

    #[serde(rename = "weightBased")]
    WeightBased,
}

/// The axis a weight based policy reads its weights from.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    #[default]
    Cluster,
    Namespace,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRouterConfig {
    #[serde(rename = "type")]
    pub router_type: RouterType,

    pub fallback_type: RouterType,

    #[serde(default)]
    pub dimension: Dimension,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_query: Option<PrometheusQueryConfig>,
}

impl ClusterRouterConfig {
    fn validate(&self) -> Result<()> {
        for router_type in [self.router_type, self.fallback_type] {
            ensure!(
                router_type != RouterType::WeightBased || self.prometheus_query.is_some(),
                MissingPrometheusQuerySnafu { router_type }
            );
        }

        Ok(())
    }
}

/// Identifies the single time series the weight based policy reads per
/// cluster. The `cluster` and `namespace` labels are added by the router.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusQueryConfig {
    pub metric: String,

    #[serde(default)]
    pub additional_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySection {
    pub status_url_templates: StatusUrlTemplates,

    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    /// Log lines returned when the client does not pass `lines`.
    #[serde(default = "default_log_lines")]
    pub default_log_lines: i64,

    #[serde(default)]
    pub middleware: Vec<MiddlewareConfig>,
}

impl GatewaySection {
    fn validate(&self) -> Result<()> {
        self.status_url_templates.validate()?;

        for (index, middleware) in self.middleware.iter().enumerate() {
            crate::http::auth::AuthMiddleware::from_config(middleware)
                .context(InvalidMiddlewareSnafu { index })?;
        }

        Ok(())
    }
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_log_lines() -> i64 {
    100
}

/// Templates rendered against the application payload to produce the three
/// status URLs returned with every application record.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StatusUrlTemplates {
    #[serde(rename = "sparkUI", default)]
    pub spark_ui: String,

    #[serde(rename = "sparkHistoryUI", default)]
    pub spark_history_ui: String,

    #[serde(rename = "logsUI", default)]
    pub logs_ui: String,
}

impl StatusUrlTemplates {
    fn validate(&self) -> Result<()> {
        for (name, template) in [
            ("sparkUI", &self.spark_ui),
            ("sparkHistoryUI", &self.spark_history_ui),
            ("logsUI", &self.logs_ui),
        ] {
            let mut tera = tera::Tera::default();
            tera.add_raw_template(name, template)
                .context(InvalidStatusUrlTemplateSnafu { name })?;
        }

        Ok(())
    }
}

/// The middleware chain is configured as an ordered list of tagged blobs.
/// Every variant knows how to construct (and thereby validate) itself; see
/// [`crate::http::auth`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "conf")]
pub enum MiddlewareConfig {
    #[serde(rename = "regexAllow")]
    RegexAllow(RegexAllowConfig),

    #[serde(rename = "regexDeny")]
    RegexDeny(RegexDenyConfig),

    #[serde(rename = "headerAuth")]
    HeaderAuth(HeaderAuthConfig),

    #[serde(rename = "serviceTokenAuth")]
    ServiceTokenAuth(ServiceTokenAuthConfig),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexAllowConfig {
    #[serde(default)]
    pub allow: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexDenyConfig {
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderAuthConfig {
    #[serde(default)]
    pub headers: Vec<UserHeaderConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserHeaderConfig {
    pub header: String,
    pub validation_regex: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenAuthConfig {
    /// Service user to token map.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

/// Location of the per-cluster agents and their metrics endpoints.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkManagerConfig {
    /// Template producing the agent hostname, rendered with the variable
    /// `clusterName`.
    pub hostname_template: String,

    #[serde(default = "default_spark_manager_port")]
    pub port: u16,

    pub metrics_server: MetricsServerConfig,
}

impl SparkManagerConfig {
    fn validate(&self) -> Result<()> {
        let mut tera = tera::Tera::default();
        tera.add_raw_template("hostname", &self.hostname_template)
            .context(InvalidHostnameTemplateSnafu {
                template: self.hostname_template.clone(),
            })?;

        Ok(())
    }
}

fn default_spark_manager_port() -> u16 {
    8080
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsServerConfig {
    pub port: u16,

    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_owned()
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugPorts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_manager_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub hostname: String,

    #[serde(default = "default_database_port")]
    pub port: u16,

    pub database_name: String,

    pub username: String,

    /// Overridable via the `SPARK_GATEWAY_DB_PASSWORD` environment variable.
    #[serde(default)]
    pub password: String,
}

fn default_database_port() -> u16 {
    5432
}

impl DatabaseConfig {
    /// The password, with the environment taking precedence over the file.
    pub fn password(&self) -> String {
        std::env::var("SPARK_GATEWAY_DB_PASSWORD").unwrap_or_else(|_| self.password.clone())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivyConfig {
    /// Namespace used for numeric-id submissions that do not carry the
    /// namespace header.
    #[serde(default = "default_livy_namespace")]
    pub default_namespace: String,
}

impl Default for LivyConfig {
    fn default() -> Self {
        Self {
            default_namespace: default_livy_namespace(),
        }
    }
}

fn default_livy_namespace() -> String {
    "default".to_owned()
}
