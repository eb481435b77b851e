//! The application service: validates, identifies, stamps, forwards and
//! demultiplexes requests across the cluster fleet.
//!
//! The service is a plain value without locks. Everything it holds is either
//! immutable after startup or internally synchronized, so clones can serve
//! concurrent requests.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::{
    agent::{AgentApi, AgentError},
    application::{APPLICATION_NAME_ANNOTATION, SparkApplication, USER_LABEL},
    error::ErrorKind,
    fleet::{Cluster, ClusterRegistry, RegistryError},
    ident::{self, IdGenerator, IdentError},
    routing::{FallbackRouter, RoutingError},
    service::urls::{StatusUrlRenderer, StatusUrls},
};

pub mod urls;

/// Literal selecting every cluster (or every namespace) in list requests.
pub const ALL: &str = "all";

/// Wall clock budget for a whole list fan-out.
const LIST_TIMEOUT: Duration = Duration::from_secs(60);

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum ServiceError {
    #[snafu(display("application is invalid: {}", reasons.join("; ")))]
    InvalidApplication { reasons: Vec<String> },

    #[snafu(display("failed to route the submission"))]
    Routing { source: RoutingError },

    #[snafu(display(
        "cluster {cluster:?} no longer contains namespace {namespace:?} after routing"
    ))]
    ClusterNamespaceVanished { cluster: String, namespace: String },

    #[snafu(display("invalid gateway id"))]
    ParseId { source: IdentError },

    #[snafu(display("failed to resolve the owning cluster"))]
    Registry { source: RegistryError },

    #[snafu(display("gateway id {gateway_id:?} references an unknown namespace id"))]
    UnknownNamespaceId { gateway_id: String },

    #[snafu(display("cluster {cluster:?} has no namespace {namespace:?}"))]
    UnknownNamespace { cluster: String, namespace: String },

    #[snafu(display("agent call failed"))]
    Agent { source: AgentError },

    #[snafu(display(
        "application {gateway_id:?} was not created through this gateway (missing label {USER_LABEL:?})"
    ))]
    NotGatewayOwned { gateway_id: String },

    #[snafu(display("listing applications failed in a cluster worker"))]
    ListWorker { source: AgentError },

    #[snafu(display("listing applications timed out after {timeout:?}"))]
    ListTimeout { timeout: Duration },

    #[snafu(display("listing applications was cancelled"))]
    ListCancelled,

    #[snafu(display("a cluster worker exited without reporting a result"))]
    WorkersAborted,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidApplication { .. } | ServiceError::ParseId { .. } => {
                ErrorKind::BadRequest
            }
            ServiceError::Routing { source } => source.kind(),
            ServiceError::Agent { source } => source.kind(),
            ServiceError::Registry { .. }
            | ServiceError::UnknownNamespaceId { .. }
            | ServiceError::UnknownNamespace { .. } => ErrorKind::NotFound,
            ServiceError::ClusterNamespaceVanished { .. }
            | ServiceError::NotGatewayOwned { .. }
            | ServiceError::ListWorker { .. }
            | ServiceError::ListTimeout { .. }
            | ServiceError::ListCancelled
            | ServiceError::WorkersAborted => ErrorKind::Internal,
        }
    }
}

/// An application record as returned to gateway clients: the agent's view of
/// the payload plus the gateway-owned envelope.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayApplication {
    pub gateway_id: String,

    /// Name of the cluster hosting the application.
    pub cluster: String,

    /// The user the application runs as.
    pub user: String,

    pub spark_application: SparkApplication,

    pub status_urls: StatusUrls,
}

struct Inner {
    registry: Arc<ClusterRegistry>,
    router: FallbackRouter,
    ids: IdGenerator,
    agent: Arc<dyn AgentApi>,
    urls: StatusUrlRenderer,
    selector: Option<(String, String)>,
}

/// The stateless submission orchestrator.
#[derive(Clone)]
pub struct ApplicationService {
    inner: Arc<Inner>,
    list_timeout: Duration,
}

impl ApplicationService {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        router: FallbackRouter,
        ids: IdGenerator,
        agent: Arc<dyn AgentApi>,
        urls: StatusUrlRenderer,
        selector: Option<(String, String)>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                router,
                ids,
                agent,
                urls,
                selector,
            }),
            list_timeout: LIST_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Submits an application on behalf of `user`.
    ///
    /// The gateway rewrites the payload before forwarding: the name becomes a
    /// freshly allocated gateway id (the submitted name is preserved in an
    /// annotation), the user label and optional selector label are stamped,
    /// and `spec.proxyUser` is forced to the submitting user. This operation
    /// is not idempotent; retries produce new gateway ids.
    #[instrument(skip(self, application), fields(namespace = %application.metadata.namespace))]
    pub async fn create(
        &self,
        mut application: SparkApplication,
        user: &str,
    ) -> Result<GatewayApplication> {
        let mut reasons = Vec::new();
        if application.metadata.namespace.is_empty() {
            reasons.push("metadata.namespace must not be empty".to_owned());
        }
        ensure!(reasons.is_empty(), InvalidApplicationSnafu { reasons });

        let namespace_name = application.metadata.namespace.clone();
        let cluster = self
            .inner
            .router
            .pick(&namespace_name)
            .await
            .context(RoutingSnafu)?;
        let namespace =
            cluster
                .namespace(&namespace_name)
                .context(ClusterNamespaceVanishedSnafu {
                    cluster: cluster.name.clone(),
                    namespace: namespace_name.clone(),
                })?;

        let gateway_id = self.inner.ids.allocate(cluster, namespace);

        if !application.metadata.name.is_empty() {
            application.metadata.annotations.insert(
                APPLICATION_NAME_ANNOTATION.to_owned(),
                application.metadata.name.clone(),
            );
        }
        application.metadata.name = gateway_id.clone();
        application
            .metadata
            .labels
            .insert(USER_LABEL.to_owned(), user.to_owned());
        if let Some((key, value)) = &self.inner.selector {
            application
                .metadata
                .labels
                .insert(key.clone(), value.clone());
        }
        application.set_proxy_user(user);

        let echoed = self
            .inner
            .agent
            .create(&cluster.name, &namespace_name, &gateway_id, &application)
            .await
            .context(AgentSnafu)?;

        // The authoritative user is whatever the agent accepted.
        let user = echoed.proxy_user().unwrap_or_default().to_owned();
        let cluster = cluster.name.clone();

        Ok(self.wrap(gateway_id, cluster, user, echoed))
    }

    /// Fetches a single application by gateway id.
    #[instrument(skip(self))]
    pub async fn get(&self, gateway_id: &str) -> Result<GatewayApplication> {
        let (cluster, namespace) = self.resolve(gateway_id)?;
        let cluster = cluster.name.clone();

        let application = self
            .inner
            .agent
            .get(&cluster, &namespace, gateway_id)
            .await
            .context(AgentSnafu)?;
        ensure!(
            application.metadata.labels.contains_key(USER_LABEL),
            NotGatewayOwnedSnafu { gateway_id }
        );

        let user = application
            .metadata
            .labels
            .get(USER_LABEL)
            .cloned()
            .unwrap_or_default();

        Ok(self.wrap(gateway_id.to_owned(), cluster, user, application))
    }

    #[instrument(skip(self))]
    pub async fn status(&self, gateway_id: &str) -> Result<crate::application::ApplicationStatus> {
        let (cluster, namespace) = self.resolve(gateway_id)?;

        self.inner
            .agent
            .status(&cluster.name, &namespace, gateway_id)
            .await
            .context(AgentSnafu)
    }

    #[instrument(skip(self))]
    pub async fn logs(&self, gateway_id: &str, lines: i64) -> Result<String> {
        let (cluster, namespace) = self.resolve(gateway_id)?;

        self.inner
            .agent
            .logs(&cluster.name, &namespace, gateway_id, lines)
            .await
            .context(AgentSnafu)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, gateway_id: &str) -> Result<()> {
        let (cluster, namespace) = self.resolve(gateway_id)?;

        self.inner
            .agent
            .delete(&cluster.name, &namespace, gateway_id)
            .await
            .context(AgentSnafu)
    }

    /// Lists applications across clusters and namespaces. Both selectors
    /// accept the literal `"all"`.
    ///
    /// One worker runs per selected cluster, walking that cluster's
    /// namespaces sequentially; workers run in parallel. The call ends on the
    /// first of: all workers done, any worker error, the wall timeout, or
    /// caller cancellation. Result ordering across clusters is unspecified.
    #[instrument(skip(self, cancel))]
    pub async fn list(
        &self,
        cluster: &str,
        namespace: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<SparkApplication>> {
        let plan = self.plan(cluster, namespace)?;
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let worker_token = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(plan.len());
        let mut pending = plan.len();

        for (cluster_name, namespaces) in plan {
            let agent = Arc::clone(&self.inner.agent);
            let token = worker_token.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let mut collected = Vec::new();

                for namespace in namespaces {
                    // A cancelled request must not fan out further agent
                    // calls; the token is checked on every namespace
                    // boundary.
                    let result = tokio::select! {
                        () = token.cancelled() => return,
                        result = agent.list(&cluster_name, &namespace) => result,
                    };

                    match result {
                        Ok(mut batch) => collected.append(&mut batch),
                        Err(error) => {
                            let _ = tx.send(Err(error)).await;
                            return;
                        }
                    }
                }

                let _ = tx.send(Ok(collected)).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::Instant::now() + self.list_timeout;
        let mut applications = Vec::new();

        while pending > 0 {
            let message = tokio::select! {
                () = cancel.cancelled() => {
                    worker_token.cancel();
                    return ListCancelledSnafu.fail();
                }
                () = tokio::time::sleep_until(deadline) => {
                    worker_token.cancel();
                    return ListTimeoutSnafu { timeout: self.list_timeout }.fail();
                }
                message = rx.recv() => message,
            };

            match message {
                Some(Ok(mut batch)) => {
                    applications.append(&mut batch);
                    pending -= 1;
                }
                Some(Err(error)) => {
                    worker_token.cancel();
                    return Err(error).context(ListWorkerSnafu);
                }
                None => return WorkersAbortedSnafu.fail(),
            }
        }

        Ok(applications)
    }

    /// Expands the list selectors into a cluster name to namespace names work
    /// plan.
    fn plan(&self, cluster: &str, namespace: &str) -> Result<BTreeMap<String, Vec<String>>> {
        let mut plan = BTreeMap::new();

        if cluster == ALL {
            if namespace == ALL {
                for cluster in self.inner.registry.all() {
                    plan.insert(
                        cluster.name.clone(),
                        cluster.namespaces.iter().map(|ns| ns.name.clone()).collect(),
                    );
                }
            } else {
                for cluster in self.inner.registry.with_namespace(namespace) {
                    plan.insert(cluster.name.clone(), vec![namespace.to_owned()]);
                }
            }
        } else {
            let cluster = self.inner.registry.by_name(cluster).context(RegistrySnafu)?;

            if namespace == ALL {
                plan.insert(
                    cluster.name.clone(),
                    cluster.namespaces.iter().map(|ns| ns.name.clone()).collect(),
                );
            } else {
                ensure!(
                    cluster.namespace(namespace).is_some(),
                    UnknownNamespaceSnafu {
                        cluster: cluster.name.clone(),
                        namespace
                    }
                );
                plan.insert(cluster.name.clone(), vec![namespace.to_owned()]);
            }
        }

        Ok(plan)
    }

    fn resolve(&self, gateway_id: &str) -> Result<(&Cluster, String)> {
        let parsed = ident::parse(gateway_id).context(ParseIdSnafu)?;
        let cluster = self
            .inner
            .registry
            .by_id(&parsed.cluster_id)
            .context(RegistrySnafu)?;
        let namespace = cluster
            .namespace_by_id(&parsed.namespace_id)
            .context(UnknownNamespaceIdSnafu { gateway_id })?;

        Ok((cluster, namespace.name.clone()))
    }

    fn wrap(
        &self,
        gateway_id: String,
        cluster: String,
        user: String,
        application: SparkApplication,
    ) -> GatewayApplication {
        let status_urls = self.inner.urls.render(&application);

        if user.is_empty() {
            warn!(gateway_id, "application record carries no user");
        }

        GatewayApplication {
            gateway_id,
            cluster,
            user,
            spark_application: application,
            status_urls,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::{
        application::ApplicationStatus,
        config::{
            ClusterRouterConfig, Dimension, MetricsServerConfig, RouterType, SparkManagerConfig,
            StatusUrlTemplates,
        },
        fleet::test_cluster,
        routing::ClusterRouter,
    };

    const FIXED_UUID: &str = "00000000-0000-7000-8000-000000000000";

    /// Scriptable agent double. Records every call; `list` optionally delays
    /// or fails per cluster.
    #[derive(Default)]
    struct StubAgent {
        list_items: HashMap<(String, String), usize>,
        failing_clusters: HashSet<String>,
        list_delay: Option<Duration>,
        get_response: Option<SparkApplication>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubAgent {
        fn recorded_calls(&self) -> Vec<(String, String)> {
            self.calls.lock().expect("call log lock").clone()
        }

        fn upstream_failure(cluster: &str) -> AgentError {
            AgentError::Upstream {
                cluster: cluster.to_owned(),
                status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                message: "agent exploded".to_owned(),
            }
        }
    }

    #[async_trait]
    impl AgentApi for StubAgent {
        async fn create(
            &self,
            _cluster: &str,
            _namespace: &str,
            _name: &str,
            application: &SparkApplication,
        ) -> crate::agent::Result<SparkApplication> {
            Ok(application.clone())
        }

        async fn get(
            &self,
            cluster: &str,
            _namespace: &str,
            _name: &str,
        ) -> crate::agent::Result<SparkApplication> {
            self.get_response
                .clone()
                .ok_or_else(|| Self::upstream_failure(cluster))
        }

        async fn list(
            &self,
            cluster: &str,
            namespace: &str,
        ) -> crate::agent::Result<Vec<SparkApplication>> {
            self.calls
                .lock()
                .expect("call log lock")
                .push((cluster.to_owned(), namespace.to_owned()));

            if let Some(delay) = self.list_delay {
                tokio::time::sleep(delay).await;
            }

            if self.failing_clusters.contains(cluster) {
                return Err(Self::upstream_failure(cluster));
            }

            let count = self
                .list_items
                .get(&(cluster.to_owned(), namespace.to_owned()))
                .copied()
                .unwrap_or_default();
            Ok(vec![SparkApplication::default(); count])
        }

        async fn status(
            &self,
            cluster: &str,
            _namespace: &str,
            _name: &str,
        ) -> crate::agent::Result<ApplicationStatus> {
            Err(Self::upstream_failure(cluster))
        }

        async fn logs(
            &self,
            _cluster: &str,
            _namespace: &str,
            _name: &str,
            _lines: i64,
        ) -> crate::agent::Result<String> {
            Ok("line one\nline two".to_owned())
        }

        async fn delete(
            &self,
            _cluster: &str,
            _namespace: &str,
            _name: &str,
        ) -> crate::agent::Result<()> {
            Ok(())
        }
    }

    fn service_with(
        clusters: Vec<crate::fleet::Cluster>,
        agent: Arc<dyn AgentApi>,
        selector: Option<(String, String)>,
    ) -> ApplicationService {
        let registry = Arc::new(ClusterRegistry::new(clusters).expect("valid test fleet"));
        let spark_manager = SparkManagerConfig {
            hostname_template: "127.0.0.1".to_owned(),
            port: 8080,
            metrics_server: MetricsServerConfig {
                port: 9090,
                endpoint: "/metrics".to_owned(),
            },
        };
        let config = ClusterRouterConfig {
            router_type: RouterType::Random,
            fallback_type: RouterType::Random,
            dimension: Dimension::Cluster,
            prometheus_query: None,
        };

        let primary = ClusterRouter::new(
            Arc::clone(&registry),
            RouterType::Random,
            &config,
            &spark_manager,
            &HashMap::new(),
        )
        .expect("router builds");
        let fallback = ClusterRouter::new(
            Arc::clone(&registry),
            RouterType::Random,
            &config,
            &spark_manager,
            &HashMap::new(),
        )
        .expect("router builds");

        let urls = StatusUrlRenderer::new(&StatusUrlTemplates {
            spark_ui: "https://spark.example.com/{{ namespace }}/{{ name }}".to_owned(),
            spark_history_ui: String::new(),
            logs_ui: String::new(),
        })
        .expect("templates parse");

        ApplicationService::new(
            registry,
            FallbackRouter::new(primary, fallback),
            IdGenerator::with_source(|| Uuid::parse_str(FIXED_UUID).expect("valid uuid")),
            agent,
            urls,
            selector,
        )
    }

    fn submitted(namespace: &str, name: &str) -> SparkApplication {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"type": "Python"}
        }))
        .expect("payload deserializes")
    }

    #[tokio::test]
    async fn create_routes_stamps_and_wraps() {
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(StubAgent::default()),
            Some(("spark-gateway/routed".to_owned(), "true".to_owned())),
        );

        let record = service
            .create(submitted("x", "pi"), "u")
            .await
            .expect("create succeeds");

        assert_eq!(record.gateway_id, format!("ca-nx-{FIXED_UUID}"));
        assert_eq!(record.cluster, "alpha");
        assert_eq!(record.user, "u");

        let application = &record.spark_application;
        assert_eq!(application.metadata.name, record.gateway_id);
        assert_eq!(
            application.metadata.labels.get(USER_LABEL).map(String::as_str),
            Some("u")
        );
        assert_eq!(
            application.metadata.labels.get("spark-gateway/routed").map(String::as_str),
            Some("true")
        );
        assert_eq!(
            application
                .metadata
                .annotations
                .get(APPLICATION_NAME_ANNOTATION)
                .map(String::as_str),
            Some("pi")
        );
        assert_eq!(application.proxy_user(), Some("u"));
        assert_eq!(
            record.status_urls.spark_ui,
            format!("https://spark.example.com/x/{}", record.gateway_id)
        );
    }

    #[tokio::test]
    async fn create_without_name_skips_the_annotation() {
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(StubAgent::default()),
            None,
        );

        let record = service
            .create(submitted("x", ""), "u")
            .await
            .expect("create succeeds");

        assert!(
            !record
                .spark_application
                .metadata
                .annotations
                .contains_key(APPLICATION_NAME_ANNOTATION)
        );
    }

    #[tokio::test]
    async fn create_rejects_missing_namespace() {
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(StubAgent::default()),
            None,
        );

        let error = service.create(submitted("", "pi"), "u").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BadRequest);
        assert!(error.to_string().contains("metadata.namespace"));
    }

    #[tokio::test]
    async fn create_rejects_unserved_namespace() {
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(StubAgent::default()),
            None,
        );

        let error = service
            .create(submitted("elsewhere", "pi"), "u")
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::Routing { .. }));
    }

    #[tokio::test]
    async fn get_requires_the_gateway_user_label() {
        let foreign: SparkApplication = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "ca-nx-app", "namespace": "x"}
        }))
        .expect("payload deserializes");
        let agent = StubAgent {
            get_response: Some(foreign),
            ..StubAgent::default()
        };
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(agent),
            None,
        );

        let error = service
            .get(&format!("ca-nx-{FIXED_UUID}"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("not created through this gateway"));
    }

    #[tokio::test]
    async fn lookups_by_unknown_cluster_id_are_not_found() {
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(StubAgent::default()),
            None,
        );

        let error = service
            .get(&format!("zz-nx-{FIXED_UUID}"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let error = service.get("not-a-gateway-id").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn list_all_visits_every_cluster_namespace_pair() {
        let agent = Arc::new(StubAgent {
            list_items: HashMap::from([
                (("alpha".to_owned(), "x".to_owned()), 2),
                (("alpha".to_owned(), "y".to_owned()), 1),
                (("beta".to_owned(), "x".to_owned()), 3),
            ]),
            ..StubAgent::default()
        });
        let service = service_with(
            vec![
                test_cluster("alpha", "ca", &[("x", "nx"), ("y", "ny")]),
                test_cluster("beta", "cb", &[("x", "nx")]),
            ],
            Arc::clone(&agent) as Arc<dyn AgentApi>,
            None,
        );

        let applications = service
            .list(ALL, ALL, CancellationToken::new())
            .await
            .expect("list succeeds");
        assert_eq!(applications.len(), 6);

        let visited: HashSet<_> = agent.recorded_calls().into_iter().collect();
        let expected: HashSet<_> = [
            ("alpha".to_owned(), "x".to_owned()),
            ("alpha".to_owned(), "y".to_owned()),
            ("beta".to_owned(), "x".to_owned()),
        ]
        .into_iter()
        .collect();
        assert_eq!(visited, expected);
    }

    #[tokio::test]
    async fn list_worker_error_aborts_the_request() {
        let agent = Arc::new(StubAgent {
            list_items: HashMap::from([(("alpha".to_owned(), "x".to_owned()), 3)]),
            failing_clusters: HashSet::from(["beta".to_owned()]),
            ..StubAgent::default()
        });
        let service = service_with(
            vec![
                test_cluster("alpha", "ca", &[("x", "nx")]),
                test_cluster("beta", "cb", &[("x", "nx")]),
            ],
            agent,
            None,
        );

        let error = service
            .list(ALL, ALL, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::ListWorker { .. }));
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn list_rejects_unknown_explicit_selectors() {
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            Arc::new(StubAgent::default()),
            None,
        );

        let error = service
            .list("missing", ALL, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let error = service
            .list("alpha", "missing", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_cancellation_stops_at_the_namespace_boundary() {
        let agent = Arc::new(StubAgent {
            list_delay: Some(Duration::from_millis(50)),
            ..StubAgent::default()
        });
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx"), ("y", "ny")])],
            Arc::clone(&agent) as Arc<dyn AgentApi>,
            None,
        );

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let error = service.list(ALL, ALL, cancel).await.unwrap_err();
        assert!(matches!(error, ServiceError::ListCancelled));

        // Give an (incorrectly still running) worker time to reach the next
        // namespace, then verify it never did.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            agent.recorded_calls(),
            vec![("alpha".to_owned(), "x".to_owned())]
        );
    }

    #[tokio::test]
    async fn list_times_out() {
        let agent = Arc::new(StubAgent {
            list_delay: Some(Duration::from_millis(200)),
            ..StubAgent::default()
        });
        let service = service_with(
            vec![test_cluster("alpha", "ca", &[("x", "nx")])],
            agent,
            None,
        )
        .with_list_timeout(Duration::from_millis(20));

        let error = service
            .list(ALL, ALL, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::ListTimeout { .. }));
    }
}
