//! The batch service: numeric-id lifecycle on top of the application
//! service.
//!
//! Creates are atomic over the pair (agent create, database insert). When the
//! insert fails after the application was submitted, the service compensates
//! by deleting the application again; if even that fails, the application is
//! an orphan in its cluster and the error says so.

use std::{collections::BTreeMap, sync::Arc};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{error, instrument, warn};

use crate::{
    error::ErrorKind,
    ident::{self, IdentError},
    livy::{
        Batch, BatchRequest, batch_state,
        store::{BatchStore, NewBatch, StoreError},
        to_application,
    },
    service::{ApplicationService, GatewayApplication, ServiceError},
};

pub type Result<T, E = BatchError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum BatchError {
    #[snafu(display("no such batch: {batch_id}"))]
    UnknownBatch { batch_id: i64 },

    #[snafu(display("batch store operation failed"))]
    Store { source: StoreError },

    #[snafu(display("error tracking '{gateway_id}' in database"))]
    Track { gateway_id: String },

    #[snafu(display("error tracking '{gateway_id}' and failed cleanup"))]
    TrackAndCleanup { gateway_id: String },

    #[snafu(display("no proxy user could be resolved for the batch"))]
    MissingUser,

    #[snafu(display("the gateway returned a malformed id"))]
    MalformedId { source: IdentError },

    #[snafu(display("application operation failed"))]
    Application { source: ServiceError },
}

impl BatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::UnknownBatch { .. } => ErrorKind::NotFound,
            BatchError::Application { source } => source.kind(),
            BatchError::Store { .. }
            | BatchError::Track { .. }
            | BatchError::TrackAndCleanup { .. }
            | BatchError::MissingUser
            | BatchError::MalformedId { .. } => ErrorKind::Internal,
        }
    }
}

struct Inner {
    applications: ApplicationService,
    store: Arc<dyn BatchStore>,
    default_namespace: String,
    default_log_lines: i64,
}

/// The numeric-id surface's service layer.
#[derive(Clone)]
pub struct BatchService {
    inner: Arc<Inner>,
}

impl BatchService {
    pub fn new(
        applications: ApplicationService,
        store: Arc<dyn BatchStore>,
        default_namespace: String,
        default_log_lines: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                applications,
                store,
                default_namespace,
                default_log_lines,
            }),
        }
    }

    /// Submits a batch and tracks it in the store.
    ///
    /// The proxy user resolves in priority order: the `doAs` query parameter,
    /// the `proxyUser` request field, the authenticated user. The namespace
    /// comes from the request header, falling back to the configured default.
    #[instrument(skip(self, request, authenticated_user))]
    pub async fn create(
        &self,
        request: BatchRequest,
        namespace: Option<String>,
        do_as: Option<String>,
        authenticated_user: &str,
    ) -> Result<Batch> {
        let namespace = namespace
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or_else(|| self.inner.default_namespace.clone());
        let user = resolve_user(do_as, request.proxy_user.clone(), authenticated_user)?;

        let application = to_application(&request, &namespace);
        let record = self
            .inner
            .applications
            .create(application, &user)
            .await
            .context(ApplicationSnafu)?;

        let gateway_id = record.gateway_id.clone();
        let uid = ident::parse(&gateway_id).context(MalformedIdSnafu)?.uuid;
        let batch = NewBatch {
            uid,
            name: gateway_id.clone(),
            username: user,
            namespace,
            cluster: record.cluster.clone(),
            submitted: serde_json::to_value(&record.spark_application)
                .unwrap_or(serde_json::Value::Null),
            state: batch_state(record.spark_application.state()).to_owned(),
        };

        match self.inner.store.insert(batch).await {
            Ok(batch_id) => Ok(to_batch(batch_id, &record)),
            Err(insert_error) => {
                warn!(
                    error = %insert_error,
                    gateway_id,
                    "failed to track batch, deleting the submitted application"
                );

                match self.inner.applications.delete(&gateway_id).await {
                    Ok(()) => TrackSnafu { gateway_id }.fail(),
                    Err(delete_error) => {
                        error!(
                            error = %delete_error,
                            gateway_id,
                            "cleanup after failed tracking also failed, the application is orphaned in its cluster"
                        );

                        TrackAndCleanupSnafu { gateway_id }.fail()
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, batch_id: i64) -> Result<Batch> {
        let record = self.lookup(batch_id).await?;
        let application = self
            .inner
            .applications
            .get(&record.name)
            .await
            .context(ApplicationSnafu)?;

        Ok(to_batch(batch_id, &application))
    }

    /// The batch state alone, read live from the owning cluster.
    #[instrument(skip(self))]
    pub async fn state(&self, batch_id: i64) -> Result<String> {
        let record = self.lookup(batch_id).await?;
        let status = self
            .inner
            .applications
            .status(&record.name)
            .await
            .context(ApplicationSnafu)?;

        Ok(batch_state(&status.app_state.state).to_owned())
    }

    /// Driver log lines. The agent returns one string; this surface splits it
    /// on newlines.
    #[instrument(skip(self))]
    pub async fn log(&self, batch_id: i64, size: Option<i64>) -> Result<Vec<String>> {
        let record = self.lookup(batch_id).await?;
        let lines = size.unwrap_or(self.inner.default_log_lines);
        let logs = self
            .inner
            .applications
            .logs(&record.name, lines)
            .await
            .context(ApplicationSnafu)?;

        Ok(logs.lines().map(str::to_owned).collect())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, batch_id: i64) -> Result<()> {
        let record = self.lookup(batch_id).await?;

        self.inner
            .applications
            .delete(&record.name)
            .await
            .context(ApplicationSnafu)?;
        self.inner.store.delete(batch_id).await.context(StoreSnafu)?;

        Ok(())
    }

    /// Lists tracked batches ascending from `from` (inclusive), at most
    /// `size` rows, straight from the store.
    #[instrument(skip(self))]
    pub async fn list(&self, from: Option<i64>, size: Option<i64>) -> Result<(i64, Vec<Batch>)> {
        let from = from.unwrap_or(0);
        let size = size.unwrap_or(100);

        let records = self
            .inner
            .store
            .list_from(from, size)
            .await
            .context(StoreSnafu)?;

        let batches = records
            .into_iter()
            .map(|record| Batch {
                id: record.batch_id,
                name: Some(record.name),
                app_id: record
                    .status
                    .as_ref()
                    .and_then(|status| status.get("sparkApplicationId"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned),
                app_info: BTreeMap::new(),
                log: Vec::new(),
                state: record.state,
            })
            .collect();

        Ok((from, batches))
    }

    async fn lookup(&self, batch_id: i64) -> Result<crate::livy::store::BatchRecord> {
        self.inner
            .store
            .get(batch_id)
            .await
            .context(StoreSnafu)?
            .context(UnknownBatchSnafu { batch_id })
    }
}

fn resolve_user(
    do_as: Option<String>,
    request_user: Option<String>,
    authenticated_user: &str,
) -> Result<String> {
    do_as
        .filter(|user| !user.is_empty())
        .or_else(|| request_user.filter(|user| !user.is_empty()))
        .or_else(|| {
            (!authenticated_user.is_empty()).then(|| authenticated_user.to_owned())
        })
        .context(MissingUserSnafu)
}

fn to_batch(batch_id: i64, record: &GatewayApplication) -> Batch {
    let application = &record.spark_application;

    let mut app_info = BTreeMap::new();
    if !record.status_urls.spark_ui.is_empty() {
        app_info.insert("sparkUiUrl".to_owned(), record.status_urls.spark_ui.clone());
    }
    if !record.status_urls.logs_ui.is_empty() {
        app_info.insert("driverLogUrl".to_owned(), record.status_urls.logs_ui.clone());
    }

    let app_id = application
        .status
        .as_ref()
        .map(|status| status.spark_application_id.clone())
        .filter(|app_id| !app_id.is_empty());

    Batch {
        id: batch_id,
        name: Some(record.gateway_id.clone()),
        app_id,
        app_info,
        log: Vec::new(),
        state: batch_state(application.state()).to_owned(),
    }
}
