//! The numeric-id (Livy compatible) API surface.
//!
//! This surface re-exposes the gateway under a batch abstraction keyed by
//! monotonically increasing integers, for tools that speak that protocol.
//! It owns the only persistent state in the gateway: the batch id to gateway
//! id mapping (see [`store`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::{ObjectMeta, SparkApplication};

pub mod handlers;
pub mod service;
pub mod store;

pub use service::{BatchError, BatchService};

/// Header selecting the submission namespace on batch creates.
pub const NAMESPACE_HEADER: &str = "x-spark-gateway-livy-namespace";

const DEFAULT_SPARK_VERSION: &str = "3.5.0";
const DEFAULT_MODE: &str = "cluster";

/// Shared state of the numeric-id surface.
#[derive(Clone)]
pub struct LivyState {
    pub service: BatchService,
}

/// A batch creation request, modelled on the external batch API.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Main application file; a `.py` extension selects a Python job.
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jars: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub py_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archives: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_cores: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_cores: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_executors: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conf: BTreeMap<String, String>,
}

/// A batch record as returned to clients of this surface.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default)]
    pub app_info: BTreeMap<String, String>,

    #[serde(default)]
    pub log: Vec<String>,

    pub state: String,
}

/// Maps an application state reported by the agent onto the batch state
/// vocabulary of this surface. Unknown inputs map to `dead`; an application
/// without an observed state yet is `starting`.
pub fn batch_state(application_state: &str) -> &'static str {
    match application_state {
        "" | "SUBMITTED" | "PENDING_RERUN" => "starting",
        "RUNNING" | "SUCCEEDING" => "running",
        "COMPLETED" => "success",
        _ => "dead",
    }
}

/// Maps a batch request onto an application payload for the application
/// service. The proxy user is intentionally left unset; the application
/// service stamps it during submission.
pub fn to_application(request: &BatchRequest, namespace: &str) -> SparkApplication {
    let application_type = if request.file.ends_with(".py") {
        "Python"
    } else {
        "Java"
    };

    let mut spec = serde_json::Map::new();
    spec.insert("type".to_owned(), application_type.into());
    spec.insert("mode".to_owned(), DEFAULT_MODE.into());
    spec.insert("sparkVersion".to_owned(), DEFAULT_SPARK_VERSION.into());
    spec.insert("mainApplicationFile".to_owned(), request.file.clone().into());

    if let Some(class_name) = &request.class_name {
        spec.insert("mainClass".to_owned(), class_name.clone().into());
    }
    if !request.args.is_empty() {
        spec.insert("arguments".to_owned(), request.args.clone().into());
    }
    if !request.conf.is_empty() {
        spec.insert(
            "sparkConf".to_owned(),
            serde_json::to_value(&request.conf).unwrap_or(Value::Null),
        );
    }

    let mut deps = serde_json::Map::new();
    for (key, values) in [
        ("jars", &request.jars),
        ("files", &request.files),
        ("pyFiles", &request.py_files),
        ("archives", &request.archives),
    ] {
        if !values.is_empty() {
            deps.insert(key.to_owned(), values.clone().into());
        }
    }
    if !deps.is_empty() {
        spec.insert("deps".to_owned(), Value::Object(deps));
    }

    let mut driver = serde_json::Map::new();
    driver.insert("cores".to_owned(), request.driver_cores.unwrap_or(1).into());
    driver.insert(
        "memory".to_owned(),
        request.driver_memory.clone().unwrap_or_else(|| "1g".to_owned()).into(),
    );
    spec.insert("driver".to_owned(), Value::Object(driver));

    let mut executor = serde_json::Map::new();
    executor.insert("cores".to_owned(), request.executor_cores.unwrap_or(1).into());
    executor.insert(
        "memory".to_owned(),
        request.executor_memory.clone().unwrap_or_else(|| "1g".to_owned()).into(),
    );
    executor.insert("instances".to_owned(), request.num_executors.unwrap_or(1).into());
    spec.insert("executor".to_owned(), Value::Object(executor));

    SparkApplication {
        api_version: "sparkoperator.k8s.io/v1beta2".to_owned(),
        kind: "SparkApplication".to_owned(),
        metadata: ObjectMeta {
            name: request.name.clone().unwrap_or_default(),
            namespace: namespace.to_owned(),
            ..ObjectMeta::default()
        },
        spec: Value::Object(spec),
        status: None,
        other: serde_json::Map::new(),
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", "starting")]
    #[case("SUBMITTED", "starting")]
    #[case("PENDING_RERUN", "starting")]
    #[case("RUNNING", "running")]
    #[case("SUCCEEDING", "running")]
    #[case("COMPLETED", "success")]
    #[case("FAILED", "dead")]
    #[case("SUBMISSION_FAILED", "dead")]
    #[case("FAILING", "dead")]
    #[case("INVALIDATING", "dead")]
    #[case("UNKNOWN", "dead")]
    #[case("SOMETHING_NEW", "dead")]
    fn state_mapping(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(batch_state(input), expected);
    }

    #[test]
    fn python_jobs_are_detected_by_extension() {
        let request = BatchRequest {
            file: "s3a://bucket/job.py".to_owned(),
            ..BatchRequest::default()
        };

        let application = to_application(&request, "spark");
        assert_eq!(application.spec["type"], "Python");
        assert_eq!(application.spec["mainApplicationFile"], "s3a://bucket/job.py");
        assert_eq!(application.metadata.namespace, "spark");
    }

    #[test]
    fn jvm_jobs_carry_class_and_resources() {
        let request = BatchRequest {
            file: "s3a://bucket/job.jar".to_owned(),
            class_name: Some("com.example.Job".to_owned()),
            driver_memory: Some("2g".to_owned()),
            executor_cores: Some(4),
            num_executors: Some(10),
            jars: vec!["s3a://bucket/dep.jar".to_owned()],
            ..BatchRequest::default()
        };

        let application = to_application(&request, "spark");
        assert_eq!(application.spec["type"], "Java");
        assert_eq!(application.spec["mainClass"], "com.example.Job");
        assert_eq!(application.spec["driver"]["memory"], "2g");
        assert_eq!(application.spec["driver"]["cores"], 1);
        assert_eq!(application.spec["executor"]["cores"], 4);
        assert_eq!(application.spec["executor"]["instances"], 10);
        assert_eq!(application.spec["deps"]["jars"][0], "s3a://bucket/dep.jar");
    }

    #[test]
    fn proxy_user_is_not_copied_into_the_spec() {
        let request = BatchRequest {
            file: "job.py".to_owned(),
            proxy_user: Some("alice".to_owned()),
            ..BatchRequest::default()
        };

        let application = to_application(&request, "spark");
        assert_eq!(application.proxy_user(), None);
    }
}
