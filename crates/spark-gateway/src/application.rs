//! The application payload the gateway forwards between clients and agents.
//!
//! The payload is mostly an opaque blob: the gateway round-trips unknown
//! fields untouched via flattened capture maps and only reads or writes the
//! small set of fields it owns. Two labels and one annotation are gateway
//! owned and always survive stamping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label stamped onto every submitted application, holding the submitting
/// user. Its presence marks an application as gateway-created.
pub const USER_LABEL: &str = "spark-gateway/user";

/// Annotation preserving the name the user originally submitted, before the
/// gateway rewrote `metadata.name` to the gateway id.
pub const APPLICATION_NAME_ANNOTATION: &str = "applicationName";

/// Object metadata of an application payload. Unknown fields round-trip via
/// `other`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A submitted batch compute application.
///
/// The `spec` is fully opaque except for `spec.proxyUser`, which the gateway
/// stamps with the submitting user.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplication {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl SparkApplication {
    pub fn proxy_user(&self) -> Option<&str> {
        self.spec.get("proxyUser").and_then(Value::as_str)
    }

    pub fn set_proxy_user(&mut self, user: &str) {
        match &mut self.spec {
            Value::Object(spec) => {
                spec.insert("proxyUser".to_owned(), Value::String(user.to_owned()));
            }
            spec => {
                let mut map = Map::new();
                map.insert("proxyUser".to_owned(), Value::String(user.to_owned()));
                *spec = Value::Object(map);
            }
        }
    }

    /// The application state reported by the agent, or the empty string when
    /// no status has been observed yet.
    pub fn state(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.app_state.state.as_str())
            .unwrap_or_default()
    }
}

/// The observed status of an application. Only the fields the gateway reads
/// are typed; everything else round-trips through `other`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub app_state: AppState,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spark_application_id: String,

    #[serde(default)]
    pub driver_info: DriverInfo,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub state: String,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub web_ui_ingress_address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_fields_round_trip() {
        let raw = json!({
            "apiVersion": "sparkoperator.k8s.io/v1beta2",
            "kind": "SparkApplication",
            "metadata": {
                "name": "pi",
                "namespace": "spark",
                "generation": 3,
                "labels": {"team": "data"}
            },
            "spec": {
                "type": "Scala",
                "mainClass": "org.apache.spark.examples.SparkPi",
                "proxyUser": "alice"
            },
            "status": {
                "appState": {"state": "RUNNING", "errorMessage": ""},
                "sparkApplicationId": "spark-123",
                "driverInfo": {"podName": "pi-driver", "webUIPort": 4040},
                "executionAttempts": 1
            }
        });

        let application: SparkApplication =
            serde_json::from_value(raw.clone()).expect("payload deserializes");

        assert_eq!(application.metadata.name, "pi");
        assert_eq!(application.proxy_user(), Some("alice"));
        assert_eq!(application.state(), "RUNNING");

        let round_tripped = serde_json::to_value(&application).expect("payload serializes");
        assert_eq!(round_tripped, raw);
    }

    #[test]
    fn set_proxy_user_on_null_spec() {
        let mut application = SparkApplication::default();
        application.set_proxy_user("bob");

        assert_eq!(application.proxy_user(), Some("bob"));
    }

    #[test]
    fn absent_maps_default_to_empty() {
        let application: SparkApplication =
            serde_json::from_value(json!({"metadata": {"namespace": "spark"}}))
                .expect("payload deserializes");

        assert!(application.metadata.labels.is_empty());
        assert!(application.metadata.annotations.is_empty());
    }
}
