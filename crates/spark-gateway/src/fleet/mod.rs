//! The static cluster fleet the gateway routes over.
//!
//! The fleet is loaded from configuration once at startup and is immutable
//! afterwards. Cluster and namespace ids are short lowercase alphanumeric
//! strings because they are embedded into gateway application ids (see
//! [`crate::ident`]), where they must survive a dash-separated round trip.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

mod registry;

pub use registry::{ClusterRegistry, RegistryError};

const ID_FMT: &str = "[a-z0-9]{1,12}";
const ID_MAX_LEN: usize = 12;

static ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{ID_FMT}$")).expect("failed to compile fleet id regex")
});

pub type Result<T, E = FleetError> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum FleetError {
    #[snafu(display(
        "id {id:?} of {subject} is invalid - ids must be at most {ID_MAX_LEN} lowercase alphanumeric characters (regex used for validation is '{ID_FMT}')"
    ))]
    InvalidId { id: String, subject: String },

    #[snafu(display("cluster {cluster:?} contains duplicate namespace id {id:?}"))]
    DuplicateNamespaceId { cluster: String, id: String },

    #[snafu(display("cluster {cluster:?} has no namespaces"))]
    EmptyCluster { cluster: String },
}

/// A single Kubernetes cluster the gateway can submit to.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Human readable cluster name, used to address the in-cluster agent.
    pub name: String,

    /// Short id embedded into gateway application ids.
    pub id: String,

    #[serde(rename = "masterURL", default)]
    pub master_url: String,

    /// Relative share of submissions this cluster should receive.
    #[serde(default = "default_weight")]
    pub routing_weight: f64,

    #[serde(default)]
    pub namespaces: Vec<Namespace>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_b64_file: Option<String>,
}

/// A namespace inside a [`Cluster`] that accepts submissions.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,

    /// Short id embedded into gateway application ids, unique per cluster.
    pub id: String,

    #[serde(default = "default_weight")]
    pub routing_weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Cluster {
    /// Looks up a namespace by its Kubernetes name.
    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    /// Looks up a namespace by its short id.
    pub fn namespace_by_id(&self, id: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.id == id)
    }

    /// Validates the cluster and namespace ids against the fleet id format
    /// and ensures namespace ids are unique within this cluster.
    pub fn validate(&self) -> Result<()> {
        validate_short_id(&self.id, format!("cluster {:?}", self.name))?;
        ensure!(
            !self.namespaces.is_empty(),
            EmptyClusterSnafu {
                cluster: self.name.clone()
            }
        );

        for namespace in &self.namespaces {
            validate_short_id(
                &namespace.id,
                format!("namespace {:?} in cluster {:?}", namespace.name, self.name),
            )?;

            let occurrences = self
                .namespaces
                .iter()
                .filter(|other| other.id == namespace.id)
                .count();
            ensure!(
                occurrences == 1,
                DuplicateNamespaceIdSnafu {
                    cluster: self.name.clone(),
                    id: namespace.id.clone()
                }
            );
        }

        Ok(())
    }
}

/// Tests that a string is a valid short fleet id.
pub fn validate_short_id(id: &str, subject: impl Into<String>) -> Result<()> {
    ensure!(
        ID_REGEX.is_match(id),
        InvalidIdSnafu {
            id: id.to_owned(),
            subject: subject.into()
        }
    );

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_cluster(name: &str, id: &str, namespaces: &[(&str, &str)]) -> Cluster {
    Cluster {
        name: name.to_owned(),
        id: id.to_owned(),
        master_url: format!("https://{name}.example.com:6443"),
        routing_weight: 1.0,
        namespaces: namespaces
            .iter()
            .map(|(ns_name, ns_id)| Namespace {
                name: (*ns_name).to_owned(),
                id: (*ns_id).to_owned(),
                routing_weight: 1.0,
            })
            .collect(),
        certificate_authority_b64_file: None,
    }
}
