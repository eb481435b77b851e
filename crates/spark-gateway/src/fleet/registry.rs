//! Read-only lookup over the static cluster fleet.

use snafu::{ResultExt, Snafu, ensure};

use crate::fleet::{Cluster, FleetError};

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum RegistryError {
    #[snafu(display("no cluster with id {cluster_id:?} is registered"))]
    UnknownClusterId { cluster_id: String },

    #[snafu(display("no cluster with name {name:?} is registered"))]
    UnknownClusterName { name: String },

    #[snafu(display("fleet configuration is invalid"))]
    InvalidFleet { source: FleetError },

    #[snafu(display("cluster id {id:?} is used by more than one cluster"))]
    DuplicateClusterId { id: String },

    #[snafu(display("cluster name {name:?} is used by more than one cluster"))]
    DuplicateClusterName { name: String },
}

/// An in-memory index over the cluster fleet. Built once at startup, safe to
/// share between concurrent requests because it is never mutated.
#[derive(Debug)]
pub struct ClusterRegistry {
    clusters: Vec<Cluster>,
}

impl ClusterRegistry {
    /// Builds a registry from the configured fleet, validating every cluster
    /// and rejecting duplicate ids or names across the fleet.
    pub fn new(clusters: Vec<Cluster>) -> Result<Self> {
        for cluster in &clusters {
            cluster.validate().context(InvalidFleetSnafu)?;

            let ids = clusters.iter().filter(|other| other.id == cluster.id).count();
            ensure!(ids == 1, DuplicateClusterIdSnafu { id: cluster.id.clone() });

            let names = clusters
                .iter()
                .filter(|other| other.name == cluster.name)
                .count();
            ensure!(
                names == 1,
                DuplicateClusterNameSnafu {
                    name: cluster.name.clone()
                }
            );
        }

        Ok(Self { clusters })
    }

    pub fn by_id(&self, cluster_id: &str) -> Result<&Cluster> {
        self.clusters
            .iter()
            .find(|cluster| cluster.id == cluster_id)
            .ok_or_else(|| RegistryError::UnknownClusterId {
                cluster_id: cluster_id.to_owned(),
            })
    }

    pub fn by_name(&self, name: &str) -> Result<&Cluster> {
        self.clusters
            .iter()
            .find(|cluster| cluster.name == name)
            .ok_or_else(|| RegistryError::UnknownClusterName {
                name: name.to_owned(),
            })
    }

    pub fn all(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Returns every cluster whose namespace list contains `namespace`. An
    /// empty result is a valid, non-error outcome; the router decides whether
    /// that is fatal.
    pub fn with_namespace(&self, namespace: &str) -> Vec<&Cluster> {
        self.clusters
            .iter()
            .filter(|cluster| cluster.namespace(namespace).is_some())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fleet::test_cluster;

    fn registry() -> ClusterRegistry {
        ClusterRegistry::new(vec![
            test_cluster("alpha", "ca", &[("spark", "ns1"), ("batch", "ns2")]),
            test_cluster("beta", "cb", &[("spark", "ns1")]),
        ])
        .expect("valid test fleet")
    }

    #[test]
    fn lookups() {
        let registry = registry();

        assert_eq!(registry.by_id("cb").expect("cluster exists").name, "beta");
        assert_eq!(registry.by_name("alpha").expect("cluster exists").id, "ca");
        assert_eq!(registry.all().len(), 2);
        assert!(matches!(
            registry.by_id("missing"),
            Err(RegistryError::UnknownClusterId { .. })
        ));
    }

    #[test]
    fn with_namespace_filters() {
        let registry = registry();

        let spark: Vec<_> = registry
            .with_namespace("spark")
            .into_iter()
            .map(|cluster| cluster.name.as_str())
            .collect();
        assert_eq!(spark, vec!["alpha", "beta"]);

        let batch: Vec<_> = registry
            .with_namespace("batch")
            .into_iter()
            .map(|cluster| cluster.name.as_str())
            .collect();
        assert_eq!(batch, vec!["alpha"]);

        assert!(registry.with_namespace("missing").is_empty());
    }

    #[test]
    fn duplicate_cluster_ids_rejected() {
        let result = ClusterRegistry::new(vec![
            test_cluster("alpha", "ca", &[("spark", "ns1")]),
            test_cluster("beta", "ca", &[("spark", "ns1")]),
        ]);

        assert!(matches!(result, Err(RegistryError::DuplicateClusterId { .. })));
    }
}
