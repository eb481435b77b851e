//! The gateway application identifier scheme.
//!
//! A gateway id is `"{clusterId}-{nsId}-{uuidV7}"`. The prefix is the
//! authoritative location of the application for its whole lifetime, so every
//! lifecycle operation can resolve the owning cluster from the id alone. A
//! canonical UUID contains four dashes, which makes "exactly seven dash
//! separated parts" the parsing discriminator.
//!
//! UUIDv7 keeps ids lexicographically time-ordered, which makes operational
//! browsing of applications by id follow submission order.

use snafu::{ResultExt, Snafu, ensure};
use uuid::Uuid;

use crate::fleet::{Cluster, Namespace};

/// Number of dash separated parts in a gateway id: two location ids plus the
/// five parts of a canonical UUID.
const GATEWAY_ID_PARTS: usize = 7;

pub type Result<T, E = IdentError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum IdentError {
    #[snafu(display(
        "gateway id {id:?} is malformed - expected exactly {GATEWAY_ID_PARTS} dash separated parts, got {parts}"
    ))]
    PartCount { id: String, parts: usize },

    #[snafu(display("gateway id {id:?} does not end in a valid uuid"))]
    InvalidUuid { source: uuid::Error, id: String },
}

/// A gateway id decomposed into its parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedId {
    pub cluster_id: String,
    pub namespace_id: String,
    pub uuid: Uuid,
}

/// Composes the location prefix of a gateway id.
pub fn compose(cluster_id: &str, namespace_id: &str) -> String {
    format!("{cluster_id}-{namespace_id}")
}

/// Parses a gateway id back into its cluster id, namespace id and UUID.
pub fn parse(id: &str) -> Result<ParsedId> {
    let parts = id.split('-').collect::<Vec<_>>();
    ensure!(
        parts.len() == GATEWAY_ID_PARTS,
        PartCountSnafu {
            id: id.to_owned(),
            parts: parts.len()
        }
    );

    let uuid = parts[2..].join("-");
    let uuid = Uuid::parse_str(&uuid).context(InvalidUuidSnafu { id: id.to_owned() })?;

    Ok(ParsedId {
        cluster_id: parts[0].to_owned(),
        namespace_id: parts[1].to_owned(),
        uuid,
    })
}

/// Allocates gateway ids for submissions.
///
/// The UUID source is injectable so tests can fix the generated ids; the
/// default source produces time-ordered UUIDv7 values.
pub struct IdGenerator {
    source: Box<dyn Fn() -> Uuid + Send + Sync>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            source: Box::new(Uuid::now_v7),
        }
    }

    pub fn with_source(source: impl Fn() -> Uuid + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Allocates a fresh gateway id locating the application in `namespace`
    /// of `cluster`.
    pub fn allocate(&self, cluster: &Cluster, namespace: &Namespace) -> String {
        format!("{}-{}", compose(&cluster.id, &namespace.id), (self.source)())
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}
