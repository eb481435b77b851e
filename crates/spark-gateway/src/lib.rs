//! A multi-cluster submission gateway for Spark applications running on
//! Kubernetes.
//!
//! Clients submit application payloads through an HTTP API. The gateway
//! picks a target cluster ([`routing`]), assigns a durable, location-encoding
//! identifier ([`ident`]), stamps ownership metadata onto the payload
//! ([`service`]) and forwards the submission to the per-cluster agent
//! ([`agent`]). Lifecycle operations resolve the owning cluster back out of
//! the identifier. A second surface ([`livy`]) exposes the same
//! functionality under monotonic integer batch ids for tools that expect
//! that protocol.

pub mod agent;
pub mod application;
pub mod config;
pub mod error;
pub mod fleet;
pub mod http;
pub mod ident;
pub mod livy;
pub mod routing;
pub mod service;
