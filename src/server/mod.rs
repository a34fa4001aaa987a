/// TCP object server for the `tuple-objectd` daemon.
///
/// This module provides the [`Router`] which handles incoming TCP connections
/// and dispatches bucket commands to an [`crate::engine::ObjectBuckets`].
pub mod router;

pub use router::Router;
