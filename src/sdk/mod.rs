/// Software Development Kit (SDK) for Tuple Store.
///
/// This module provides the TCP object client and helpers that build a store
/// from parameters or from the environment.
pub mod client;
/// Store construction from parameters and environment.
pub mod discovery;

pub use client::TcpObjectClient;
pub use discovery::{from_env, open};
