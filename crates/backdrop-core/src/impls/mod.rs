//! Impls - in-process implementations of the ports (development and tests).
//!
//! Production clients for the graph-memory service live with the host
//! application; this crate only ships the in-memory stand-in.

pub mod inmem_graph;

pub use self::inmem_graph::InMemoryGraphMemory;
