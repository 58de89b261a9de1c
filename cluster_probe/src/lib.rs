#![warn(missing_docs)]

//! Distributed consistency probes for replicated, transactional data stores.
//!
//! A [`Master`](crate::coordinator::Master) drives a fleet of workers, each of
//! which holds a handle to one node of the store under test. For every
//! [`Stage`](crate::coordinator::Stage) the master ships the stage's
//! configuration to every live worker, each worker runs the stage's probe
//! against its node and answers with exactly one
//! [`WorkerAck`](crate::core::WorkerAck), and the master reduces the set of
//! acks into a single [`Verdict`](crate::core::Verdict).
//!
//! The probes verify properties that only show up on a live, replicated,
//! concurrently mutated cluster:
//! - [`check`]: every generated entry is present (or absent, after deletion)
//!   with the expected content, and the per-node size reports add up to the
//!   expected number of primary and backup copies.
//! - [`probes::isolation`]: readers either never (repeatable read) or
//!   sometimes (read committed) see a value change inside one transaction.
//! - [`probes::write_skew`]: every attempted increment of a shared counter
//!   either lands or is rejected as a conflict.
//! - [`probes::cluster_validation`]: every worker sees the markers written by
//!   its peers.
//!
//! The store itself is reached only through the capability traits in
//! [`core`]. [`testkit`] ships an in-process simulated cluster implementing
//! them, used by the test suite and the `local-cluster` binary.

pub mod check;
pub mod coordinator;
pub mod core;
pub mod probes;
pub mod testkit;
