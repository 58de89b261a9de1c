//! Vocabulary shared by workers and the master: the cluster topology, the
//! capabilities a store adapter must provide, generated keys and values, the
//! acks workers send back and the verdicts the master produces.
//!
//! ### Store capabilities
//! A store adapter implements [`BasicOperations`] (single-key reads and
//! writes), [`Transactional`] (optimistic transactions that either commit or
//! report a [`CommitOutcome::Conflict`]) and [`CacheInformation`] (size and
//! replication metadata). Anything implementing all three is a [`Store`].
//! Every operation may fail with a [`StoreError`]; the probes decide whether
//! such a failure is absorbed into a tally or fails the stage.
//!
//! ### Packets
//! Stages and acks cross the master/worker boundary as CBOR packets, see
//! [`serialize`] and [`deserialize`].

mod acks;
mod error;
mod generators;
mod packets;
mod store;
mod topology;
mod value;
mod verdict;

#[rustfmt::skip]
pub(crate) use {
  error::panic_message,
};

#[rustfmt::skip]
pub use {
  acks::AckResult,
  acks::AckSet,
  acks::CounterAck,
  acks::ReplicationAck,
  acks::SizeAck,
  acks::TallyAck,
  acks::WorkerAck,
  error::ConfigError,
  error::PacketError,
  error::ProbeError,
  error::StoreError,
  generators::KeyGenerator,
  generators::ValueGenerator,
  packets::deserialize,
  packets::serialize,
  store::BasicOperations,
  store::CacheInformation,
  store::CommitOutcome,
  store::SegmentId,
  store::Store,
  store::Transaction,
  store::Transactional,
  topology::replica_factor,
  topology::ClusterTopology,
  value::Value,
  verdict::Verdict,
};
