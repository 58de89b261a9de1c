//! The master/worker protocol.
//!
//! A [`Master`] owns one worker task per store node. For every [`Stage`] it
//! sends a CBOR encoded [`StagePacket`] to each live worker, the worker runs
//! [`Stage::execute_on_worker`] on the blocking pool and answers with an
//! [`AckPacket`] carrying its [`WorkerAck`](crate::core::WorkerAck). Acks
//! carry the id of the stage they answer, so late acks of an earlier stage
//! never leak into the next one. Once every live worker answered, or the ack
//! timeout elapsed, the master hands the acks to
//! [`Stage::process_acks_on_master`].

mod master;
mod stage;
mod worker;

#[rustfmt::skip]
pub use {
  master::Master,
  master::MasterConfig,
  master::MasterError,
  stage::Stage,
  worker::AckPacket,
  worker::StagePacket,
  worker::WorkerContext,
};
