//! Causality primitives shared by every YABA replica: vector clocks, change events and the
//! merge policy used to reconcile two replicas of the same object.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod clock;
mod codec;
mod crdt;
mod factory;
pub mod merge;

pub use clock::{ClockError, ClockOrdering, DeviceId, VectorClock};
pub use codec::{decode_batch, encode_batch, EventBatch};
pub use crdt::{
	ChangeEvent, Document, EventKind, FieldChanges, FileTarget, ObjectType, Recorded, SkipReason,
	Tombstone, CLOCK_FIELD,
};
pub use factory::EventFactory;
pub use merge::{merge_states, replay, ObjectState, Replica};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("malformed clock: {0}")]
	Clock(#[from] ClockError),
	#[error("serialization error: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("deserialization error: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
}
