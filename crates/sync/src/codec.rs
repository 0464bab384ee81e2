use serde::{Deserialize, Serialize};

use crate::{ChangeEvent, DeviceId, Error};

/// A batch of events as handed to, or received from, a transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventBatch {
	/// Device that assembled the batch, not necessarily the origin of every event
	pub sender: DeviceId,
	pub events: Vec<ChangeEvent>,
}

impl EventBatch {
	#[must_use]
	pub const fn new(sender: DeviceId, events: Vec<ChangeEvent>) -> Self {
		Self { sender, events }
	}

	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		rmp_serde::to_vec_named(self).map_err(Into::into)
	}

	pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
		rmp_serde::from_slice(bytes).map_err(Into::into)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.events.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}
}

pub fn encode_batch(sender: &DeviceId, events: &[ChangeEvent]) -> Result<Vec<u8>, Error> {
	EventBatch::new(sender.clone(), events.to_vec()).encode()
}

pub fn decode_batch(bytes: &[u8]) -> Result<EventBatch, Error> {
	EventBatch::decode(bytes)
}
