use std::collections::BTreeMap;

use futures::future::try_join_all;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use yaba_sync::{
	decode_batch, encode_batch,
	merge::{merge_remote_events, merge_states, replay, ObjectState, Replica},
	ChangeEvent, DeviceId, ObjectType,
};

use crate::{
	cache::project,
	context::NodeContext,
	store::{load_state, save_state},
	Error,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
	/// Remote events this replica didn't know yet
	pub stored_events: usize,
	/// Objects whose state was merged with those events
	pub merged_objects: usize,
	/// Merged objects that ended up deleted
	pub deleted_objects: usize,
}

impl IngestReport {
	fn absorb(mut self, other: Self) -> Self {
		self.stored_events += other.stored_events;
		self.merged_objects += other.merged_objects;
		self.deleted_objects += other.deleted_objects;
		self
	}
}

/// Entry point for whatever transport moves events between replicas.
///
/// Merging never creates local events: the merged documents only carry the merge of both clocks,
/// and the remote events are stored as they are so they can be relayed further.
#[derive(Debug, Clone)]
pub struct Ingester {
	ctx: NodeContext,
}

impl Ingester {
	pub(crate) const fn new(ctx: NodeContext) -> Self {
		Self { ctx }
	}

	/// Merges a batch of remote events, one object lane at a time per object.
	#[instrument(skip_all, fields(events = events.len()), err)]
	pub async fn ingest(&self, events: Vec<ChangeEvent>) -> Result<IngestReport, Error> {
		let mut per_object = BTreeMap::<(ObjectType, Uuid), Vec<ChangeEvent>>::new();
		for event in events {
			per_object
				.entry((event.object_type, event.object_id))
				.or_default()
				.push(event);
		}

		let report = try_join_all(per_object.into_iter().map(
			|((object_type, object_id), events)| {
				self.ctx
					.run_for_object(object_type, object_id, move |ctx| async move {
						ingest_object(ctx, object_type, object_id, events).await
					})
			},
		))
		.await?
		.into_iter()
		.fold(IngestReport::default(), IngestReport::absorb);

		info!(?report, "Ingested remote events;");

		Ok(report)
	}

	/// Same as [`Ingester::ingest`] for a msgpack batch produced by [`Ingester::export_since`].
	pub async fn ingest_batch(&self, bytes: &[u8]) -> Result<IngestReport, Error> {
		let batch = decode_batch(bytes)?;
		debug!(sender = %batch.sender, events = batch.len(), "Decoded event batch;");
		self.ingest(batch.events).await
	}

	/// Every known event stamped after `timestamp_ms`, local or relayed, as a msgpack batch.
	pub async fn export_since(&self, timestamp_ms: i64) -> Result<Vec<u8>, Error> {
		let events = self.ctx.log.events_since(timestamp_ms).await;
		encode_batch(&self.ctx.device_id, &events).map_err(Into::into)
	}

	/// Every event `peer` hasn't acknowledged yet as a msgpack batch, with the sequence number to
	/// pass to [`Ingester::acknowledge`] once the peer stored it.
	pub async fn export_for(&self, peer: &DeviceId) -> Result<PendingBatch, Error> {
		let outbox = self.ctx.log.outbox(peer).await?;
		debug!(%peer, events = outbox.events.len(), up_to = outbox.up_to, "Exporting events;");

		Ok(PendingBatch {
			bytes: encode_batch(&self.ctx.device_id, &outbox.events)?,
			up_to: outbox.up_to,
		})
	}

	/// Confirms `peer` received everything up to `up_to`, which lets compaction drop it.
	pub async fn acknowledge(&self, peer: &DeviceId, up_to: u64) -> Result<(), Error> {
		self.ctx.log.acknowledge(peer, up_to).await.map_err(Into::into)
	}
}

/// An encoded batch on its way to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
	pub bytes: Vec<u8>,
	pub up_to: u64,
}

async fn ingest_object(
	ctx: NodeContext,
	object_type: ObjectType,
	object_id: Uuid,
	events: Vec<ChangeEvent>,
) -> Result<IngestReport, Error> {
	let mut remote_events = Vec::with_capacity(events.len());
	for event in events {
		if !ctx.log.contains(event.event_id).await {
			remote_events.push(event);
		}
	}

	if remote_events.is_empty() {
		return Ok(IngestReport::default());
	}

	let local_events = ctx.log.events_for_object(object_id).await;
	let local_state = load_state(&*ctx.store, object_type, object_id).await?;

	let merged = match local_state {
		None => replay(&remote_events).map(|replayed| replayed.state),

		Some(local @ ObjectState::Deleted(_)) => replay(local_events.iter().chain(&remote_events))
			.map(|replayed| {
				merge_states(
					Replica {
						state: &local,
						events: &local_events,
					},
					Replica {
						state: &replayed.state,
						events: &remote_events,
					},
				)
			}),

		Some(ObjectState::Live(documents)) => {
			let merged = merge_remote_events(&documents, &local_events, &remote_events);

			match replay(local_events.iter().chain(&remote_events)) {
				// The deletion is weighed against everything the object has become, including
				// updates that only exist as documents because their events were compacted.
				Some(replayed) if replayed.state.is_deleted() => Some(merge_states(
					Replica {
						state: &ObjectState::Live(merged),
						events: &local_events,
					},
					Replica {
						state: &replayed.state,
						events: &remote_events,
					},
				)),
				_ => Some(ObjectState::Live(merged)),
			}
		}
	};

	let Some(merged) = merged else {
		return Ok(IngestReport::default());
	};

	// The state goes first, events that were stored but never applied would be filtered out on
	// the next delivery.
	save_state(&*ctx.store, object_type, object_id, &merged).await?;
	let stored = ctx.log.append_remote(remote_events).await?;
	project(&*ctx.cache, object_type, object_id, &merged).await;

	debug!(
		%object_type,
		%object_id,
		stored = stored.len(),
		deleted = merged.is_deleted(),
		"Merged remote events;"
	);

	Ok(IngestReport {
		stored_events: stored.len(),
		merged_objects: 1,
		deleted_objects: usize::from(merged.is_deleted()),
	})
}
