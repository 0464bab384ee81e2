//! Conflict resolution between two replicas of the same object.
//!
//! This is the one merge policy of the system:
//! 1. when one clock dominates, that side wins outright;
//! 2. concurrent documents are resolved per field: a field one side wrote without the other
//!    seeing it goes to the winner among every write either side knows for it;
//! 3. a tombstone wins over anything it dominates or ties, and only a strictly dominating
//!    create/update resurrects the object;
//! 4. the resulting clock is always the componentwise maximum of both sides, never a fresh
//!    increment.

use std::{
	cmp::Ordering,
	collections::{BTreeMap, BTreeSet},
};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{ChangeEvent, ClockOrdering, Document, FileTarget, ObjectType, Tombstone, VectorClock};

/// Everything one replica knows about an object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectState {
	Live(BTreeMap<FileTarget, Document>),
	Deleted(Tombstone),
}

impl ObjectState {
	/// Clock of the whole object, the merge of every document clock.
	#[must_use]
	pub fn clock(&self) -> VectorClock {
		match self {
			Self::Live(documents) => documents
				.values()
				.fold(VectorClock::empty(), |acc, doc| acc.merge(&doc.clock)),
			Self::Deleted(tombstone) => tombstone.deletion_clock.clone(),
		}
	}

	#[must_use]
	pub const fn is_deleted(&self) -> bool {
		matches!(self, Self::Deleted(_))
	}
}

/// A replica's state plus the events it recorded for the object.
#[derive(Debug, Clone, Copy)]
pub struct Replica<'a> {
	pub state: &'a ObjectState,
	pub events: &'a [ChangeEvent],
}

/// Total order between two events touching the same field. `Greater` means `a` wins.
///
/// Causality first; concurrent events fall back to the originating device's own counter, then
/// the device id, then the event id, so every replica picks the same winner.
#[must_use]
pub fn event_precedence(a: &ChangeEvent, b: &ChangeEvent) -> Ordering {
	match a.clock.compare(&b.clock) {
		ClockOrdering::Dominates => Ordering::Greater,
		ClockOrdering::DominatedBy => Ordering::Less,
		ClockOrdering::Equal | ClockOrdering::Concurrent => a
			.origin_counter()
			.cmp(&b.origin_counter())
			.then_with(|| a.device_id.cmp(&b.device_id))
			.then_with(|| a.event_id.cmp(&b.event_id)),
	}
}

/// Merges the local and remote views of one object. Both sides must describe the same object.
#[must_use]
pub fn merge_states(local: Replica<'_>, remote: Replica<'_>) -> ObjectState {
	match (local.state, remote.state) {
		(ObjectState::Deleted(local_tomb), ObjectState::Deleted(remote_tomb)) => {
			ObjectState::Deleted(Tombstone {
				deletion_clock: local_tomb.deletion_clock.merge(&remote_tomb.deletion_clock),
				timestamp: local_tomb.timestamp.max(remote_tomb.timestamp),
				..local_tomb.clone()
			})
		}

		(ObjectState::Deleted(tombstone), ObjectState::Live(documents))
		| (ObjectState::Live(documents), ObjectState::Deleted(tombstone)) => {
			resolve_delete(tombstone, documents)
		}

		(ObjectState::Live(local_docs), ObjectState::Live(remote_docs)) => {
			let targets = local_docs
				.keys()
				.chain(remote_docs.keys())
				.copied()
				.collect::<BTreeSet<_>>();

			ObjectState::Live(
				targets
					.into_iter()
					.filter_map(|target| {
						let merged = match (local_docs.get(&target), remote_docs.get(&target)) {
							(Some(local_doc), Some(remote_doc)) => merge_documents(
								local_doc,
								remote_doc,
								&events_for_target(local.events, target),
								&events_for_target(remote.events, target),
							),
							(Some(doc), None) | (None, Some(doc)) => doc.clone(),
							(None, None) => return None,
						};
						Some((target, merged))
					})
					.collect(),
			)
		}
	}
}

fn resolve_delete(tombstone: &Tombstone, documents: &BTreeMap<FileTarget, Document>) -> ObjectState {
	let live_clock = documents
		.values()
		.fold(VectorClock::empty(), |acc, doc| acc.merge(&doc.clock));

	if live_clock.dominates(&tombstone.deletion_clock) {
		// Resurrected: every document absorbs the deletion it has outlived.
		ObjectState::Live(
			documents
				.iter()
				.map(|(target, doc)| {
					(
						*target,
						Document::new(
							doc.fields.clone(),
							doc.clock.merge(&tombstone.deletion_clock),
						),
					)
				})
				.collect(),
		)
	} else {
		ObjectState::Deleted(Tombstone {
			deletion_clock: tombstone.deletion_clock.merge(&live_clock),
			..tombstone.clone()
		})
	}
}

fn events_for_target(events: &[ChangeEvent], target: FileTarget) -> Vec<&ChangeEvent> {
	events
		.iter()
		.filter(|event| event.file_target == target && !event.is_delete())
		.collect()
}

/// Winner among events writing the same field. Writes another candidate causally supersedes
/// drop out; the remaining concurrent ones are ordered by the originating device's counter, then
/// the device id, then the event id. The result only depends on the set of candidates.
#[must_use]
pub fn field_winner<'a>(candidates: &[&'a ChangeEvent]) -> Option<&'a ChangeEvent> {
	candidates
		.iter()
		.copied()
		.filter(|event| {
			!candidates
				.iter()
				.any(|other| other.clock.dominates(&event.clock))
		})
		.max_by(|a, b| {
			a.origin_counter()
				.cmp(&b.origin_counter())
				.then_with(|| a.device_id.cmp(&b.device_id))
				.then_with(|| a.event_id.cmp(&b.event_id))
		})
}

/// Resolves every field in `fields` against all `known` events writing it, on top of `base`.
fn resolve_fields<'a>(
	base: &Map<String, Value>,
	fields: impl IntoIterator<Item = &'a str>,
	known: &[&ChangeEvent],
) -> Map<String, Value> {
	let mut resolved = base.clone();
	for field in fields {
		let writers = known
			.iter()
			.copied()
			.filter(|event| event.payload.contains(field))
			.collect::<Vec<_>>();
		if let Some(value) = field_winner(&writers).and_then(|winner| winner.payload.get(field)) {
			resolved.insert(field.to_string(), value.clone());
		}
	}
	resolved
}

/// Merges two versions of the same physical document.
///
/// Concurrent versions are resolved per field: every field some side wrote without the other
/// seeing it is settled against all the events both sides know for it, so a conflict one side
/// already decided is decided the same way again.
#[must_use]
pub fn merge_documents(
	local: &Document,
	remote: &Document,
	local_events: &[&ChangeEvent],
	remote_events: &[&ChangeEvent],
) -> Document {
	let clock = local.clock.merge(&remote.clock);

	match local.clock.compare(&remote.clock) {
		ClockOrdering::Equal | ClockOrdering::Dominates => Document::new(local.fields.clone(), clock),
		ClockOrdering::DominatedBy => Document::new(remote.fields.clone(), clock),
		ClockOrdering::Concurrent => {
			let unseen = unseen_by(local_events, &remote.clock)
				.into_iter()
				.chain(unseen_by(remote_events, &local.clock))
				.collect::<Vec<_>>();

			if unseen.is_empty() {
				// No field provenance available, fall back to a whole document decision that
				// every replica makes the same way.
				let winner = if local.clock.deterministic_cmp(&remote.clock) == Ordering::Less {
					remote
				} else {
					local
				};
				return Document::new(winner.fields.clone(), clock);
			}

			let known = dedup(local_events.iter().chain(remote_events).copied());
			let touched = touched_fields(&unseen);

			Document::new(
				resolve_fields(&local.fields, touched.iter().copied(), &known),
				clock,
			)
		}
	}
}

/// Folds events this replica didn't know yet into a live object.
///
/// Remote events a local document clock already covers were absorbed through an earlier merge
/// and are skipped. Every field the others write is settled against every event known for it,
/// local ones included, so the result doesn't depend on which replica merges first. Each clock is
/// the merge of the local clock and the absorbed events.
#[must_use]
pub fn merge_remote_events(
	local_docs: &BTreeMap<FileTarget, Document>,
	local_events: &[ChangeEvent],
	remote_events: &[ChangeEvent],
) -> BTreeMap<FileTarget, Document> {
	let mut merged = local_docs.clone();

	let targets = remote_events
		.iter()
		.filter(|event| !event.is_delete())
		.map(|event| event.file_target)
		.collect::<BTreeSet<_>>();

	for target in targets {
		let local_doc = local_docs.get(&target);
		let absorbed = remote_events
			.iter()
			.filter(|event| event.file_target == target && !event.is_delete())
			.filter(|event| local_doc.map_or(true, |doc| !doc.clock.dominates_or_equals(&event.clock)))
			.collect::<Vec<_>>();

		if absorbed.is_empty() {
			continue;
		}

		let known = dedup(
			events_for_target(local_events, target)
				.into_iter()
				.chain(absorbed.iter().copied()),
		);
		let base = local_doc.map(|doc| doc.fields.clone()).unwrap_or_default();
		let clock = absorbed.iter().fold(
			local_doc.map_or_else(VectorClock::empty, |doc| doc.clock.clone()),
			|acc, event| acc.merge(&event.clock),
		);

		merged.insert(
			target,
			Document::new(
				resolve_fields(&base, touched_fields(&absorbed).iter().copied(), &known),
				clock,
			),
		);
	}

	merged
}

fn touched_fields<'a>(events: &[&'a ChangeEvent]) -> BTreeSet<&'a str> {
	events
		.iter()
		.flat_map(|event| event.payload.fields())
		.collect()
}

/// Canonical order, duplicates removed.
fn dedup<'a>(events: impl IntoIterator<Item = &'a ChangeEvent>) -> Vec<&'a ChangeEvent> {
	let mut events = events.into_iter().collect::<Vec<_>>();
	events.sort_by_key(|event| event.event_id);
	events.dedup_by_key(|event| event.event_id);
	events
}

fn unseen_by<'a>(events: &[&'a ChangeEvent], clock: &VectorClock) -> Vec<&'a ChangeEvent> {
	events
		.iter()
		.copied()
		.filter(|event| !clock.dominates_or_equals(&event.clock))
		.collect()
}

/// An object rebuilt purely from its event history.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedObject {
	pub object_id: Uuid,
	pub object_type: ObjectType,
	pub state: ObjectState,
}

/// Rebuilds an object from events alone, under the same rules as [`merge_states`].
///
/// Returns `None` when there are no events.
#[must_use]
pub fn replay<'a>(events: impl IntoIterator<Item = &'a ChangeEvent>) -> Option<ReplayedObject> {
	let events = dedup(events);
	let first = events.first()?;
	let (object_id, object_type) = (first.object_id, first.object_type);

	let all_clocks = events
		.iter()
		.fold(VectorClock::empty(), |acc, event| acc.merge(&event.clock));

	let winning_delete = events
		.iter()
		.copied()
		.filter(|event| event.is_delete())
		.max_by(|a, b| event_precedence(a, b));

	if let Some(delete) = winning_delete {
		let resurrected = events
			.iter()
			.any(|event| !event.is_delete() && event.clock.dominates(&delete.clock));

		if !resurrected {
			return Some(ReplayedObject {
				object_id,
				object_type,
				state: ObjectState::Deleted(Tombstone {
					object_id,
					object_type,
					deletion_clock: all_clocks,
					timestamp: delete.timestamp,
				}),
			});
		}
	}

	// A resurrecting update was made on top of the whole history, so whatever was written before
	// the deletion is part of the revived object too.
	let mut documents = apply_events(&BTreeMap::new(), events);

	if let Some(delete) = winning_delete {
		for doc in documents.values_mut() {
			doc.clock = doc.clock.merge(&delete.clock);
		}
	}

	Some(ReplayedObject {
		object_id,
		object_type,
		state: ObjectState::Live(documents),
	})
}

/// Applies `events` on top of `base`, returning one document per file target the events touch.
///
/// Every touched field takes the value of its winning event, untouched fields keep the `base`
/// value. Each resulting clock is the merge of the events applied to that document only, so the
/// caller decides how it relates to the base clock. DELETE events are ignored.
#[must_use]
pub fn apply_events<'a>(
	base: &BTreeMap<FileTarget, Document>,
	events: impl IntoIterator<Item = &'a ChangeEvent>,
) -> BTreeMap<FileTarget, Document> {
	let events = dedup(events.into_iter().filter(|event| !event.is_delete()));

	let targets = events
		.iter()
		.map(|event| event.file_target)
		.collect::<BTreeSet<_>>();

	targets
		.into_iter()
		.map(|target| {
			let written = events
				.iter()
				.copied()
				.filter(|event| event.file_target == target)
				.collect::<Vec<_>>();
			let base_fields = base
				.get(&target)
				.map(|doc| doc.fields.clone())
				.unwrap_or_default();
			let clock = written
				.iter()
				.fold(VectorClock::empty(), |acc, event| acc.merge(&event.clock));

			(
				target,
				Document::new(
					resolve_fields(&base_fields, touched_fields(&written).iter().copied(), &written),
					clock,
				),
			)
		})
		.collect()
}
