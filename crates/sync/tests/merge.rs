use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use uuid::Uuid;
use yaba_sync::{
	merge::{field_winner, merge_remote_events, ReplayedObject},
	merge_states, replay, ChangeEvent, DeviceId, Document, EventFactory,
	FieldChanges, FileTarget, ObjectState, ObjectType, Replica, Tombstone, VectorClock,
};

struct Device(DeviceId);

impl Device {
	fn named(name: &str) -> Self {
		Self(DeviceId::from(name))
	}
}

impl EventFactory for Device {
	fn device_id(&self) -> &DeviceId {
		&self.0
	}
}

fn fields(value: Value) -> Map<String, Value> {
	match value {
		Value::Object(map) => map,
		_ => panic!("expected object"),
	}
}

fn clock(entries: &[(&str, u64)]) -> VectorClock {
	VectorClock::from_map(
		entries
			.iter()
			.map(|(device, counter)| (DeviceId::from(*device), *counter)),
	)
}

fn live_meta(doc: Document) -> ObjectState {
	ObjectState::Live(BTreeMap::from([(FileTarget::Meta, doc)]))
}

fn meta_of(state: &ObjectState) -> &Document {
	match state {
		ObjectState::Live(docs) => docs.get(&FileTarget::Meta).expect("meta document"),
		ObjectState::Deleted(_) => panic!("expected a live object"),
	}
}

struct ConcurrentEdit {
	a_state: ObjectState,
	a_events: Vec<ChangeEvent>,
	b_state: ObjectState,
	b_events: Vec<ChangeEvent>,
}

/// A creates a bookmark and renames it; B, having only seen the creation, rewrites the
/// description.
fn label_vs_description() -> ConcurrentEdit {
	let (a, b) = (Device::named("A"), Device::named("B"));
	let id = Uuid::new_v4();

	let create = a.create_event(
		id,
		ObjectType::Bookmark,
		FileTarget::Meta,
		FieldChanges::new()
			.set("label", "Rust book")
			.set("description", "old"),
		&VectorClock::empty(),
	);
	let rename = a
		.update_event(
			id,
			ObjectType::Bookmark,
			FileTarget::Meta,
			FieldChanges::new().set("label", "The Rust Book"),
			&create.clock,
		)
		.applied()
		.expect("rename");
	let describe = b
		.update_event(
			id,
			ObjectType::Bookmark,
			FileTarget::Meta,
			FieldChanges::new().set("description", "new"),
			&create.clock,
		)
		.applied()
		.expect("describe");

	ConcurrentEdit {
		a_state: live_meta(Document::new(
			fields(json!({"label": "The Rust Book", "description": "old"})),
			rename.clock.clone(),
		)),
		a_events: vec![create.clone(), rename],
		b_state: live_meta(Document::new(
			fields(json!({"label": "Rust book", "description": "new"})),
			describe.clock.clone(),
		)),
		b_events: vec![create, describe],
	}
}

#[test]
fn concurrent_edits_on_different_fields_both_survive() {
	let edit = label_vs_description();

	let merged = merge_states(
		Replica {
			state: &edit.a_state,
			events: &edit.a_events,
		},
		Replica {
			state: &edit.b_state,
			events: &edit.b_events,
		},
	);

	let doc = meta_of(&merged);
	assert_eq!(doc.get("label"), Some(&json!("The Rust Book")));
	assert_eq!(doc.get("description"), Some(&json!("new")));
	assert_eq!(doc.clock, clock(&[("A", 2), ("B", 1)]));
}

#[test]
fn merge_is_symmetric() {
	let edit = label_vs_description();
	let a = Replica {
		state: &edit.a_state,
		events: &edit.a_events,
	};
	let b = Replica {
		state: &edit.b_state,
		events: &edit.b_events,
	};

	assert_eq!(merge_states(a, b), merge_states(b, a));
}

#[test]
fn same_field_conflict_picks_one_winner_everywhere() {
	let (a, b) = (Device::named("A"), Device::named("B"));
	let id = Uuid::new_v4();
	let base = VectorClock::of("A", 1);

	let from_a = a
		.update_event(
			id,
			ObjectType::Tag,
			FileTarget::Meta,
			FieldChanges::new().set("label", "from A"),
			&base,
		)
		.applied()
		.expect("update");
	let from_b = b
		.update_event(
			id,
			ObjectType::Tag,
			FileTarget::Meta,
			FieldChanges::new().set("label", "from B"),
			&base,
		)
		.applied()
		.expect("update");

	let a_state = live_meta(Document::new(
		fields(json!({"label": "from A"})),
		from_a.clock.clone(),
	));
	let b_state = live_meta(Document::new(
		fields(json!({"label": "from B"})),
		from_b.clock.clone(),
	));
	let (a_events, b_events) = (vec![from_a], vec![from_b]);

	let on_a = merge_states(
		Replica {
			state: &a_state,
			events: &a_events,
		},
		Replica {
			state: &b_state,
			events: &b_events,
		},
	);
	let on_b = merge_states(
		Replica {
			state: &b_state,
			events: &b_events,
		},
		Replica {
			state: &a_state,
			events: &a_events,
		},
	);

	assert_eq!(on_a, on_b);
	// A's own counter is higher in its event
	assert_eq!(meta_of(&on_a).get("label"), Some(&json!("from A")));
}

#[test]
fn dominating_side_wins_outright() {
	let older = live_meta(Document::new(fields(json!({"label": "old"})), clock(&[("A", 1)])));
	let newer = live_meta(Document::new(
		fields(json!({"label": "new", "icon": "star"})),
		clock(&[("A", 1), ("B", 2)]),
	));

	let merged = merge_states(
		Replica {
			state: &older,
			events: &[],
		},
		Replica {
			state: &newer,
			events: &[],
		},
	);

	assert_eq!(merged, newer);
}

fn tombstone(deletion_clock: VectorClock) -> ObjectState {
	ObjectState::Deleted(Tombstone {
		object_id: Uuid::nil(),
		object_type: ObjectType::Folder,
		deletion_clock,
		timestamp: 10,
	})
}

#[test]
fn tombstone_beats_updates_it_has_seen() {
	let deleted = tombstone(clock(&[("A", 2), ("B", 1)]));
	let stale = live_meta(Document::new(fields(json!({"label": "x"})), clock(&[("A", 2)])));

	let merged = merge_states(
		Replica {
			state: &stale,
			events: &[],
		},
		Replica {
			state: &deleted,
			events: &[],
		},
	);

	assert!(merged.is_deleted());
	assert_eq!(merged.clock(), clock(&[("A", 2), ("B", 1)]));
}

#[test]
fn tombstone_beats_concurrent_update() {
	let deleted = tombstone(clock(&[("A", 1), ("B", 1)]));
	let concurrent = live_meta(Document::new(fields(json!({"label": "x"})), clock(&[("A", 2)])));

	let merged = merge_states(
		Replica {
			state: &deleted,
			events: &[],
		},
		Replica {
			state: &concurrent,
			events: &[],
		},
	);

	assert!(merged.is_deleted());
	assert_eq!(merged.clock(), clock(&[("A", 2), ("B", 1)]));
}

#[test]
fn strictly_newer_update_resurrects() {
	let deleted = tombstone(clock(&[("A", 2), ("B", 1)]));
	let revived = live_meta(Document::new(
		fields(json!({"label": "back"})),
		clock(&[("A", 3), ("B", 1)]),
	));

	let merged = merge_states(
		Replica {
			state: &deleted,
			events: &[],
		},
		Replica {
			state: &revived,
			events: &[],
		},
	);

	assert_eq!(merged, revived);
}

#[test]
fn replay_rebuilds_live_object() {
	let edit = label_vs_description();
	let history = edit
		.a_events
		.iter()
		.chain(edit.b_events.iter())
		.collect::<Vec<_>>();

	let Some(ReplayedObject { state, object_type, .. }) = replay(history) else {
		panic!("events were given");
	};

	assert_eq!(object_type, ObjectType::Bookmark);
	let doc = meta_of(&state);
	assert_eq!(doc.get("label"), Some(&json!("The Rust Book")));
	assert_eq!(doc.get("description"), Some(&json!("new")));
	assert_eq!(doc.clock, clock(&[("A", 2), ("B", 1)]));
}

#[test]
fn replay_of_deleted_object_yields_tombstone() {
	let a = Device::named("A");
	let id = Uuid::new_v4();

	let create = a.create_event(
		id,
		ObjectType::Folder,
		FileTarget::Meta,
		FieldChanges::new().set("label", "Inbox"),
		&VectorClock::empty(),
	);
	let delete = a.delete_event(id, ObjectType::Folder, &create.clock);

	let replayed = replay([&create, &delete]).expect("events were given");

	assert_eq!(replayed.object_id, id);
	assert!(replayed.state.is_deleted());
	assert_eq!(replayed.state.clock(), VectorClock::of("A", 2));
}

#[test]
fn replay_ignores_duplicates_and_empty_input() {
	let a = Device::named("A");
	let create = a.create_event(
		Uuid::new_v4(),
		ObjectType::Tag,
		FileTarget::Meta,
		FieldChanges::new().set("label", "rust"),
		&VectorClock::empty(),
	);

	assert!(replay(std::iter::empty::<&ChangeEvent>()).is_none());
	assert_eq!(
		replay([&create, &create]).map(|replayed| replayed.state),
		replay([&create]).map(|replayed| replayed.state)
	);
}

#[test]
fn replayed_resurrection_keeps_fields_written_before_the_deletion() {
	let (a, b) = (Device::named("A"), Device::named("B"));
	let id = Uuid::new_v4();

	let create = a.create_event(
		id,
		ObjectType::Folder,
		FileTarget::Meta,
		FieldChanges::new().set("label", "Archive").set("order", 3),
		&VectorClock::empty(),
	);
	let delete = a.delete_event(id, ObjectType::Folder, &create.clock);
	let restore = b
		.update_event(
			id,
			ObjectType::Folder,
			FileTarget::Meta,
			FieldChanges::new().set("label", "Archive (restored)"),
			&delete.clock,
		)
		.applied()
		.expect("non empty change set");

	let replayed = replay([&create, &delete, &restore]).expect("events were given");

	let doc = meta_of(&replayed.state);
	assert_eq!(doc.get("label"), Some(&json!("Archive (restored)")));
	assert_eq!(doc.get("order"), Some(&json!(3)));
	assert_eq!(doc.clock, clock(&[("A", 2), ("B", 1)]));
}

#[test]
fn remote_edit_on_top_of_a_settled_conflict_keeps_the_settlement() {
	let (a, b) = (Device::named("A"), Device::named("B"));
	let id = Uuid::new_v4();

	let create = a.create_event(
		id,
		ObjectType::Folder,
		FileTarget::Meta,
		FieldChanges::new().set("label", "Inbox").set("description", "none"),
		&VectorClock::empty(),
	);
	let from_a = a
		.update_event(
			id,
			ObjectType::Folder,
			FileTarget::Meta,
			FieldChanges::new().set("label", "from A"),
			&create.clock,
		)
		.applied()
		.expect("label");
	let from_b = b
		.update_event(
			id,
			ObjectType::Folder,
			FileTarget::Meta,
			FieldChanges::new().set("label", "from B"),
			&create.clock,
		)
		.applied()
		.expect("label");
	// Made by B after it had merged A's label
	let describe = b
		.update_event(
			id,
			ObjectType::Folder,
			FileTarget::Meta,
			FieldChanges::new().set("description", "from B"),
			&from_a.clock.merge(&from_b.clock),
		)
		.applied()
		.expect("description");

	let on_a = BTreeMap::from([(
		FileTarget::Meta,
		Document::new(
			fields(json!({"label": "from A", "description": "none"})),
			from_a.clock.clone(),
		),
	)]);

	let merged = merge_remote_events(
		&on_a,
		&[create.clone(), from_a.clone()],
		&[from_b.clone(), describe.clone()],
	);

	let doc = &merged[&FileTarget::Meta];
	assert_eq!(doc.get("label"), Some(&json!("from A")));
	assert_eq!(doc.get("description"), Some(&json!("from B")));
	assert_eq!(doc.clock, clock(&[("A", 2), ("B", 2)]));

	// Events the local document already covers change nothing
	assert_eq!(merge_remote_events(&merged, &[], &[from_b, describe]), merged);
}

#[test]
fn field_winner_ignores_superseded_writes() {
	let (a, b, c) = (Device::named("A"), Device::named("B"), Device::named("C"));
	let id = Uuid::new_v4();
	let write = |device: &Device, base: &VectorClock| {
		device
			.update_event(
				id,
				ObjectType::Tag,
				FileTarget::Meta,
				FieldChanges::new().set("label", device.0.as_str()),
				base,
			)
			.applied()
			.expect("label")
	};

	// `older` has the highest own counter but `newer` saw it
	let older = write(&a, &clock(&[("A", 4)]));
	let newer = write(&b, &older.clock);
	let concurrent = write(&c, &clock(&[("C", 2)]));

	let orders = [
		[&older, &newer, &concurrent],
		[&concurrent, &newer, &older],
		[&newer, &concurrent, &older],
	];
	for candidates in orders {
		assert_eq!(
			field_winner(&candidates).map(|event| event.event_id),
			Some(concurrent.event_id)
		);
	}
}
