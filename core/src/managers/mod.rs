//! Local mutations. Every operation here runs inside the lane of the object it touches and follows
//! the same sequence: read the current documents, write the new ones, append the event, project
//! to the cache. A failed append rolls the store back to what it was before the operation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;
use yaba_sync::{
	ChangeEvent, Document, EventFactory, EventKind, FieldChanges, FileTarget, ObjectState,
	ObjectType, Recorded, SkipReason, Tombstone, VectorClock,
};

use crate::{
	cache::project,
	context::NodeContext,
	entities::{fields, EntityDocument, SystemObject},
	store::{load_state, read_documents, save_state},
	Error,
};

mod bookmark;
mod folder;
mod highlight;
mod tag;

pub use bookmark::BookmarkManager;
pub use folder::FolderManager;
pub use highlight::HighlightManager;
pub use tag::TagManager;

/// Reads the typed document of an object, outside of any lane. `None` for missing or deleted
/// objects.
pub(crate) async fn read_typed<D: EntityDocument>(
	ctx: &NodeContext,
	object_id: Uuid,
) -> Result<Option<D>, Error> {
	if ctx.store.is_deleted(D::OBJECT_TYPE, object_id).await? {
		return Ok(None);
	}

	ctx.store
		.read_document(D::OBJECT_TYPE, object_id, D::FILE_TARGET)
		.await?
		.map(|doc| D::from_document(&doc))
		.transpose()
}

/// Writes the first version of every document of an object and records one CREATE event per
/// document.
///
/// Recreating a tombstoned object starts from the tombstone clock, so the new documents dominate
/// the deletion everywhere.
#[instrument(skip(ctx, documents), err)]
pub(crate) async fn create_object(
	ctx: &NodeContext,
	object_type: ObjectType,
	object_id: Uuid,
	documents: BTreeMap<FileTarget, Map<String, Value>>,
) -> Result<BTreeMap<FileTarget, Document>, Error> {
	let (base_clock, tombstoned) = match load_state(&*ctx.store, object_type, object_id).await? {
		Some(ObjectState::Live(_)) => {
			return Err(Error::AlreadyExists {
				object_type,
				object_id,
			})
		}
		Some(ObjectState::Deleted(tombstone)) => (tombstone.deletion_clock, true),
		None => (VectorClock::empty(), false),
	};

	let events = documents
		.into_iter()
		.map(|(target, fields)| {
			ctx.log.create_event(
				object_id,
				object_type,
				target,
				FieldChanges::from(fields),
				&base_clock,
			)
		})
		.collect::<Vec<_>>();

	let written = events
		.iter()
		.map(|event| {
			let mut fields = Map::new();
			event.payload.apply_to(&mut fields);
			(event.file_target, Document::new(fields, event.clock.clone()))
		})
		.collect::<BTreeMap<_, _>>();

	for (target, doc) in &written {
		if let Err(e) = ctx
			.store
			.write_document(object_type, object_id, *target, doc)
			.await
		{
			remove_documents(ctx, object_type, object_id, written.keys()).await;
			return Err(e.into());
		}
	}

	if let Err(e) = ctx.log.append_local(events).await {
		remove_documents(ctx, object_type, object_id, written.keys()).await;
		return Err(e.into());
	}

	if tombstoned {
		ctx.store.remove_tombstone(object_type, object_id).await?;
	}

	project(
		&*ctx.cache,
		object_type,
		object_id,
		&ObjectState::Live(written.clone()),
	)
	.await;

	Ok(written)
}

async fn remove_documents(
	ctx: &NodeContext,
	object_type: ObjectType,
	object_id: Uuid,
	targets: impl Iterator<Item = &FileTarget>,
) {
	for target in targets {
		if let Err(e) = ctx
			.store
			.remove_document(object_type, object_id, *target)
			.await
		{
			error!(%object_type, %object_id, ?target, ?e, "Failed to roll back created document;");
		}
	}
}

/// Applies field assignments to one document of an existing object.
///
/// Fields already holding the requested value are dropped from the change set, and `editedAt` is
/// bumped on documents that have it. A secondary document that doesn't exist yet starts from the
/// primary document's clock.
#[instrument(skip(ctx, requested), err)]
pub(crate) async fn change_fields(
	ctx: &NodeContext,
	object_type: ObjectType,
	object_id: Uuid,
	target: FileTarget,
	kind: EventKind,
	requested: FieldChanges,
) -> Result<Recorded<ChangeEvent>, Error> {
	let previous = ctx
		.store
		.read_document(object_type, object_id, target)
		.await?;

	let current = match previous.clone() {
		Some(doc) => doc,
		None if target != object_type.primary_target() => {
			match ctx
				.store
				.read_document(object_type, object_id, object_type.primary_target())
				.await?
			{
				Some(primary) => Document::new(Map::new(), primary.clock),
				None => return Ok(not_found(object_type, object_id)),
			}
		}
		None => return Ok(not_found(object_type, object_id)),
	};

	let mut changes = requested
		.iter()
		.filter(|(field, value)| current.get(field).unwrap_or(&Value::Null) != *value)
		.map(|(field, value)| (field.clone(), value.clone()))
		.collect::<FieldChanges>();

	if changes.is_empty() {
		debug!(%object_type, %object_id, "Nothing to change;");
		return Ok(Recorded::Skipped(SkipReason::EmptyChangeSet));
	}

	if current.get(fields::EDITED_AT).is_some() && !changes.contains(fields::EDITED_AT) {
		changes.insert(fields::EDITED_AT, Value::from(yaba_utils::now_ms()));
	}

	let event = match kind {
		EventKind::FieldChange => {
			ctx.log
				.field_change_event(object_id, object_type, target, changes, &current.clock)
		}
		_ => ctx
			.log
			.update_event(object_id, object_type, target, changes, &current.clock),
	};
	let event = match event {
		Recorded::Applied(event) => event,
		skipped @ Recorded::Skipped(_) => return Ok(skipped),
	};

	let mut fields = current.fields;
	event.payload.apply_to(&mut fields);
	ctx.store
		.write_document(
			object_type,
			object_id,
			target,
			&Document::new(fields, event.clock.clone()),
		)
		.await?;

	if let Err(e) = ctx.log.append_local(vec![event.clone()]).await {
		let rollback = match &previous {
			Some(doc) => {
				ctx.store
					.write_document(object_type, object_id, target, doc)
					.await
			}
			None => {
				ctx.store
					.remove_document(object_type, object_id, target)
					.await
			}
		};
		if let Err(rollback_err) = rollback {
			error!(%object_type, %object_id, ?rollback_err, "Failed to roll back document after a failed append;");
		}
		return Err(e.into());
	}

	let documents = read_documents(&*ctx.store, object_type, object_id).await?;
	project(
		&*ctx.cache,
		object_type,
		object_id,
		&ObjectState::Live(documents),
	)
	.await;

	Ok(Recorded::Applied(event))
}

fn not_found(object_type: ObjectType, object_id: Uuid) -> Recorded<ChangeEvent> {
	warn!(%object_type, %object_id, "Mutation targets an object that doesn't exist, skipping;");
	Recorded::Skipped(SkipReason::NotFound)
}

/// Tombstones an object. The tombstone clock is the object clock bumped for this device, so it
/// dominates every document the object had.
#[instrument(skip(ctx), err)]
pub(crate) async fn delete_object(
	ctx: &NodeContext,
	object_type: ObjectType,
	object_id: Uuid,
) -> Result<Recorded<ChangeEvent>, Error> {
	if SystemObject::is_system(object_type, object_id) {
		warn!(%object_type, %object_id, "Refusing to delete a system object;");
		return Ok(Recorded::Skipped(SkipReason::SystemObject));
	}

	let documents = match load_state(&*ctx.store, object_type, object_id).await? {
		Some(ObjectState::Deleted(_)) => {
			debug!(%object_type, %object_id, "Object is already deleted;");
			return Ok(Recorded::Skipped(SkipReason::AlreadyDeleted));
		}
		Some(ObjectState::Live(documents)) => documents,
		None => return Ok(not_found(object_type, object_id)),
	};

	let previous = ObjectState::Live(documents);
	let event = ctx
		.log
		.delete_event(object_id, object_type, &previous.clock());

	let deleted = ObjectState::Deleted(Tombstone {
		object_id,
		object_type,
		deletion_clock: event.clock.clone(),
		timestamp: event.timestamp,
	});

	if let Err(e) = save_state(&*ctx.store, object_type, object_id, &deleted).await {
		restore(ctx, object_type, object_id, &previous).await;
		return Err(e.into());
	}

	if let Err(e) = ctx.log.append_local(vec![event.clone()]).await {
		restore(ctx, object_type, object_id, &previous).await;
		return Err(e.into());
	}

	project(&*ctx.cache, object_type, object_id, &deleted).await;

	Ok(Recorded::Applied(event))
}

async fn restore(ctx: &NodeContext, object_type: ObjectType, object_id: Uuid, state: &ObjectState) {
	if let Err(e) = save_state(&*ctx.store, object_type, object_id, state).await {
		error!(%object_type, %object_id, ?e, "Failed to restore object after a failed delete;");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::sync::Arc;

	use serde_json::json;
	use tempfile::tempdir;
	use tracing_test::traced_test;
	use yaba_operation_queue::OperationQueue;
	use yaba_sync::DeviceId;

	use crate::{
		cache::MemoryCache,
		store::{EntityStore, FsEntityStore},
		sync::ChangeLog,
	};

	async fn context(dir: &std::path::Path) -> (NodeContext, Arc<MemoryCache>) {
		let device_id = DeviceId::from("A");
		let cache = Arc::new(MemoryCache::new());
		let ctx = NodeContext {
			store: Arc::new(FsEntityStore::open(dir.join("library")).await.unwrap()),
			log: Arc::new(
				ChangeLog::open(dir.join("sync"), device_id.clone())
					.await
					.unwrap(),
			),
			cache: Arc::clone(&cache) as _,
			queue: OperationQueue::with_defaults().unwrap(),
			device_id,
		};
		(ctx, cache)
	}

	fn label(label: &str) -> BTreeMap<FileTarget, Map<String, Value>> {
		BTreeMap::from([(
			FileTarget::Meta,
			json!({"label": label, "editedAt": 0})
				.as_object()
				.cloned()
				.unwrap(),
		)])
	}

	#[tokio::test]
	async fn create_then_change_advances_the_document_clock() {
		let dir = tempdir().unwrap();
		let (ctx, cache) = context(dir.path()).await;
		let id = Uuid::new_v4();

		let created = create_object(&ctx, ObjectType::Tag, id, label("old"))
			.await
			.unwrap();
		assert_eq!(created[&FileTarget::Meta].clock, VectorClock::of("A", 1));

		let event = change_fields(
			&ctx,
			ObjectType::Tag,
			id,
			FileTarget::Meta,
			EventKind::Update,
			FieldChanges::new().set("label", "new"),
		)
		.await
		.unwrap()
		.applied()
		.unwrap();

		assert_eq!(event.clock, VectorClock::of("A", 2));
		assert!(event.payload.contains(fields::EDITED_AT));

		let doc = ctx
			.store
			.read_document(ObjectType::Tag, id, FileTarget::Meta)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(doc.get("label"), Some(&json!("new")));
		assert_eq!(doc.clock, event.clock);

		let cached = cache.get(ObjectType::Tag, id).await.unwrap();
		assert_eq!(cached.primary().unwrap().get("label"), Some(&json!("new")));
	}

	#[tokio::test]
	async fn unchanged_fields_are_not_recorded() {
		let dir = tempdir().unwrap();
		let (ctx, _) = context(dir.path()).await;
		let id = Uuid::new_v4();
		create_object(&ctx, ObjectType::Tag, id, label("same"))
			.await
			.unwrap();

		let outcome = change_fields(
			&ctx,
			ObjectType::Tag,
			id,
			FileTarget::Meta,
			EventKind::Update,
			FieldChanges::new().set("label", "same").clear("missing"),
		)
		.await
		.unwrap();

		assert_eq!(outcome, Recorded::Skipped(SkipReason::EmptyChangeSet));
		assert_eq!(ctx.log.event_count().await, 1);
	}

	#[tokio::test]
	#[traced_test]
	async fn missing_objects_are_skipped() {
		let dir = tempdir().unwrap();
		let (ctx, _) = context(dir.path()).await;

		let outcome = change_fields(
			&ctx,
			ObjectType::Folder,
			Uuid::new_v4(),
			FileTarget::Meta,
			EventKind::Update,
			FieldChanges::new().set("label", "x"),
		)
		.await
		.unwrap();

		assert_eq!(outcome, Recorded::Skipped(SkipReason::NotFound));
		assert!(logs_contain("doesn't exist"));
		assert_eq!(ctx.log.event_count().await, 0);
	}

	#[tokio::test]
	async fn deleting_twice_records_one_event() {
		let dir = tempdir().unwrap();
		let (ctx, cache) = context(dir.path()).await;
		let id = Uuid::new_v4();
		create_object(&ctx, ObjectType::Folder, id, label("gone"))
			.await
			.unwrap();

		let first = delete_object(&ctx, ObjectType::Folder, id)
			.await
			.unwrap()
			.applied()
			.unwrap();
		let second = delete_object(&ctx, ObjectType::Folder, id).await.unwrap();

		assert_eq!(second, Recorded::Skipped(SkipReason::AlreadyDeleted));
		let tombstone = ctx
			.store
			.read_tombstone(ObjectType::Folder, id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(tombstone.deletion_clock, first.clock);
		assert!(tombstone.deletion_clock.dominates(&VectorClock::of("A", 1)));
		assert_eq!(ctx.log.event_count().await, 2);
		assert!(!cache.contains(ObjectType::Folder, id).await);
	}

	#[tokio::test]
	async fn recreating_a_deleted_object_dominates_its_tombstone() {
		let dir = tempdir().unwrap();
		let (ctx, _) = context(dir.path()).await;
		let id = Uuid::new_v4();
		create_object(&ctx, ObjectType::Tag, id, label("first"))
			.await
			.unwrap();
		let deletion = delete_object(&ctx, ObjectType::Tag, id)
			.await
			.unwrap()
			.applied()
			.unwrap();

		let recreated = create_object(&ctx, ObjectType::Tag, id, label("second"))
			.await
			.unwrap();

		assert!(recreated[&FileTarget::Meta].clock.dominates(&deletion.clock));
		assert!(!ctx.store.is_deleted(ObjectType::Tag, id).await.unwrap());
		assert!(matches!(
			create_object(&ctx, ObjectType::Tag, id, label("third")).await,
			Err(Error::AlreadyExists { .. })
		));
	}
}
