//! The authoritative persistence of every object: one JSON document per file target, each carrying
//! its own clock, plus a tombstone file for deleted objects.

use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use uuid::Uuid;
use yaba_sync::{ClockError, Document, FileTarget, ObjectState, ObjectType, Tombstone};
use yaba_utils::error::FileIOError;

mod fs;

pub use fs::FsEntityStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("malformed JSON document <path='{}'>: {source}", .path.display())]
	Malformed {
		path: PathBuf,
		source: serde_json::Error,
	},
	#[error("document has an invalid clock <path='{}'>: {source}", .path.display())]
	Clock { path: PathBuf, source: ClockError },
	#[error("entity store unavailable: {0}")]
	Unavailable(String),
}

#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
	/// `None` when the document doesn't exist.
	async fn read_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
	) -> Result<Option<Document>, StoreError>;

	async fn write_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
		document: &Document,
	) -> Result<(), StoreError>;

	/// Removing a missing document is not an error.
	async fn remove_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
	) -> Result<(), StoreError>;

	async fn write_tombstone(&self, tombstone: &Tombstone) -> Result<(), StoreError>;

	async fn read_tombstone(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
	) -> Result<Option<Tombstone>, StoreError>;

	async fn is_deleted(&self, object_type: ObjectType, object_id: Uuid) -> Result<bool, StoreError> {
		Ok(self.read_tombstone(object_type, object_id).await?.is_some())
	}

	/// Removing a missing tombstone is not an error.
	async fn remove_tombstone(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
	) -> Result<(), StoreError>;

	/// Every id with something on disk, live or tombstoned.
	async fn scan_all_ids(&self, object_type: ObjectType) -> Result<Vec<Uuid>, StoreError>;
}

/// Every existing document of an object, keyed by file target.
pub async fn read_documents(
	store: &dyn EntityStore,
	object_type: ObjectType,
	object_id: Uuid,
) -> Result<BTreeMap<FileTarget, Document>, StoreError> {
	let mut documents = BTreeMap::new();

	for target in object_type.file_targets() {
		if let Some(doc) = store.read_document(object_type, object_id, *target).await? {
			documents.insert(*target, doc);
		}
	}

	Ok(documents)
}

/// What this replica knows about an object, `None` if nothing at all.
///
/// A tombstone always wins over leftover documents.
pub async fn load_state(
	store: &dyn EntityStore,
	object_type: ObjectType,
	object_id: Uuid,
) -> Result<Option<ObjectState>, StoreError> {
	if let Some(tombstone) = store.read_tombstone(object_type, object_id).await? {
		return Ok(Some(ObjectState::Deleted(tombstone)));
	}

	let documents = read_documents(store, object_type, object_id).await?;

	Ok((!documents.is_empty()).then_some(ObjectState::Live(documents)))
}

/// Makes the store reflect `state`. Documents are written before the tombstone goes away, and the
/// tombstone is written before documents go away, so a crash in between never loses the object.
pub async fn save_state(
	store: &dyn EntityStore,
	object_type: ObjectType,
	object_id: Uuid,
	state: &ObjectState,
) -> Result<(), StoreError> {
	match state {
		ObjectState::Live(documents) => {
			for (target, doc) in documents {
				store
					.write_document(object_type, object_id, *target, doc)
					.await?;
			}
			store.remove_tombstone(object_type, object_id).await
		}

		ObjectState::Deleted(tombstone) => {
			store.write_tombstone(tombstone).await?;
			for target in object_type.file_targets() {
				store
					.remove_document(object_type, object_id, *target)
					.await?;
			}
			Ok(())
		}
	}
}
