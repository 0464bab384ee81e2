use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{trace, warn};
use uuid::Uuid;
use yaba_sync::{Document, FileTarget, ObjectType, Tombstone};
use yaba_utils::error::FileIOError;

use super::{EntityStore, StoreError};

pub const TOMBSTONE_FILE_NAME: &str = "deleted.json";

/// Stores objects as `<root>/<type dir>/<id>/<file target>.json`.
#[derive(Debug, Clone)]
pub struct FsEntityStore {
	root: PathBuf,
}

const fn type_dir(object_type: ObjectType) -> &'static str {
	match object_type {
		ObjectType::Bookmark => "bookmarks",
		ObjectType::Folder => "folders",
		ObjectType::Tag => "tags",
		ObjectType::Highlight => "highlights",
	}
}

impl FsEntityStore {
	pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let root = root.into();

		for object_type in ObjectType::ALL {
			let dir = root.join(type_dir(object_type));
			fs::create_dir_all(&dir)
				.await
				.map_err(|e| FileIOError::from((&dir, e, "Failed to create entity directory")))?;
		}

		Ok(Self { root })
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	fn object_dir(&self, object_type: ObjectType, object_id: Uuid) -> PathBuf {
		self.root
			.join(type_dir(object_type))
			.join(object_id.to_string())
	}

	fn document_path(&self, object_type: ObjectType, object_id: Uuid, target: FileTarget) -> PathBuf {
		self.object_dir(object_type, object_id)
			.join(target.file_name())
	}

	fn tombstone_path(&self, object_type: ObjectType, object_id: Uuid) -> PathBuf {
		self.object_dir(object_type, object_id)
			.join(TOMBSTONE_FILE_NAME)
	}
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
	match fs::read(path).await {
		Ok(bytes) => serde_json::from_slice(&bytes)
			.map(Some)
			.map_err(|source| StoreError::Malformed {
				path: path.to_path_buf(),
				source,
			}),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::from((path, e, "Failed to read entity file")).into()),
	}
}

/// Writes to a sibling temporary file first, so readers only ever see a complete document.
async fn write_json_atomic(path: &Path, value: &impl Serialize) -> Result<(), StoreError> {
	let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Malformed {
		path: path.to_path_buf(),
		source,
	})?;

	if let Some(dir) = path.parent() {
		fs::create_dir_all(dir)
			.await
			.map_err(|e| FileIOError::from((dir, e, "Failed to create object directory")))?;
	}

	let tmp_path = path.with_extension("json.tmp");

	let mut file = fs::File::create(&tmp_path)
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to create temporary file")))?;
	file.write_all(&bytes)
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to write temporary file")))?;
	file.sync_all()
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to sync temporary file")))?;
	drop(file);

	fs::rename(&tmp_path, path)
		.await
		.map_err(|e| FileIOError::from((path, e, "Failed to move document into place")).into())
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
	match fs::remove_file(path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			trace!(path = %path.display(), "Nothing to remove;");
			Ok(())
		}
		Err(e) => Err(FileIOError::from((path, e, "Failed to remove entity file")).into()),
	}
}

async fn exists(path: &Path) -> Result<bool, StoreError> {
	fs::try_exists(path)
		.await
		.map_err(|e| FileIOError::from((path, e)).into())
}

#[async_trait]
impl EntityStore for FsEntityStore {
	async fn read_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
	) -> Result<Option<Document>, StoreError> {
		let path = self.document_path(object_type, object_id, target);

		read_json::<Value>(&path)
			.await?
			.map(Document::from_json)
			.transpose()
			.map_err(|source| StoreError::Clock { path, source })
	}

	async fn write_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
		document: &Document,
	) -> Result<(), StoreError> {
		write_json_atomic(&self.document_path(object_type, object_id, target), document).await
	}

	async fn remove_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
	) -> Result<(), StoreError> {
		remove_if_exists(&self.document_path(object_type, object_id, target)).await
	}

	async fn write_tombstone(&self, tombstone: &Tombstone) -> Result<(), StoreError> {
		write_json_atomic(
			&self.tombstone_path(tombstone.object_type, tombstone.object_id),
			tombstone,
		)
		.await
	}

	async fn read_tombstone(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
	) -> Result<Option<Tombstone>, StoreError> {
		read_json(&self.tombstone_path(object_type, object_id)).await
	}

	async fn remove_tombstone(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
	) -> Result<(), StoreError> {
		remove_if_exists(&self.tombstone_path(object_type, object_id)).await
	}

	async fn scan_all_ids(&self, object_type: ObjectType) -> Result<Vec<Uuid>, StoreError> {
		let dir = self.root.join(type_dir(object_type));

		let mut read_dir = match fs::read_dir(&dir).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
			Err(e) => {
				return Err(FileIOError::from((&dir, e, "Failed to read entity directory")).into())
			}
		};

		let mut ids = vec![];
		while let Some(entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((&dir, e, "Failed to read entity directory entry")))?
		{
			let Some(object_id) = entry
				.file_name()
				.to_str()
				.and_then(|name| Uuid::parse_str(name).ok())
			else {
				warn!(path = %entry.path().display(), "Ignoring unexpected entry in entity directory;");
				continue;
			};

			let mut has_content = exists(&self.tombstone_path(object_type, object_id)).await?;
			for target in object_type.file_targets() {
				if has_content {
					break;
				}
				has_content = exists(&self.document_path(object_type, object_id, *target)).await?;
			}

			if has_content {
				ids.push(object_id);
			}
		}

		ids.sort_unstable();

		Ok(ids)
	}
}
