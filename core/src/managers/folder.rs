use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use yaba_sync::{ChangeEvent, EventKind, FieldChanges, FileTarget, ObjectType, Recorded, SkipReason};

use crate::{
	context::NodeContext,
	entities::{fields, id_value, BookmarkMeta, EntityDocument, FolderMeta, NewFolder, SystemObject},
	Error,
};

use super::{change_fields, create_object, delete_object, read_typed};

const TYPE: ObjectType = ObjectType::Folder;

#[derive(Debug, Clone)]
pub struct FolderManager {
	ctx: NodeContext,
}

/// Everything a folder deletion takes down with it.
#[derive(Debug, Default)]
struct Cascade {
	/// The deleted folder first, every folder before its children
	folders: Vec<Uuid>,
	bookmarks: Vec<Uuid>,
}

impl FolderManager {
	pub(crate) const fn new(ctx: NodeContext) -> Self {
		Self { ctx }
	}

	pub async fn create(&self, folder: NewFolder) -> Result<FolderMeta, Error> {
		let id = Uuid::new_v4();
		let meta = folder.into_meta(id, yaba_utils::now_ms());
		let documents = BTreeMap::from([(FileTarget::Meta, meta.to_fields()?)]);

		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				create_object(&ctx, TYPE, id, documents).await
			})
			.await?;

		Ok(meta)
	}

	pub async fn get(&self, id: Uuid) -> Result<Option<FolderMeta>, Error> {
		read_typed(&self.ctx, id).await
	}

	/// System folders always stay at the top level, changes to their `parentId` are refused.
	pub async fn update(
		&self,
		id: Uuid,
		changes: FieldChanges,
	) -> Result<Recorded<ChangeEvent>, Error> {
		if let Some(refused) = refuse_reparenting(id, &changes) {
			return Ok(refused);
		}

		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				change_fields(&ctx, TYPE, id, FileTarget::Meta, EventKind::Update, changes).await
			})
			.await
	}

	/// Like [`FolderManager::update`], without waiting for the change to be applied.
	pub fn update_in_background(&self, id: Uuid, changes: FieldChanges) {
		if refuse_reparenting(id, &changes).is_some() {
			return;
		}

		self.ctx.spawn_for_object(TYPE, id, move |ctx| async move {
			change_fields(&ctx, TYPE, id, FileTarget::Meta, EventKind::Update, changes)
				.await
				.map(drop)
		});
	}

	pub async fn rename(
		&self,
		id: Uuid,
		label: impl Into<String> + Send,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.update(id, FieldChanges::new().set(fields::LABEL, label.into()))
			.await
	}

	/// Moves a folder under `parent`, or to the top level with `None`.
	pub async fn move_to(
		&self,
		id: Uuid,
		parent: Option<Uuid>,
	) -> Result<Recorded<ChangeEvent>, Error> {
		if parent == Some(id) {
			warn!(folder_id = %id, "A folder can't be its own parent;");
			return Ok(Recorded::Skipped(SkipReason::EmptyChangeSet));
		}

		let parent = parent.map_or(Value::Null, id_value);
		self.update(id, FieldChanges::new().set(fields::PARENT_ID, parent))
			.await
	}

	/// Tombstones a folder together with every folder below it and every bookmark they hold.
	/// Bookmarks go first, then folders from the deepest up, each in its own lane. Nothing is moved
	/// to the uncategorized folder.
	///
	/// Returns the outcome for `id` itself.
	#[instrument(skip(self), err)]
	pub async fn delete(&self, id: Uuid) -> Result<Recorded<ChangeEvent>, Error> {
		let cascade = match self.cascade_of(id).await? {
			Ok(cascade) => cascade,
			Err(refused) => return Ok(refused),
		};

		for bookmark_id in cascade.bookmarks {
			self.ctx
				.run_for_object(ObjectType::Bookmark, bookmark_id, move |ctx| async move {
					delete_object(&ctx, ObjectType::Bookmark, bookmark_id).await
				})
				.await?;
		}

		let mut outcome = Recorded::Skipped(SkipReason::NotFound);
		for folder_id in cascade.folders.into_iter().rev() {
			outcome = self
				.ctx
				.run_for_object(TYPE, folder_id, move |ctx| async move {
					delete_object(&ctx, TYPE, folder_id).await
				})
				.await?;
		}

		Ok(outcome)
	}

	/// Queues the same deletions as [`FolderManager::delete`] without waiting for them.
	pub async fn delete_in_background(&self, id: Uuid) -> Result<(), Error> {
		let Ok(cascade) = self.cascade_of(id).await? else {
			return Ok(());
		};

		for bookmark_id in cascade.bookmarks {
			self.ctx
				.spawn_for_object(ObjectType::Bookmark, bookmark_id, move |ctx| async move {
					delete_object(&ctx, ObjectType::Bookmark, bookmark_id)
						.await
						.map(drop)
				});
		}

		for folder_id in cascade.folders.into_iter().rev() {
			self.ctx.spawn_for_object(TYPE, folder_id, move |ctx| async move {
				delete_object(&ctx, TYPE, folder_id).await.map(drop)
			});
		}

		Ok(())
	}

	/// Collects what deleting `id` takes down, or the reason nothing is deleted at all. Missing
	/// or already deleted folders cascade to nothing, the lane reports why.
	async fn cascade_of(&self, id: Uuid) -> Result<Result<Cascade, Recorded<ChangeEvent>>, Error> {
		if SystemObject::is_system(TYPE, id) {
			warn!(folder_id = %id, "Refusing to delete a system folder;");
			return Ok(Err(Recorded::Skipped(SkipReason::SystemObject)));
		}

		if self.get(id).await?.is_none() {
			return Ok(Ok(Cascade {
				folders: vec![id],
				..Default::default()
			}));
		}

		let mut children = BTreeMap::<Uuid, Vec<Uuid>>::new();
		for folder_id in self.ctx.store.scan_all_ids(TYPE).await? {
			if SystemObject::is_system(TYPE, folder_id) {
				continue;
			}
			if let Some(FolderMeta {
				parent_id: Some(parent_id),
				..
			}) = read_typed::<FolderMeta>(&self.ctx, folder_id).await?
			{
				children.entry(parent_id).or_default().push(folder_id);
			}
		}

		let mut folders = vec![id];
		let mut seen = BTreeSet::from([id]);
		let mut next = 0;
		while let Some(parent_id) = folders.get(next).copied() {
			next += 1;
			for child_id in children.remove(&parent_id).unwrap_or_default() {
				// A parent cycle must not loop forever
				if seen.insert(child_id) {
					folders.push(child_id);
				}
			}
		}

		let mut bookmarks = vec![];
		for bookmark_id in self.ctx.store.scan_all_ids(ObjectType::Bookmark).await? {
			if let Some(meta) = read_typed::<BookmarkMeta>(&self.ctx, bookmark_id).await? {
				if seen.contains(&meta.folder_id) {
					bookmarks.push(bookmark_id);
				}
			}
		}

		debug!(
			folder_id = %id,
			folders = folders.len(),
			bookmarks = bookmarks.len(),
			"Deleting folder with its contents;"
		);

		Ok(Ok(Cascade { folders, bookmarks }))
	}
}

fn refuse_reparenting(id: Uuid, changes: &FieldChanges) -> Option<Recorded<ChangeEvent>> {
	if SystemObject::is_system(TYPE, id) && changes.contains(fields::PARENT_ID) {
		warn!(folder_id = %id, "System folders can't be moved;");
		return Some(Recorded::Skipped(SkipReason::SystemObject));
	}

	None
}
