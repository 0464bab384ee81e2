use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;
use yaba_sync::{ChangeEvent, EventKind, FieldChanges, FileTarget, ObjectType, Recorded};

use crate::{
	context::NodeContext,
	entities::{fields, id_value, BookmarkMeta, EntityDocument, LinkDetail, NewBookmark},
	Error,
};

use super::{change_fields, create_object, delete_object, not_found, read_typed};

const TYPE: ObjectType = ObjectType::Bookmark;

#[derive(Debug, Clone)]
pub struct BookmarkManager {
	ctx: NodeContext,
}

impl BookmarkManager {
	pub(crate) const fn new(ctx: NodeContext) -> Self {
		Self { ctx }
	}

	/// Writes `meta.json`, plus `link.json` when the bookmark has link details.
	pub async fn create(&self, bookmark: NewBookmark) -> Result<BookmarkMeta, Error> {
		let id = Uuid::new_v4();
		let (meta, link) = bookmark.into_documents(id, yaba_utils::now_ms());

		let mut documents = BTreeMap::from([(FileTarget::Meta, meta.to_fields()?)]);
		if let Some(link) = link {
			documents.insert(FileTarget::Link, link.to_fields()?);
		}

		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				create_object(&ctx, TYPE, id, documents).await
			})
			.await?;

		Ok(meta)
	}

	pub async fn get(&self, id: Uuid) -> Result<Option<BookmarkMeta>, Error> {
		read_typed(&self.ctx, id).await
	}

	pub async fn link(&self, id: Uuid) -> Result<Option<LinkDetail>, Error> {
		read_typed(&self.ctx, id).await
	}

	pub async fn update(
		&self,
		id: Uuid,
		changes: FieldChanges,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				change_fields(&ctx, TYPE, id, FileTarget::Meta, EventKind::Update, changes).await
			})
			.await
	}

	/// Like [`BookmarkManager::update`], without waiting for the change to be applied.
	pub fn update_in_background(&self, id: Uuid, changes: FieldChanges) {
		self.ctx.spawn_for_object(TYPE, id, move |ctx| async move {
			change_fields(&ctx, TYPE, id, FileTarget::Meta, EventKind::Update, changes)
				.await
				.map(drop)
		});
	}

	/// Changes `link.json`, which keeps a clock lineage of its own.
	pub async fn update_link(
		&self,
		id: Uuid,
		changes: FieldChanges,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				change_fields(
					&ctx,
					TYPE,
					id,
					FileTarget::Link,
					EventKind::FieldChange,
					changes,
				)
				.await
			})
			.await
	}

	pub async fn move_to_folder(
		&self,
		id: Uuid,
		folder_id: Uuid,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.update(id, FieldChanges::new().set(fields::FOLDER_ID, id_value(folder_id)))
			.await
	}

	pub async fn add_tag(&self, id: Uuid, tag_id: Uuid) -> Result<Recorded<ChangeEvent>, Error> {
		self.edit_tags(id, move |tag_ids| {
			if !tag_ids.contains(&tag_id) {
				tag_ids.push(tag_id);
			}
		})
		.await
	}

	pub async fn remove_tag(
		&self,
		id: Uuid,
		tag_id: Uuid,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.edit_tags(id, move |tag_ids| tag_ids.retain(|linked| *linked != tag_id))
			.await
	}

	/// Tag links are a FIELD_CHANGE of the whole `tagIds` list, read and written in the bookmark
	/// lane so concurrent local edits can't drop each other's links.
	async fn edit_tags(
		&self,
		id: Uuid,
		edit: impl FnOnce(&mut Vec<Uuid>) + Send + 'static,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				let Some(meta) = read_typed::<BookmarkMeta>(&ctx, id).await? else {
					return Ok(not_found(TYPE, id));
				};

				let mut tag_ids = meta.tag_ids;
				edit(&mut tag_ids);

				let tag_ids = tag_ids.into_iter().map(id_value).collect::<Vec<_>>();

				change_fields(
					&ctx,
					TYPE,
					id,
					FileTarget::Meta,
					EventKind::FieldChange,
					FieldChanges::new().set(fields::TAG_IDS, Value::Array(tag_ids)),
				)
				.await
			})
			.await
	}

	pub async fn delete(&self, id: Uuid) -> Result<Recorded<ChangeEvent>, Error> {
		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				delete_object(&ctx, TYPE, id).await
			})
			.await
	}

	pub fn delete_in_background(&self, id: Uuid) {
		self.ctx.spawn_for_object(TYPE, id, move |ctx| async move {
			delete_object(&ctx, TYPE, id).await.map(drop)
		});
	}
}
