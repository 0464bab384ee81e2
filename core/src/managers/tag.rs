use std::collections::BTreeMap;

use uuid::Uuid;
use yaba_sync::{ChangeEvent, EventKind, FieldChanges, FileTarget, ObjectType, Recorded};

use crate::{
	context::NodeContext,
	entities::{fields, EntityDocument, NewTag, TagMeta},
	Error,
};

use super::{change_fields, create_object, delete_object, read_typed};

const TYPE: ObjectType = ObjectType::Tag;

#[derive(Debug, Clone)]
pub struct TagManager {
	ctx: NodeContext,
}

impl TagManager {
	pub(crate) const fn new(ctx: NodeContext) -> Self {
		Self { ctx }
	}

	pub async fn create(&self, tag: NewTag) -> Result<TagMeta, Error> {
		let id = Uuid::new_v4();
		let meta = tag.into_meta(id, yaba_utils::now_ms());
		let documents = BTreeMap::from([(FileTarget::Meta, meta.to_fields()?)]);

		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				create_object(&ctx, TYPE, id, documents).await
			})
			.await?;

		Ok(meta)
	}

	pub async fn get(&self, id: Uuid) -> Result<Option<TagMeta>, Error> {
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

	/// Like [`TagManager::update`], without waiting for the change to be applied.
	pub fn update_in_background(&self, id: Uuid, changes: FieldChanges) {
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

	/// Bookmarks keep listing the tag id until they're edited, readers must ignore ids of
	/// deleted tags.
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
