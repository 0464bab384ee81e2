use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;
use yaba_sync::{ChangeEvent, EventKind, FieldChanges, FileTarget, ObjectType, Recorded};

use crate::{
	context::NodeContext,
	entities::{fields, EntityDocument, Highlight, NewHighlight},
	Error,
};

use super::{change_fields, create_object, delete_object, read_typed};

const TYPE: ObjectType = ObjectType::Highlight;

#[derive(Debug, Clone)]
pub struct HighlightManager {
	ctx: NodeContext,
}

impl HighlightManager {
	pub(crate) const fn new(ctx: NodeContext) -> Self {
		Self { ctx }
	}

	pub async fn create(&self, highlight: NewHighlight) -> Result<Highlight, Error> {
		let id = Uuid::new_v4();
		let highlight = highlight.into_highlight(id, yaba_utils::now_ms());
		let documents = BTreeMap::from([(FileTarget::Annotation, highlight.to_fields()?)]);

		self.ctx
			.run_for_object(TYPE, id, move |ctx| async move {
				create_object(&ctx, TYPE, id, documents).await
			})
			.await?;

		Ok(highlight)
	}

	pub async fn get(&self, id: Uuid) -> Result<Option<Highlight>, Error> {
		read_typed(&self.ctx, id).await
	}

	pub async fn update(
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
					FileTarget::Annotation,
					EventKind::Update,
					changes,
				)
				.await
			})
			.await
	}

	/// Like [`HighlightManager::update`], without waiting for the change to be applied.
	pub fn update_in_background(&self, id: Uuid, changes: FieldChanges) {
		self.ctx.spawn_for_object(TYPE, id, move |ctx| async move {
			change_fields(&ctx, TYPE, id, FileTarget::Annotation, EventKind::Update, changes)
				.await
				.map(drop)
		});
	}

	/// `None` clears the note.
	pub async fn update_note(
		&self,
		id: Uuid,
		note: Option<String>,
	) -> Result<Recorded<ChangeEvent>, Error> {
		self.update(
			id,
			FieldChanges::new().set(fields::NOTE, note.map_or(Value::Null, Value::String)),
		)
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
