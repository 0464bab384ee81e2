use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yaba_sync::{FileTarget, ObjectType};

use super::EntityDocument;

pub const DEFAULT_TAG_ICON: &str = "tag-01";

/// `tags/<id>/meta.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagMeta {
	pub id: Uuid,
	pub label: String,
	pub icon: String,
	pub color_code: i32,
	pub order: i32,
	pub created_at: i64,
	pub edited_at: i64,
}

impl EntityDocument for TagMeta {
	const OBJECT_TYPE: ObjectType = ObjectType::Tag;
	const FILE_TARGET: FileTarget = FileTarget::Meta;
	const KIND: &'static str = "tag";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTag {
	pub label: String,
	pub icon: Option<String>,
	pub color_code: i32,
	pub order: i32,
}

impl NewTag {
	#[must_use]
	pub fn named(label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub fn into_meta(self, id: Uuid, now_ms: i64) -> TagMeta {
		TagMeta {
			id,
			label: self.label,
			icon: self.icon.unwrap_or_else(|| DEFAULT_TAG_ICON.to_string()),
			color_code: self.color_code,
			order: self.order,
			created_at: now_ms,
			edited_at: now_ms,
		}
	}
}
