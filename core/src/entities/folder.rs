use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yaba_sync::{FileTarget, ObjectType};

use super::EntityDocument;

pub const DEFAULT_FOLDER_ICON: &str = "folder-01";

/// `folders/<id>/meta.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderMeta {
	pub id: Uuid,
	/// `None` for top level folders
	pub parent_id: Option<Uuid>,
	pub label: String,
	pub description: Option<String>,
	pub icon: String,
	pub color_code: i32,
	pub order: i32,
	pub created_at: i64,
	pub edited_at: i64,
}

impl FolderMeta {
	#[must_use]
	pub fn new(id: Uuid, label: impl Into<String>, now_ms: i64) -> Self {
		Self {
			id,
			parent_id: None,
			label: label.into(),
			description: None,
			icon: DEFAULT_FOLDER_ICON.to_string(),
			color_code: 0,
			order: 0,
			created_at: now_ms,
			edited_at: now_ms,
		}
	}
}

impl EntityDocument for FolderMeta {
	const OBJECT_TYPE: ObjectType = ObjectType::Folder;
	const FILE_TARGET: FileTarget = FileTarget::Meta;
	const KIND: &'static str = "folder";
}

/// Input for creating a folder, the id is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFolder {
	pub label: String,
	pub parent_id: Option<Uuid>,
	pub description: Option<String>,
	pub icon: Option<String>,
	pub color_code: i32,
	pub order: i32,
}

impl NewFolder {
	#[must_use]
	pub fn named(label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub fn into_meta(self, id: Uuid, now_ms: i64) -> FolderMeta {
		FolderMeta {
			parent_id: self.parent_id,
			description: self.description,
			icon: self
				.icon
				.unwrap_or_else(|| DEFAULT_FOLDER_ICON.to_string()),
			color_code: self.color_code,
			order: self.order,
			..FolderMeta::new(id, self.label, now_ms)
		}
	}
}
