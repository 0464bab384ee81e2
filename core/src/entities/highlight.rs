use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yaba_sync::{FileTarget, ObjectType};

use super::EntityDocument;

/// A position inside a readable document: block, then the child index at each inline level, then
/// a character offset in the text node reached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HighlightAnchor {
	pub block_id: String,
	pub inline_path: Vec<u32>,
	pub offset: u32,
}

/// `highlights/<id>/annotation.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
	pub id: Uuid,
	pub bookmark_id: Uuid,
	/// Version of the readable content the anchors point into
	pub content_version: i32,
	pub start_anchor: HighlightAnchor,
	pub end_anchor: HighlightAnchor,
	pub color_role: i32,
	#[serde(default)]
	pub note: Option<String>,
	pub created_at: i64,
	pub edited_at: i64,
}

impl EntityDocument for Highlight {
	const OBJECT_TYPE: ObjectType = ObjectType::Highlight;
	const FILE_TARGET: FileTarget = FileTarget::Annotation;
	const KIND: &'static str = "highlight";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewHighlight {
	pub bookmark_id: Uuid,
	pub content_version: i32,
	pub start_anchor: HighlightAnchor,
	pub end_anchor: HighlightAnchor,
	pub color_role: i32,
	pub note: Option<String>,
}

impl NewHighlight {
	#[must_use]
	pub fn into_highlight(self, id: Uuid, now_ms: i64) -> Highlight {
		Highlight {
			id,
			bookmark_id: self.bookmark_id,
			content_version: self.content_version,
			start_anchor: self.start_anchor,
			end_anchor: self.end_anchor,
			color_role: self.color_role,
			note: self.note,
			created_at: now_ms,
			edited_at: now_ms,
		}
	}
}
