//! Typed views over the JSON documents kept in the entity store.
//!
//! The store and the change log only deal with untyped field maps; these types give managers and
//! callers a checked shape for them. Fields a newer replica adds are preserved in the document
//! since every write goes through field-level changes.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use yaba_sync::{Document, FileTarget, ObjectType};

use crate::Error;

mod bookmark;
mod folder;
mod highlight;
mod system;
mod tag;

pub use bookmark::{BookmarkKind, BookmarkMeta, LinkDetail, NewBookmark, UnknownBookmarkKind};
pub use folder::{FolderMeta, NewFolder};
pub use highlight::{Highlight, HighlightAnchor, NewHighlight};
pub use system::{
	SystemObject, PINNED_TAG_ID, PRIVATE_TAG_ID, UNCATEGORIZED_FOLDER_ID,
};
pub use tag::{NewTag, TagMeta};

/// Field names shared by several document kinds.
pub mod fields {
	pub const ID: &str = "id";
	pub const LABEL: &str = "label";
	pub const PARENT_ID: &str = "parentId";
	pub const FOLDER_ID: &str = "folderId";
	pub const TAG_IDS: &str = "tagIds";
	pub const NOTE: &str = "note";
	pub const EDITED_AT: &str = "editedAt";
}

pub trait EntityDocument: Serialize + DeserializeOwned + Send + Sync {
	const OBJECT_TYPE: ObjectType;
	const FILE_TARGET: FileTarget;
	/// Used in error reports
	const KIND: &'static str;

	fn to_fields(&self) -> Result<Map<String, Value>, Error> {
		match serde_json::to_value(self).map_err(|source| Error::Document {
			kind: Self::KIND,
			source,
		})? {
			Value::Object(fields) => Ok(fields),
			_ => Err(Error::Document {
				kind: Self::KIND,
				source: <serde_json::Error as serde::ser::Error>::custom("expected a JSON object"),
			}),
		}
	}

	fn from_document(document: &Document) -> Result<Self, Error> {
		serde_json::from_value(Value::Object(document.fields.clone())).map_err(|source| {
			Error::Document {
				kind: Self::KIND,
				source,
			}
		})
	}
}

pub(crate) fn id_value(id: Uuid) -> Value {
	Value::String(id.to_string())
}
