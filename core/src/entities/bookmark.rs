use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yaba_sync::{FileTarget, ObjectType};

use super::{EntityDocument, UNCATEGORIZED_FOLDER_ID};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum BookmarkKind {
	#[default]
	Link,
	Note,
	Image,
	File,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown bookmark kind code: {0}")]
pub struct UnknownBookmarkKind(pub i32);

impl TryFrom<i32> for BookmarkKind {
	type Error = UnknownBookmarkKind;

	fn try_from(code: i32) -> Result<Self, Self::Error> {
		match code {
			0 => Ok(Self::Link),
			1 => Ok(Self::Note),
			2 => Ok(Self::Image),
			3 => Ok(Self::File),
			other => Err(UnknownBookmarkKind(other)),
		}
	}
}

impl From<BookmarkKind> for i32 {
	fn from(kind: BookmarkKind) -> Self {
		match kind {
			BookmarkKind::Link => 0,
			BookmarkKind::Note => 1,
			BookmarkKind::Image => 2,
			BookmarkKind::File => 3,
		}
	}
}

/// `bookmarks/<id>/meta.json`, the fields every bookmark kind shares.
///
/// Tag links live here too, in `tag_ids`, so linking and unlinking ride on this document's clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkMeta {
	pub id: Uuid,
	pub folder_id: Uuid,
	pub kind: BookmarkKind,
	pub label: String,
	pub description: Option<String>,
	pub created_at: i64,
	pub edited_at: i64,
	pub view_count: i64,
	pub is_private: bool,
	pub is_pinned: bool,
	/// Relative to the bookmark's content directory
	pub local_image_path: Option<String>,
	pub local_icon_path: Option<String>,
	pub tag_ids: Vec<Uuid>,
}

impl EntityDocument for BookmarkMeta {
	const OBJECT_TYPE: ObjectType = ObjectType::Bookmark;
	const FILE_TARGET: FileTarget = FileTarget::Meta;
	const KIND: &'static str = "bookmark";
}

/// `bookmarks/<id>/link.json`, only present for link bookmarks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkDetail {
	pub url: String,
	pub domain: String,
	pub video_url: Option<String>,
	pub audio_url: Option<String>,
	pub metadata_title: Option<String>,
	pub metadata_description: Option<String>,
}

impl LinkDetail {
	/// Derives the domain from the url host, leaving it empty when there is none.
	#[must_use]
	pub fn for_url(url: impl Into<String>) -> Self {
		let url = url.into();
		let domain = url
			.split_once("://")
			.map_or(url.as_str(), |(_, rest)| rest)
			.split(['/', '?', '#'])
			.next()
			.unwrap_or_default()
			.trim_start_matches("www.")
			.to_string();

		Self {
			url,
			domain,
			..Default::default()
		}
	}
}

impl EntityDocument for LinkDetail {
	const OBJECT_TYPE: ObjectType = ObjectType::Bookmark;
	const FILE_TARGET: FileTarget = FileTarget::Link;
	const KIND: &'static str = "link";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBookmark {
	pub label: String,
	pub kind: BookmarkKind,
	/// Defaults to the uncategorized folder
	pub folder_id: Option<Uuid>,
	pub description: Option<String>,
	pub is_private: bool,
	pub is_pinned: bool,
	pub tag_ids: Vec<Uuid>,
	pub link: Option<LinkDetail>,
}

impl NewBookmark {
	#[must_use]
	pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			kind: BookmarkKind::Link,
			link: Some(LinkDetail::for_url(url)),
			..Default::default()
		}
	}

	#[must_use]
	pub fn note(label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			kind: BookmarkKind::Note,
			..Default::default()
		}
	}

	#[must_use]
	pub fn into_documents(self, id: Uuid, now_ms: i64) -> (BookmarkMeta, Option<LinkDetail>) {
		(
			BookmarkMeta {
				id,
				folder_id: self.folder_id.unwrap_or(UNCATEGORIZED_FOLDER_ID),
				kind: self.kind,
				label: self.label,
				description: self.description,
				created_at: now_ms,
				edited_at: now_ms,
				view_count: 0,
				is_private: self.is_private,
				is_pinned: self.is_pinned,
				local_image_path: None,
				local_icon_path: None,
				tag_ids: self.tag_ids,
			},
			self.link,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	#[test]
	fn kind_is_stored_as_its_code() {
		let (meta, _) = NewBookmark::note("Groceries").into_documents(Uuid::new_v4(), 0);
		let fields = meta.to_fields().unwrap();

		assert_eq!(fields["kind"], json!(1));
		assert_eq!(fields["folderId"], json!(UNCATEGORIZED_FOLDER_ID.to_string()));
		assert_eq!(serde_json::from_value::<BookmarkKind>(json!(2)).unwrap(), BookmarkKind::Image);
		assert!(serde_json::from_value::<BookmarkKind>(json!(9)).is_err());
	}

	#[test]
	fn domain_comes_from_the_url_host() {
		assert_eq!(LinkDetail::for_url("https://www.rust-lang.org/learn").domain, "rust-lang.org");
		assert_eq!(LinkDetail::for_url("example.com?q=1").domain, "example.com");
	}
}
