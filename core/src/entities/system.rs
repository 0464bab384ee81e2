use serde_json::{Map, Value};
use uuid::Uuid;
use yaba_sync::ObjectType;

use crate::Error;

use super::{EntityDocument, FolderMeta, TagMeta};

pub const UNCATEGORIZED_FOLDER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);
pub const PINNED_TAG_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0002);
pub const PRIVATE_TAG_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0003);

/// Objects every replica must always have. They can't be deleted locally, and the startup
/// reconciler brings them back if a merge deleted or displaced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemObject {
	UncategorizedFolder,
	PinnedTag,
	PrivateTag,
}

impl SystemObject {
	pub const ALL: [Self; 3] = [Self::UncategorizedFolder, Self::PinnedTag, Self::PrivateTag];

	#[must_use]
	pub const fn object_type(self) -> ObjectType {
		match self {
			Self::UncategorizedFolder => ObjectType::Folder,
			Self::PinnedTag | Self::PrivateTag => ObjectType::Tag,
		}
	}

	#[must_use]
	pub const fn id(self) -> Uuid {
		match self {
			Self::UncategorizedFolder => UNCATEGORIZED_FOLDER_ID,
			Self::PinnedTag => PINNED_TAG_ID,
			Self::PrivateTag => PRIVATE_TAG_ID,
		}
	}

	#[must_use]
	pub fn find(object_type: ObjectType, object_id: Uuid) -> Option<Self> {
		Self::ALL
			.into_iter()
			.find(|system| system.object_type() == object_type && system.id() == object_id)
	}

	#[must_use]
	pub fn is_system(object_type: ObjectType, object_id: Uuid) -> bool {
		Self::find(object_type, object_id).is_some()
	}

	/// Fields of a freshly created copy of this object.
	pub fn default_fields(self, now_ms: i64) -> Result<Map<String, Value>, Error> {
		match self {
			Self::UncategorizedFolder => FolderMeta {
				description: Some("Bookmarks without a folder end up here".to_string()),
				color_code: 1,
				order: -1,
				..FolderMeta::new(self.id(), "Uncategorized", now_ms)
			}
			.to_fields(),

			Self::PinnedTag => TagMeta {
				id: self.id(),
				label: "Pinned".to_string(),
				icon: "pin".to_string(),
				color_code: 5,
				order: -2,
				created_at: now_ms,
				edited_at: now_ms,
			}
			.to_fields(),

			Self::PrivateTag => TagMeta {
				id: self.id(),
				label: "Private".to_string(),
				icon: "lock".to_string(),
				color_code: 7,
				order: -1,
				created_at: now_ms,
				edited_at: now_ms,
			}
			.to_fields(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use yaba_sync::{Document, VectorClock};

	#[test]
	fn ids_are_bound_to_their_type() {
		assert_eq!(
			SystemObject::find(ObjectType::Tag, PINNED_TAG_ID),
			Some(SystemObject::PinnedTag)
		);
		assert!(!SystemObject::is_system(ObjectType::Folder, PINNED_TAG_ID));
		assert!(!SystemObject::is_system(ObjectType::Folder, Uuid::new_v4()));
	}

	#[test]
	fn defaults_decode_as_their_documents() {
		let folder = FolderMeta::from_document(&Document::new(
			SystemObject::UncategorizedFolder.default_fields(7).unwrap(),
			VectorClock::of("A", 1),
		))
		.unwrap();

		assert_eq!(folder.id, UNCATEGORIZED_FOLDER_ID);
		assert_eq!(folder.parent_id, None);
		assert_eq!(folder.created_at, 7);
	}
}
