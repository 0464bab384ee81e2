use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ClockError, DeviceId, VectorClock};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
	Bookmark,
	Folder,
	Tag,
	Highlight,
}

impl ObjectType {
	pub const ALL: [Self; 4] = [Self::Bookmark, Self::Folder, Self::Tag, Self::Highlight];

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Bookmark => "Bookmark",
			Self::Folder => "Folder",
			Self::Tag => "Tag",
			Self::Highlight => "Highlight",
		}
	}

	/// Documents this object type is made of, the primary one first.
	#[must_use]
	pub const fn file_targets(self) -> &'static [FileTarget] {
		match self {
			Self::Bookmark => &[FileTarget::Meta, FileTarget::Link],
			Self::Folder | Self::Tag => &[FileTarget::Meta],
			Self::Highlight => &[FileTarget::Annotation],
		}
	}

	#[must_use]
	pub const fn primary_target(self) -> FileTarget {
		self.file_targets()[0]
	}
}

impl fmt::Display for ObjectType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Which physical document of an object a change applies to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileTarget {
	/// `meta.json`, the base metadata every object has
	Meta,
	/// `link.json`, link specific bookmark data
	Link,
	/// `annotation.json`, highlight data
	Annotation,
}

impl FileTarget {
	#[must_use]
	pub const fn file_name(self) -> &'static str {
		match self {
			Self::Meta => "meta.json",
			Self::Link => "link.json",
			Self::Annotation => "annotation.json",
		}
	}
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
	Create,
	Update,
	Delete,
	FieldChange,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Create => "CREATE",
			Self::Update => "UPDATE",
			Self::Delete => "DELETE",
			Self::FieldChange => "FIELD_CHANGE",
		})
	}
}

/// A set of field assignments.
///
/// A field mapped to [`Value::Null`] is an explicit "clear this field", which is different from the
/// field not being in the set at all ("leave it alone").
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct FieldChanges(BTreeMap<String, Value>);

impl FieldChanges {
	#[must_use]
	pub const fn new() -> Self {
		Self(BTreeMap::new())
	}

	#[must_use]
	pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(field.into(), value.into());
		self
	}

	#[must_use]
	pub fn clear(mut self, field: impl Into<String>) -> Self {
		self.0.insert(field.into(), Value::Null);
		self
	}

	pub fn insert(&mut self, field: impl Into<String>, value: Value) {
		self.0.insert(field.into(), value);
	}

	/// Fields whose value differs between `before` and `after`. A field present before and
	/// missing after is recorded as cleared.
	#[must_use]
	pub fn diff(before: &Map<String, Value>, after: &Map<String, Value>) -> Self {
		let mut changes = Self::new();

		for (field, value) in after {
			if before.get(field) != Some(value) {
				changes.insert(field.clone(), value.clone());
			}
		}

		for field in before.keys() {
			if !after.contains_key(field) {
				changes.insert(field.clone(), Value::Null);
			}
		}

		changes
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	#[must_use]
	pub fn contains(&self, field: &str) -> bool {
		self.0.contains_key(field)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}

	pub fn fields(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	/// Applies every assignment onto `target`.
	pub fn apply_to(&self, target: &mut Map<String, Value>) {
		for (field, value) in &self.0 {
			target.insert(field.clone(), value.clone());
		}
	}
}

impl FromIterator<(String, Value)> for FieldChanges {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl From<Map<String, Value>> for FieldChanges {
	fn from(map: Map<String, Value>) -> Self {
		map.into_iter().collect()
	}
}

/// One immutable mutation record, both local history and the unit of replication.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
	pub event_id: Uuid,
	pub object_id: Uuid,
	pub object_type: ObjectType,
	pub file_target: FileTarget,
	pub kind: EventKind,
	pub payload: FieldChanges,
	/// Clock of the target document right after this mutation
	pub clock: VectorClock,
	pub device_id: DeviceId,
	/// Unix milliseconds, informative only
	pub timestamp: i64,
}

impl ChangeEvent {
	#[must_use]
	pub fn is_delete(&self) -> bool {
		self.kind == EventKind::Delete
	}

	/// Counter of the device that produced this event, as seen in its own clock.
	#[must_use]
	pub fn origin_counter(&self) -> u64 {
		self.clock.get(&self.device_id)
	}
}

impl fmt::Debug for ChangeEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChangeEvent")
			.field("event_id", &self.event_id.to_string())
			.field("object", &format!("{}:{}", self.object_type, self.object_id))
			.field("file_target", &self.file_target)
			.field("kind", &self.kind.to_string())
			.field("fields", &self.payload.fields().collect::<Vec<_>>())
			.field("clock", &self.clock.to_string())
			.field("device_id", &self.device_id.as_str())
			.finish()
	}
}

/// A persisted JSON document: domain fields plus the embedded `clock`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Document {
	#[serde(flatten)]
	pub fields: Map<String, Value>,
	pub clock: VectorClock,
}

impl Document {
	#[must_use]
	pub const fn new(fields: Map<String, Value>, clock: VectorClock) -> Self {
		Self { fields, clock }
	}

	/// Decodes a raw document, failing with a typed [`ClockError`] on a missing or malformed
	/// clock instead of defaulting it.
	pub fn from_json(value: Value) -> Result<Self, ClockError> {
		let Value::Object(mut fields) = value else {
			return Err(ClockError::NotAnObject("document"));
		};

		let clock = fields
			.remove(CLOCK_FIELD)
			.ok_or(ClockError::Missing)
			.and_then(|clock| VectorClock::from_json(&clock))?;

		Ok(Self { fields, clock })
	}

	#[must_use]
	pub fn into_json(self) -> Value {
		let mut fields = self.fields;
		fields.insert(CLOCK_FIELD.to_string(), self.clock.to_json());
		Value::Object(fields)
	}

	#[must_use]
	pub fn get(&self, field: &str) -> Option<&Value> {
		self.fields.get(field)
	}
}

pub const CLOCK_FIELD: &str = "clock";

/// Durable marker that an object was logically deleted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
	pub object_id: Uuid,
	pub object_type: ObjectType,
	/// Must dominate the clock the object had right before deletion
	#[serde(rename = "clock")]
	pub deletion_clock: VectorClock,
	pub timestamp: i64,
}

/// Outcome of a recording attempt: either applied, or deliberately not done.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded<T> {
	Applied(T),
	Skipped(SkipReason),
}

impl<T> Recorded<T> {
	#[must_use]
	pub const fn is_applied(&self) -> bool {
		matches!(self, Self::Applied(_))
	}

	pub fn applied(self) -> Option<T> {
		match self {
			Self::Applied(value) => Some(value),
			Self::Skipped(_) => None,
		}
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recorded<U> {
		match self {
			Self::Applied(value) => Recorded::Applied(f(value)),
			Self::Skipped(reason) => Recorded::Skipped(reason),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	/// The change set had no actual differences
	EmptyChangeSet,
	/// The target object has no current document
	NotFound,
	/// The target object is already tombstoned
	AlreadyDeleted,
	/// System singletons can't be deleted locally
	SystemObject,
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::EmptyChangeSet => "empty change set",
			Self::NotFound => "object not found",
			Self::AlreadyDeleted => "object already deleted",
			Self::SystemObject => "system object",
		})
	}
}
