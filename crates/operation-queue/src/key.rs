use std::fmt;

/// Lane identifier. Operations with equal keys never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(String);

impl OperationKey {
	/// Key for every operation touching one object, e.g. `Folder:6f1c...`.
	pub fn object(object_type: impl fmt::Display, object_id: impl fmt::Display) -> Self {
		Self(format!("{object_type}:{object_id}"))
	}

	/// Key for operations that aren't about a single object.
	pub fn named(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for OperationKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<OperationKey> for String {
	fn from(key: OperationKey) -> Self {
		key.0
	}
}

impl AsRef<str> for OperationKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
