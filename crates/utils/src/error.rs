use std::{fmt::Display, path::Path};

use thiserror::Error;

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
	pub maybe_context: Option<String>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.as_ref()
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: std::io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}

	pub fn from_std_io_err_with_msg(
		path: impl AsRef<Path>,
		source: std::io::Error,
		msg: impl Into<String>,
	) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(msg.into()),
		}
	}

	/// Whether the underlying failure was a missing file, which most readers treat as "absent"
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		self.source.kind() == std::io::ErrorKind::NotFound
	}
}

impl<P: AsRef<Path>> From<(P, std::io::Error)> for FileIOError {
	fn from((path, source): (P, std::io::Error)) -> Self {
		Self::from_std_io_err(path, source)
	}
}

impl<P: AsRef<Path>> From<(P, std::io::Error, &'static str)> for FileIOError {
	fn from((path, source, msg): (P, std::io::Error, &'static str)) -> Self {
		Self::from_std_io_err_with_msg(path, source, msg)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_context_and_path() {
		let err = FileIOError::from_std_io_err_with_msg(
			"/tmp/events.jsonl",
			std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
			"appending event",
		);

		let rendered = err.to_string();
		assert!(rendered.contains("(appending event)"));
		assert!(rendered.contains("/tmp/events.jsonl"));
		assert!(!err.is_not_found());
	}
}
