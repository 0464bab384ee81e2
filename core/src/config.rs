//! Core configuration, stored as versioned JSON in the data directory.

use std::{
	num::NonZeroUsize,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tracing::{info, warn};
use yaba_utils::error::FileIOError;

pub const CONFIG_FILE_NAME: &str = "yaba.json";

/// Latest schema version. v0 predates the `compaction` section.
pub const CONFIG_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("malformed config <path='{}'>: {source}", .path.display())]
	Malformed {
		path: PathBuf,
		source: serde_json::Error,
	},
	#[error("config version {found} is newer than the supported version {supported}", supported = CONFIG_VERSION)]
	UnsupportedVersion { found: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreConfig {
	/// Config schema version
	pub version: u32,
	pub data_dir: PathBuf,
	/// Default `tracing` directive, `RUST_LOG` takes precedence
	pub log_level: String,
	#[serde(default)]
	pub queue: QueueConfig,
	#[serde(default)]
	pub compaction: CompactionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
	/// Defaults to the available parallelism when absent
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_concurrency: Option<NonZeroUsize>,
	pub stall_warning_secs: u64,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			max_concurrency: None,
			stall_warning_secs: yaba_operation_queue::DEFAULT_STALL_WARNING.as_secs(),
		}
	}
}

impl QueueConfig {
	#[must_use]
	pub fn max_concurrency(&self) -> NonZeroUsize {
		self.max_concurrency
			.unwrap_or_else(yaba_operation_queue::default_concurrency)
	}

	#[must_use]
	pub const fn stall_warning(&self) -> Duration {
		Duration::from_secs(self.stall_warning_secs)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionConfig {
	pub max_event_count: usize,
	pub compact_on_start: bool,
}

impl Default for CompactionConfig {
	fn default() -> Self {
		Self {
			max_event_count: 10_000,
			compact_on_start: true,
		}
	}
}

impl CoreConfig {
	#[must_use]
	pub fn default_with_dir(data_dir: impl Into<PathBuf>) -> Self {
		Self {
			version: CONFIG_VERSION,
			data_dir: data_dir.into(),
			log_level: "info".to_string(),
			queue: QueueConfig::default(),
			compaction: CompactionConfig::default(),
		}
	}

	/// Loads `yaba.json` from `data_dir`, migrating older versions in place, or creates it with
	/// defaults.
	pub async fn load_or_create(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();
		let path = data_dir.join(CONFIG_FILE_NAME);

		let bytes = match fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(path = %path.display(), "No config found, creating default;");
				let config = Self::default_with_dir(data_dir);
				config.save().await?;
				return Ok(config);
			}
			Err(e) => return Err(FileIOError::from((&path, e, "Failed to read config")).into()),
		};

		let malformed = |source: serde_json::Error| ConfigError::Malformed {
			path: path.clone(),
			source,
		};

		let mut raw = serde_json::from_slice::<Map<String, Value>>(&bytes).map_err(malformed)?;
		let found = raw
			.get("version")
			.and_then(Value::as_u64)
			.and_then(|v| u32::try_from(v).ok())
			.unwrap_or(0);

		if found > CONFIG_VERSION {
			return Err(ConfigError::UnsupportedVersion { found });
		}

		let migrated = found < CONFIG_VERSION;
		if migrated {
			info!(from = found, to = CONFIG_VERSION, "Migrating config;");
			migrate(found, &mut raw);
		}

		let config = serde_json::from_value::<Self>(Value::Object(raw)).map_err(malformed)?;

		if migrated {
			config.save().await?;
		}

		Ok(config)
	}

	pub async fn save(&self) -> Result<(), ConfigError> {
		fs::create_dir_all(&self.data_dir).await.map_err(|e| {
			FileIOError::from((&self.data_dir, e, "Failed to create data directory"))
		})?;

		let path = self.data_dir.join(CONFIG_FILE_NAME);
		let bytes = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Malformed {
			path: path.clone(),
			source,
		})?;

		fs::write(&path, bytes)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to write config")).into())
	}

	/// Where the entity documents live.
	#[must_use]
	pub fn library_dir(&self) -> PathBuf {
		self.data_dir.join("library")
	}

	/// Where the change log lives.
	#[must_use]
	pub fn sync_dir(&self) -> PathBuf {
		self.data_dir.join("sync")
	}
}

fn migrate(from: u32, raw: &mut Map<String, Value>) {
	for version in from..CONFIG_VERSION {
		if version == 0 {
			raw.entry("compaction")
				.or_insert_with(|| json!(CompactionConfig::default()));
			raw.entry("log_level").or_insert_with(|| json!("info"));
		}
	}

	raw.insert("version".to_string(), json!(CONFIG_VERSION));
}
