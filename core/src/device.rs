//! Identity of the replica running this process.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;
use yaba_sync::DeviceId;
use yaba_utils::error::FileIOError;

pub const DEVICE_CONFIG_FILE_NAME: &str = "device.json";

#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("malformed device config <path='{}'>: {source}", .path.display())]
	Malformed {
		path: PathBuf,
		source: serde_json::Error,
	},
}

/// Provides the id stamped on every locally recorded event.
pub trait DeviceIdentity: Send + Sync {
	fn current_device_id(&self) -> DeviceId;
}

/// A fixed id, for replicas whose identity is managed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDevice(pub DeviceId);

impl DeviceIdentity for StaticDevice {
	fn current_device_id(&self) -> DeviceId {
		self.0.clone()
	}
}

/// Device identity persisted next to the data, generated on first run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
	pub id: Uuid,
	/// User-friendly device name
	pub name: String,
	pub created_at: DateTime<Utc>,
	/// Version of the core that created this config
	pub version: String,
}

impl DeviceConfig {
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			name: name.into(),
			created_at: Utc::now(),
			version: env!("CARGO_PKG_VERSION").to_string(),
		}
	}

	pub async fn load_or_create(data_dir: impl AsRef<Path>) -> Result<Self, DeviceError> {
		let data_dir = data_dir.as_ref();

		if let Some(config) = Self::load_from(data_dir).await? {
			return Ok(config);
		}

		let config = Self::new(std::env::consts::OS);
		config.save_to(data_dir).await?;
		info!(device_id = %config.id, "Initialized new device identity;");

		Ok(config)
	}

	/// `None` when this data directory has no device yet.
	pub async fn load_from(data_dir: impl AsRef<Path>) -> Result<Option<Self>, DeviceError> {
		let path = data_dir.as_ref().join(DEVICE_CONFIG_FILE_NAME);

		match fs::read(&path).await {
			Ok(bytes) => serde_json::from_slice(&bytes)
				.map(Some)
				.map_err(|source| DeviceError::Malformed { path, source }),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FileIOError::from((&path, e, "Failed to read device config")).into()),
		}
	}

	pub async fn save_to(&self, data_dir: impl AsRef<Path>) -> Result<(), DeviceError> {
		let data_dir = data_dir.as_ref();
		fs::create_dir_all(data_dir)
			.await
			.map_err(|e| FileIOError::from((data_dir, e, "Failed to create data directory")))?;

		let path = data_dir.join(DEVICE_CONFIG_FILE_NAME);
		let bytes = serde_json::to_vec_pretty(self).map_err(|source| DeviceError::Malformed {
			path: path.clone(),
			source,
		})?;

		fs::write(&path, bytes)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to write device config")).into())
	}
}

impl DeviceIdentity for DeviceConfig {
	fn current_device_id(&self) -> DeviceId {
		DeviceId::from(self.id)
	}
}
