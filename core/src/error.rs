use crate::{
	cache::CacheError, config::ConfigError, device::DeviceError, store::StoreError,
	sync::ChangeLogError,
};

use yaba_operation_queue::QueueError;
use uuid::Uuid;
use yaba_sync::{ClockError, ObjectType};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	ChangeLog(#[from] ChangeLogError),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	Cache(#[from] CacheError),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Device(#[from] DeviceError),
	#[error("malformed clock: {0}")]
	Clock(#[from] ClockError),
	#[error("event batch codec error: {0}")]
	Codec(#[from] yaba_sync::Error),
	#[error("object already exists <type='{object_type}', id='{object_id}'>")]
	AlreadyExists {
		object_type: ObjectType,
		object_id: Uuid,
	},
	#[error("failed to convert document <kind='{kind}'>: {source}")]
	Document {
		kind: &'static str,
		source: serde_json::Error,
	},
	#[error("failed to install tracing subscriber: {0}")]
	Logging(String),
}
