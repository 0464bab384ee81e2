use std::{future::Future, sync::Arc};

use uuid::Uuid;
use yaba_operation_queue::{OperationKey, OperationQueue};
use yaba_sync::{DeviceId, ObjectType};

use crate::{cache::CacheProjector, store::EntityStore, sync::ChangeLog, Error};

/// Handles shared by every operation of a node. Cheap to clone.
///
/// The store and the log must only be mutated from an operation running in the lane of the object
/// being mutated, see [`NodeContext::run_for_object`].
#[derive(Clone)]
pub struct NodeContext {
	pub device_id: DeviceId,
	pub store: Arc<dyn EntityStore>,
	pub log: Arc<ChangeLog>,
	pub cache: Arc<dyn CacheProjector>,
	pub queue: OperationQueue,
}

impl NodeContext {
	/// Runs `op` in the lane of one object and waits for its result.
	pub async fn run_for_object<F, Fut, T>(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		op: F,
	) -> Result<T, Error>
	where
		F: FnOnce(Self) -> Fut,
		Fut: Future<Output = Result<T, Error>> + Send + 'static,
		T: Send + 'static,
	{
		self.queue
			.enqueue_and_await(OperationKey::object(object_type, object_id), op(self.clone()))
			.await
	}

	/// Queues `op` in the lane of one object without waiting for it. A failure is only logged.
	pub fn spawn_for_object<F, Fut>(&self, object_type: ObjectType, object_id: Uuid, op: F)
	where
		F: FnOnce(Self) -> Fut,
		Fut: Future<Output = Result<(), Error>> + Send + 'static,
	{
		self.queue
			.enqueue(OperationKey::object(object_type, object_id), op(self.clone()));
	}
}

impl std::fmt::Debug for NodeContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NodeContext")
			.field("device_id", &self.device_id)
			.field("log", &self.log.path())
			.field("queue", &self.queue)
			.finish_non_exhaustive()
	}
}
