use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use yaba_sync::ObjectType;

use super::{CacheError, CacheProjector, CachedEntity};

/// Keeps the latest projection of every live object in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
	entities: RwLock<HashMap<(ObjectType, Uuid), CachedEntity>>,
}

impl MemoryCache {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn get(&self, object_type: ObjectType, object_id: Uuid) -> Option<CachedEntity> {
		self.entities
			.read()
			.await
			.get(&(object_type, object_id))
			.cloned()
	}

	pub async fn contains(&self, object_type: ObjectType, object_id: Uuid) -> bool {
		self.entities
			.read()
			.await
			.contains_key(&(object_type, object_id))
	}

	pub async fn ids(&self, object_type: ObjectType) -> Vec<Uuid> {
		let mut ids = self
			.entities
			.read()
			.await
			.keys()
			.filter(|(ty, _)| *ty == object_type)
			.map(|(_, id)| *id)
			.collect::<Vec<_>>();
		ids.sort_unstable();
		ids
	}

	pub async fn len(&self) -> usize {
		self.entities.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entities.read().await.is_empty()
	}

	pub async fn clear(&self) {
		self.entities.write().await.clear();
	}
}

#[async_trait]
impl CacheProjector for MemoryCache {
	async fn upsert(&self, entity: CachedEntity) -> Result<(), CacheError> {
		self.entities
			.write()
			.await
			.insert((entity.object_type, entity.object_id), entity);
		Ok(())
	}

	async fn delete_by_ids(&self, object_type: ObjectType, ids: &[Uuid]) -> Result<(), CacheError> {
		let mut entities = self.entities.write().await;
		for id in ids {
			entities.remove(&(object_type, *id));
		}
		Ok(())
	}

	async fn clear_all(&self) -> Result<(), CacheError> {
		self.clear().await;
		Ok(())
	}
}
