//! Derived, disposable read model. Nothing here is authoritative: projection failures are logged
//! and never roll back a store mutation, and the whole cache can be rebuilt from the store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{error, info, instrument};
use uuid::Uuid;
use yaba_sync::{Document, FileTarget, ObjectState, ObjectType};

use crate::{context::NodeContext, store::load_state, Error};

mod memory;

pub use memory::MemoryCache;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
	#[error("cache projection failed: {0}")]
	Projection(String),
}

/// An object as handed to the cache, with every document it currently has.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntity {
	pub object_id: Uuid,
	pub object_type: ObjectType,
	pub documents: BTreeMap<FileTarget, Document>,
}

impl CachedEntity {
	#[must_use]
	pub const fn new(
		object_type: ObjectType,
		object_id: Uuid,
		documents: BTreeMap<FileTarget, Document>,
	) -> Self {
		Self {
			object_id,
			object_type,
			documents,
		}
	}

	#[must_use]
	pub fn primary(&self) -> Option<&Document> {
		self.documents.get(&self.object_type.primary_target())
	}
}

/// Implementations must be idempotent, the same entity can be projected many times.
#[async_trait]
pub trait CacheProjector: Send + Sync + 'static {
	async fn upsert(&self, entity: CachedEntity) -> Result<(), CacheError>;

	async fn delete_by_ids(&self, object_type: ObjectType, ids: &[Uuid]) -> Result<(), CacheError>;

	/// Drops every projected entity.
	async fn clear_all(&self) -> Result<(), CacheError>;
}

/// Best effort projection of an object's current state.
pub(crate) async fn project(
	cache: &dyn CacheProjector,
	object_type: ObjectType,
	object_id: Uuid,
	state: &ObjectState,
) {
	let res = match state {
		ObjectState::Live(documents) => {
			cache
				.upsert(CachedEntity::new(object_type, object_id, documents.clone()))
				.await
		}
		ObjectState::Deleted(_) => cache.delete_by_ids(object_type, &[object_id]).await,
	};

	if let Err(e) = res {
		error!(%object_type, %object_id, ?e, "Failed to project object to cache;");
	}
}

/// Drops the whole cache and re-projects every object in the store, each one inside its own
/// lane. Returns how many objects were projected.
///
/// Store failures abort the rebuild; cache failures only get logged, like any other projection.
#[instrument(skip_all, err)]
pub async fn rebuild_cache(ctx: &NodeContext) -> Result<usize, Error> {
	if let Err(e) = ctx.cache.clear_all().await {
		error!(?e, "Failed to clear cache before rebuilding it;");
	}

	let mut projected = 0;

	for object_type in ObjectType::ALL {
		for object_id in ctx.store.scan_all_ids(object_type).await? {
			let found = ctx
				.run_for_object(object_type, object_id, move |ctx| async move {
					let Some(state) = load_state(&*ctx.store, object_type, object_id).await? else {
						return Ok(false);
					};
					project(&*ctx.cache, object_type, object_id, &state).await;
					Ok(true)
				})
				.await?;

			projected += usize::from(found);
		}
	}

	info!(projected, "Rebuilt cache from entity store;");

	Ok(projected)
}
