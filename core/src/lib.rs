//! The YABA sync core: a filesystem-is-truth store where every mutation is recorded as a causally
//! ordered event, so replicas that were edited apart can be merged without a central authority.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::sync::Arc;

use tracing::{info, warn};
use yaba_operation_queue::{OperationKey, OperationQueue};
use yaba_sync::DeviceId;

pub mod cache;
pub mod config;
pub mod device;
pub mod entities;
pub mod logging;
pub mod managers;
pub mod reconciler;
pub mod store;
pub mod sync;

mod context;
mod error;

pub use context::NodeContext;
pub use error::Error;

pub use yaba_operation_queue as operation_queue;
pub use yaba_sync as crdt;

use cache::CacheProjector;
use config::CoreConfig;
use device::DeviceIdentity;
use managers::{BookmarkManager, FolderManager, HighlightManager, TagManager};
use reconciler::HealingReport;
use store::{EntityStore, FsEntityStore};
use sync::{ChangeLog, CompactionReport, Ingester};

/// Lane of every change log maintenance operation.
const CHANGE_LOG_MAINTENANCE: &str = "change-log";

/// A running replica. Only returned once the startup repair of the system objects went through.
pub struct Node {
	config: CoreConfig,
	ctx: NodeContext,
	healing: HealingReport,
}

impl Node {
	/// Opens the filesystem store and the change log under `config.data_dir`.
	pub async fn start(
		config: CoreConfig,
		device: &dyn DeviceIdentity,
		cache: Arc<dyn CacheProjector>,
	) -> Result<Self, Error> {
		let store = Arc::new(FsEntityStore::open(config.library_dir()).await?);
		Self::start_with_store(config, device, store, cache).await
	}

	/// Like [`Node::start`], over any [`EntityStore`].
	pub async fn start_with_store(
		config: CoreConfig,
		device: &dyn DeviceIdentity,
		store: Arc<dyn EntityStore>,
		cache: Arc<dyn CacheProjector>,
	) -> Result<Self, Error> {
		let device_id = device.current_device_id();
		let log = Arc::new(ChangeLog::open(config.sync_dir(), device_id.clone()).await?);
		let queue = OperationQueue::new(
			config.queue.max_concurrency(),
			config.queue.stall_warning(),
		)?;

		let ctx = NodeContext {
			device_id,
			store,
			log,
			cache,
			queue,
		};

		if config.compaction.compact_on_start {
			if let Some(report) = ctx
				.log
				.compact_if_needed(&*ctx.store, config.compaction.max_event_count)
				.await?
			{
				info!(?report, "Compacted change log on start;");
			}
		}

		let healing = reconciler::perform_startup_self_healing(&ctx).await?;

		info!(
			device_id = %ctx.device_id,
			data_dir = %config.data_dir.display(),
			"Node started;"
		);

		Ok(Self {
			config,
			ctx,
			healing,
		})
	}

	#[must_use]
	pub const fn config(&self) -> &CoreConfig {
		&self.config
	}

	#[must_use]
	pub const fn device_id(&self) -> &DeviceId {
		&self.ctx.device_id
	}

	#[must_use]
	pub const fn context(&self) -> &NodeContext {
		&self.ctx
	}

	/// What the startup repair had to fix.
	#[must_use]
	pub const fn healing_report(&self) -> &HealingReport {
		&self.healing
	}

	#[must_use]
	pub fn store(&self) -> &Arc<dyn EntityStore> {
		&self.ctx.store
	}

	#[must_use]
	pub fn change_log(&self) -> &Arc<ChangeLog> {
		&self.ctx.log
	}

	#[must_use]
	pub const fn queue(&self) -> &OperationQueue {
		&self.ctx.queue
	}

	#[must_use]
	pub fn folders(&self) -> FolderManager {
		FolderManager::new(self.ctx.clone())
	}

	#[must_use]
	pub fn tags(&self) -> TagManager {
		TagManager::new(self.ctx.clone())
	}

	#[must_use]
	pub fn bookmarks(&self) -> BookmarkManager {
		BookmarkManager::new(self.ctx.clone())
	}

	#[must_use]
	pub fn highlights(&self) -> HighlightManager {
		HighlightManager::new(self.ctx.clone())
	}

	#[must_use]
	pub fn ingester(&self) -> Ingester {
		Ingester::new(self.ctx.clone())
	}

	/// Replaces the whole cache with a projection of the store.
	pub async fn rebuild_cache(&self) -> Result<usize, Error> {
		cache::rebuild_cache(&self.ctx).await
	}

	/// Compacts the change log, waiting for the result.
	pub async fn compact(&self) -> Result<CompactionReport, Error> {
		self.ctx
			.queue
			.enqueue_and_await(OperationKey::named(CHANGE_LOG_MAINTENANCE), {
				let ctx = self.ctx.clone();
				async move { ctx.log.compact(&*ctx.store).await.map_err(Error::from) }
			})
			.await
	}

	/// Compacts the change log in the background once it grew past the configured threshold.
	pub fn compact_in_background(&self) {
		let ctx = self.ctx.clone();
		let max_event_count = self.config.compaction.max_event_count;

		self.ctx
			.queue
			.enqueue(OperationKey::named(CHANGE_LOG_MAINTENANCE), async move {
				if let Some(report) = ctx.log.compact_if_needed(&*ctx.store, max_event_count).await? {
					info!(?report, "Compacted change log in the background;");
				}
				Ok::<_, Error>(())
			});
	}

	/// Waits for every queued operation to finish.
	pub async fn shutdown(self) {
		if self.ctx.queue.pending_count() > 0 {
			warn!(
				pending = self.ctx.queue.pending_count(),
				"Waiting for queued operations before shutting down;"
			);
		}
		self.ctx.queue.wait_idle().await;
		info!("Node shut down;");
	}
}

impl std::fmt::Debug for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Node")
			.field("config", &self.config)
			.field("ctx", &self.ctx)
			.finish_non_exhaustive()
	}
}
