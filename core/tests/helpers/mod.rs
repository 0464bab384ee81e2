//! Shared fixtures for the core integration tests.

#![allow(dead_code)]

use std::{
	path::Path,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use uuid::Uuid;
use yaba_core::{
	cache::MemoryCache,
	config::CoreConfig,
	crdt::{DeviceId, Document, FileTarget, ObjectType, Tombstone},
	device::StaticDevice,
	store::{EntityStore, FsEntityStore, StoreError},
	sync::IngestReport,
	Node,
};

pub struct TestNode {
	pub node: Node,
	pub cache: Arc<MemoryCache>,
}

pub async fn start_node(data_dir: &Path, device: &str) -> TestNode {
	start_node_with(CoreConfig::default_with_dir(data_dir), device).await
}

pub async fn start_node_with(config: CoreConfig, device: &str) -> TestNode {
	let cache = Arc::new(MemoryCache::new());
	let node = Node::start(config, &StaticDevice(DeviceId::from(device)), cache.clone())
		.await
		.unwrap();

	TestNode { node, cache }
}

/// Hands `to` every event it hasn't acknowledged from `from`, then acknowledges them, like a
/// transport would.
pub async fn deliver(from: &Node, to: &Node) -> IngestReport {
	let batch = from.ingester().export_for(to.device_id()).await.unwrap();
	let report = to.ingester().ingest_batch(&batch.bytes).await.unwrap();
	from.ingester()
		.acknowledge(to.device_id(), batch.up_to)
		.await
		.unwrap();
	report
}

pub async fn read_meta(node: &Node, object_type: ObjectType, id: Uuid) -> Document {
	node.store()
		.read_document(object_type, id, FileTarget::Meta)
		.await
		.unwrap()
		.unwrap()
}

/// Filesystem store whose reads or writes can be switched off.
pub struct FailingStore {
	inner: FsEntityStore,
	fail_reads: AtomicBool,
	fail_writes: AtomicBool,
}

impl FailingStore {
	pub async fn open(root: &Path) -> Self {
		Self {
			inner: FsEntityStore::open(root).await.unwrap(),
			fail_reads: AtomicBool::new(false),
			fail_writes: AtomicBool::new(false),
		}
	}

	pub fn fail_reads(&self, fail: bool) {
		self.fail_reads.store(fail, Ordering::SeqCst);
	}

	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	fn check_read(&self) -> Result<(), StoreError> {
		if self.fail_reads.load(Ordering::SeqCst) {
			return Err(StoreError::Unavailable("reads disabled".to_string()));
		}
		Ok(())
	}

	fn check_write(&self) -> Result<(), StoreError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(StoreError::Unavailable("writes disabled".to_string()));
		}
		Ok(())
	}
}

#[async_trait]
impl EntityStore for FailingStore {
	async fn read_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
	) -> Result<Option<Document>, StoreError> {
		self.check_read()?;
		self.inner.read_document(object_type, object_id, target).await
	}

	async fn write_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
		document: &Document,
	) -> Result<(), StoreError> {
		self.check_write()?;
		self.inner
			.write_document(object_type, object_id, target, document)
			.await
	}

	async fn remove_document(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
		target: FileTarget,
	) -> Result<(), StoreError> {
		self.check_write()?;
		self.inner
			.remove_document(object_type, object_id, target)
			.await
	}

	async fn write_tombstone(&self, tombstone: &Tombstone) -> Result<(), StoreError> {
		self.check_write()?;
		self.inner.write_tombstone(tombstone).await
	}

	async fn read_tombstone(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
	) -> Result<Option<Tombstone>, StoreError> {
		self.check_read()?;
		self.inner.read_tombstone(object_type, object_id).await
	}

	async fn remove_tombstone(
		&self,
		object_type: ObjectType,
		object_id: Uuid,
	) -> Result<(), StoreError> {
		self.check_write()?;
		self.inner.remove_tombstone(object_type, object_id).await
	}

	async fn scan_all_ids(&self, object_type: ObjectType) -> Result<Vec<Uuid>, StoreError> {
		self.check_read()?;
		self.inner.scan_all_ids(object_type).await
	}
}
