use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::{
	fs::{self, File, OpenOptions},
	io::AsyncWriteExt,
	sync::{broadcast, Mutex},
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use yaba_sync::{
	ChangeEvent, DeviceId, EventFactory, FieldChanges, FileTarget, ObjectType, Recorded,
	VectorClock,
};
use yaba_utils::error::FileIOError;

use crate::store::StoreError;

pub const EVENTS_FILE_NAME: &str = "events.jsonl";
pub const PEERS_FILE_NAME: &str = "peers.json";

const SUBSCRIBERS_CAPACITY: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum ChangeLogError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to serialize change event: {0}")]
	Serialize(#[from] serde_json::Error),
	#[error("store error during log maintenance: {0}")]
	Store(#[from] StoreError),
}

/// Append-only history of every change this replica knows about, persisted as JSON lines.
///
/// Local events are built through [`EventFactory`], stamped with this device id. Every append is
/// flushed to disk before the event becomes visible to readers.
///
/// Each stored event gets a local sequence number. Peers acknowledge how far they received the
/// log, and history is only ever compacted once every known peer acknowledged it.
pub struct ChangeLog {
	device_id: DeviceId,
	path: PathBuf,
	peers_path: PathBuf,
	inner: Mutex<LogInner>,
	events_tx: broadcast::Sender<ChangeEvent>,
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct LogEntry {
	pub(super) seq: u64,
	pub(super) event: ChangeEvent,
}

struct LogInner {
	entries: Vec<LogEntry>,
	known_ids: HashSet<Uuid>,
	next_seq: u64,
	/// Highest sequence number each peer confirmed having received
	acknowledged: BTreeMap<DeviceId, u64>,
	file: File,
}

/// Events a peer hasn't acknowledged yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbox {
	pub events: Vec<ChangeEvent>,
	/// Sequence number to acknowledge once `events` were delivered
	pub up_to: u64,
}

impl EventFactory for ChangeLog {
	fn device_id(&self) -> &DeviceId {
		&self.device_id
	}
}

async fn open_for_append(path: &Path) -> Result<File, ChangeLogError> {
	OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.await
		.map_err(|e| FileIOError::from((path, e, "Failed to open change log for appending")).into())
}

async fn load_entries(path: &Path) -> Result<Vec<LogEntry>, ChangeLogError> {
	let contents = match fs::read_to_string(path).await {
		Ok(contents) => contents,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
		Err(e) => return Err(FileIOError::from((path, e, "Failed to read change log")).into()),
	};

	let mut seen = HashSet::new();
	let mut entries = vec![];

	for (idx, line) in contents.lines().enumerate() {
		if line.trim().is_empty() {
			continue;
		}

		match serde_json::from_str::<LogEntry>(line) {
			Ok(entry) => {
				if seen.insert(entry.event.event_id) {
					entries.push(entry);
				}
			}
			// A torn write from a crash only ever leaves a partial last line
			Err(e) => warn!(line = idx + 1, ?e, "Skipping malformed change log entry;"),
		}
	}

	Ok(entries)
}

async fn load_acknowledged(path: &Path) -> Result<BTreeMap<DeviceId, u64>, ChangeLogError> {
	match fs::read(path).await {
		Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
		Err(e) => Err(FileIOError::from((path, e, "Failed to read peer acknowledgements")).into()),
	}
}

fn encode_lines<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Result<Vec<u8>, ChangeLogError> {
	let mut buf = vec![];
	for entry in entries {
		serde_json::to_writer(&mut buf, entry)?;
		buf.push(b'\n');
	}
	Ok(buf)
}

/// Replaces `path` with `bytes` through a synced temporary file.
async fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), ChangeLogError> {
	let tmp_path = path.with_extension("tmp");

	let mut tmp = File::create(&tmp_path)
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to create temporary file")))?;
	tmp.write_all(bytes)
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to write temporary file")))?;
	tmp.sync_all()
		.await
		.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to sync temporary file")))?;
	drop(tmp);

	fs::rename(&tmp_path, path)
		.await
		.map_err(|e| FileIOError::from((path, e, "Failed to replace file")).into())
}

impl ChangeLog {
	/// Opens (or creates) `events.jsonl` inside `dir`.
	pub async fn open(dir: impl AsRef<Path>, device_id: DeviceId) -> Result<Self, ChangeLogError> {
		let dir = dir.as_ref();
		fs::create_dir_all(dir)
			.await
			.map_err(|e| FileIOError::from((dir, e, "Failed to create change log directory")))?;

		let path = dir.join(EVENTS_FILE_NAME);
		let peers_path = dir.join(PEERS_FILE_NAME);
		let entries = load_entries(&path).await?;
		let acknowledged = load_acknowledged(&peers_path).await?;
		let file = open_for_append(&path).await?;

		// Sequence numbers a peer acknowledged are never handed out again, even when compaction
		// dropped the entries that carried them.
		let next_seq = entries
			.iter()
			.map(|entry| entry.seq)
			.chain(acknowledged.values().copied())
			.max()
			.unwrap_or(0) + 1;

		debug!(
			events = entries.len(),
			peers = acknowledged.len(),
			path = %path.display(),
			"Loaded change log;"
		);

		Ok(Self {
			device_id,
			path,
			peers_path,
			inner: Mutex::new(LogInner {
				known_ids: entries.iter().map(|entry| entry.event.event_id).collect(),
				entries,
				next_seq,
				acknowledged,
				file,
			}),
			events_tx: broadcast::channel(SUBSCRIBERS_CAPACITY).0,
		})
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Records the creation of a document, clock is `base_clock` bumped for this device.
	#[instrument(skip(self, payload, base_clock), err)]
	pub async fn record_create(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		payload: FieldChanges,
		base_clock: &VectorClock,
	) -> Result<ChangeEvent, ChangeLogError> {
		let event = self.create_event(object_id, object_type, file_target, payload, base_clock);
		self.append(event).await
	}

	#[instrument(skip(self, changes, current_clock), err)]
	pub async fn record_update(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		changes: FieldChanges,
		current_clock: &VectorClock,
	) -> Result<Recorded<ChangeEvent>, ChangeLogError> {
		match self.update_event(object_id, object_type, file_target, changes, current_clock) {
			Recorded::Applied(event) => self.append(event).await.map(Recorded::Applied),
			Recorded::Skipped(reason) => Ok(Recorded::Skipped(reason)),
		}
	}

	/// Like [`ChangeLog::record_update`], for secondary documents and fine grained changes.
	#[instrument(skip(self, changes, current_clock), err)]
	pub async fn record_field_changes(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		changes: FieldChanges,
		current_clock: &VectorClock,
	) -> Result<Recorded<ChangeEvent>, ChangeLogError> {
		match self.field_change_event(object_id, object_type, file_target, changes, current_clock) {
			Recorded::Applied(event) => self.append(event).await.map(Recorded::Applied),
			Recorded::Skipped(reason) => Ok(Recorded::Skipped(reason)),
		}
	}

	/// The caller is expected to write a tombstone carrying the returned event clock.
	#[instrument(skip(self, current_clock), err)]
	pub async fn record_delete(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		current_clock: &VectorClock,
	) -> Result<ChangeEvent, ChangeLogError> {
		let event = self.delete_event(object_id, object_type, current_clock);
		self.append(event).await
	}

	async fn append(&self, event: ChangeEvent) -> Result<ChangeEvent, ChangeLogError> {
		self.append_local(vec![event.clone()]).await?;
		Ok(event)
	}

	/// Appends locally built events with a single write and flush, so either all of them are
	/// recorded or none is.
	pub(crate) async fn append_local(
		&self,
		events: Vec<ChangeEvent>,
	) -> Result<Vec<ChangeEvent>, ChangeLogError> {
		if events.is_empty() {
			return Ok(events);
		}

		let mut inner = self.inner.lock().await;
		let entries = inner.sequence(events.iter().cloned());
		inner.write_durably(&self.path, &encode_lines(&entries)?).await?;
		inner.commit(entries);
		drop(inner);

		for event in &events {
			debug!(?event, "Recorded change event;");
			// Nobody listening is fine
			self.events_tx.send(event.clone()).ok();
		}

		Ok(events)
	}

	/// Stores events received from another replica, skipping the ones already known. Returns the
	/// newly stored events, which are not re-broadcast to subscribers.
	pub async fn append_remote(
		&self,
		events: impl IntoIterator<Item = ChangeEvent> + Send,
	) -> Result<Vec<ChangeEvent>, ChangeLogError> {
		let mut inner = self.inner.lock().await;

		let mut batch_ids = HashSet::new();
		let fresh = events
			.into_iter()
			.filter(|event| {
				!inner.known_ids.contains(&event.event_id) && batch_ids.insert(event.event_id)
			})
			.collect::<Vec<_>>();

		if fresh.is_empty() {
			return Ok(fresh);
		}

		let entries = inner.sequence(fresh.iter().cloned());
		inner.write_durably(&self.path, &encode_lines(&entries)?).await?;
		inner.commit(entries);

		debug!(count = fresh.len(), "Stored remote change events;");

		Ok(fresh)
	}

	pub async fn contains(&self, event_id: Uuid) -> bool {
		self.inner.lock().await.known_ids.contains(&event_id)
	}

	pub async fn events_for_object(&self, object_id: Uuid) -> Vec<ChangeEvent> {
		self.filtered(|event| event.object_id == object_id).await
	}

	/// Events stamped strictly after `timestamp_ms`.
	pub async fn events_since(&self, timestamp_ms: i64) -> Vec<ChangeEvent> {
		self.filtered(|event| event.timestamp > timestamp_ms).await
	}

	pub async fn all_events(&self) -> Vec<ChangeEvent> {
		self.filtered(|_| true).await
	}

	pub(super) async fn entries(&self) -> Vec<LogEntry> {
		self.inner.lock().await.entries.clone()
	}

	pub async fn event_count(&self) -> usize {
		self.inner.lock().await.entries.len()
	}

	/// Starts tracking `peer`, which holds back compaction until it acknowledged the history.
	/// Registering a known peer changes nothing.
	pub async fn register_peer(&self, peer: &DeviceId) -> Result<(), ChangeLogError> {
		let mut inner = self.inner.lock().await;
		if inner.acknowledged.contains_key(peer) {
			return Ok(());
		}
		inner.acknowledged.insert(peer.clone(), 0);
		self.persist_acknowledged(&inner.acknowledged).await?;

		debug!(%peer, "Registered sync peer;");

		Ok(())
	}

	/// Every event stored after what `peer` acknowledged, registering it when unknown.
	pub async fn outbox(&self, peer: &DeviceId) -> Result<Outbox, ChangeLogError> {
		self.register_peer(peer).await?;

		let inner = self.inner.lock().await;
		let acknowledged = inner.acknowledged.get(peer).copied().unwrap_or_default();

		Ok(Outbox {
			events: inner
				.entries
				.iter()
				.filter(|entry| entry.seq > acknowledged)
				.map(|entry| entry.event.clone())
				.collect(),
			up_to: inner.next_seq - 1,
		})
	}

	/// Records that `peer` received everything up to `up_to`. Acknowledgements never move back.
	#[instrument(skip(self), err)]
	pub async fn acknowledge(&self, peer: &DeviceId, up_to: u64) -> Result<(), ChangeLogError> {
		let mut inner = self.inner.lock().await;
		// Nothing past the last stored entry can have been delivered
		let up_to = up_to.min(inner.next_seq - 1);
		if inner
			.acknowledged
			.get(peer)
			.is_some_and(|current| *current >= up_to)
		{
			return Ok(());
		}

		inner.acknowledged.insert(peer.clone(), up_to);
		self.persist_acknowledged(&inner.acknowledged).await
	}

	/// Highest sequence number every registered peer acknowledged, `None` without peers.
	pub async fn acknowledged_by_all(&self) -> Option<u64> {
		self.inner.lock().await.acknowledged.values().copied().min()
	}

	async fn persist_acknowledged(
		&self,
		acknowledged: &BTreeMap<DeviceId, u64>,
	) -> Result<(), ChangeLogError> {
		replace_file(&self.peers_path, &serde_json::to_vec_pretty(acknowledged)?).await
	}

	/// Every object with at least one event.
	pub async fn object_ids(&self) -> Vec<(ObjectType, Uuid)> {
		self.inner
			.lock()
			.await
			.entries
			.iter()
			.map(|entry| (entry.event.object_type, entry.event.object_id))
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect()
	}

	pub async fn has_delete_event(&self, object_id: Uuid) -> bool {
		self.inner
			.lock()
			.await
			.entries
			.iter()
			.any(|entry| entry.event.object_id == object_id && entry.event.is_delete())
	}

	/// Receives every locally recorded event from now on.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
		self.events_tx.subscribe()
	}

	async fn filtered(&self, predicate: impl Fn(&ChangeEvent) -> bool) -> Vec<ChangeEvent> {
		self.inner
			.lock()
			.await
			.entries
			.iter()
			.filter(|entry| predicate(&entry.event))
			.map(|entry| entry.event.clone())
			.collect()
	}

	/// Keeps only the events matching `keep`, rewriting the file atomically. Returns how many
	/// events were dropped.
	pub(super) async fn retain(
		&self,
		keep: impl Fn(&ChangeEvent) -> bool + Send,
	) -> Result<usize, ChangeLogError> {
		let mut inner = self.inner.lock().await;

		let before = inner.entries.len();
		let kept = inner
			.entries
			.iter()
			.filter(|entry| keep(&entry.event))
			.cloned()
			.collect::<Vec<_>>();
		let removed = before - kept.len();

		if removed == 0 {
			return Ok(0);
		}

		replace_file(&self.path, &encode_lines(&kept)?).await?;

		inner.file = open_for_append(&self.path).await?;
		inner.known_ids = kept.iter().map(|entry| entry.event.event_id).collect();
		inner.entries = kept;

		Ok(removed)
	}
}

impl LogInner {
	/// Numbers `events` after everything stored so far. Nothing is committed until
	/// [`LogInner::commit`].
	fn sequence(&self, events: impl IntoIterator<Item = ChangeEvent>) -> Vec<LogEntry> {
		events
			.into_iter()
			.zip(self.next_seq..)
			.map(|(event, seq)| LogEntry { seq, event })
			.collect()
	}

	fn commit(&mut self, entries: Vec<LogEntry>) {
		for entry in entries {
			self.next_seq = self.next_seq.max(entry.seq + 1);
			self.known_ids.insert(entry.event.event_id);
			self.entries.push(entry);
		}
	}

	async fn write_durably(&mut self, path: &Path, bytes: &[u8]) -> Result<(), ChangeLogError> {
		self.file
			.write_all(bytes)
			.await
			.map_err(|e| FileIOError::from((path, e, "Failed to append to change log")))?;
		self.file
			.sync_data()
			.await
			.map_err(|e| FileIOError::from((path, e, "Failed to sync change log")).into())
	}
}
