use std::collections::{BTreeMap, HashSet};

use tracing::{info, instrument, trace};
use uuid::Uuid;
use yaba_sync::ObjectType;

use crate::store::{read_documents, EntityStore};

use super::{change_log::LogEntry, ChangeLog, ChangeLogError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
	pub examined_objects: usize,
	pub removed_events: usize,
}

impl ChangeLog {
	/// Runs [`ChangeLog::compact`] only once the log holds more than `max_event_count` events.
	pub async fn compact_if_needed(
		&self,
		store: &dyn EntityStore,
		max_event_count: usize,
	) -> Result<Option<CompactionReport>, ChangeLogError> {
		let count = self.event_count().await;
		if count <= max_event_count {
			trace!(count, max_event_count, "Change log below compaction threshold;");
			return Ok(None);
		}

		self.compact(store).await.map(Some)
	}

	/// Drops history that is no longer needed:
	/// - every event of a live object whose documents dominate or equal all of its event clocks,
	///   once every registered peer acknowledged all of them. Without registered peers nothing
	///   was shipped yet, so live objects keep their whole history;
	/// - every non DELETE event of a tombstoned object. DELETE events are kept, they are the only
	///   way other replicas learn about the deletion.
	///
	/// Events appended while the store is being inspected are never dropped.
	#[instrument(skip_all, err)]
	pub async fn compact(&self, store: &dyn EntityStore) -> Result<CompactionReport, ChangeLogError> {
		let acknowledged = self.acknowledged_by_all().await;

		let mut per_object = BTreeMap::<Uuid, (ObjectType, Vec<LogEntry>)>::new();
		for entry in self.entries().await {
			per_object
				.entry(entry.event.object_id)
				.or_insert_with(|| (entry.event.object_type, vec![]))
				.1
				.push(entry);
		}

		let examined_objects = per_object.len();
		let mut doomed = HashSet::new();
		let mut unshipped_objects = 0;

		for (object_id, (object_type, entries)) in per_object {
			if store.is_deleted(object_type, object_id).await? {
				doomed.extend(
					entries
						.iter()
						.filter(|entry| !entry.event.is_delete())
						.map(|entry| entry.event.event_id),
				);
				continue;
			}

			let shipped = acknowledged
				.is_some_and(|acknowledged| entries.iter().all(|entry| entry.seq <= acknowledged));
			if !shipped {
				unshipped_objects += 1;
				continue;
			}

			let documents = read_documents(store, object_type, object_id).await?;
			if documents.is_empty() {
				// Nothing on disk to stand in for the history
				continue;
			}

			let snapshot_covers_history = entries.iter().all(|LogEntry { event, .. }| {
				!event.is_delete()
					&& documents
						.get(&event.file_target)
						.is_some_and(|doc| doc.clock.dominates_or_equals(&event.clock))
			});

			if snapshot_covers_history {
				doomed.extend(entries.iter().map(|entry| entry.event.event_id));
			}
		}

		if unshipped_objects > 0 {
			trace!(unshipped_objects, "Keeping history peers haven't acknowledged;");
		}

		let removed_events = if doomed.is_empty() {
			0
		} else {
			self.retain(|event| !doomed.contains(&event.event_id))
				.await?
		};

		info!(examined_objects, removed_events, "Compacted change log;");

		Ok(CompactionReport {
			examined_objects,
			removed_events,
		})
	}
}
