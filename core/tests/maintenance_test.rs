mod helpers;

use helpers::{deliver, start_node, start_node_with};

use std::collections::BTreeMap;

use tempfile::tempdir;
use tracing_test::traced_test;
use uuid::Uuid;
use yaba_core::{
	cache::{CacheProjector, CachedEntity},
	config::CoreConfig,
	crdt::{EventKind, ObjectType},
	entities::{HighlightAnchor, NewBookmark, NewHighlight, NewTag, PINNED_TAG_ID},
	store::EntityStore,
};

#[tokio::test]
#[traced_test]
async fn compaction_drops_acknowledged_history_but_keeps_deletions() {
	let dir = tempdir().unwrap();
	let a = start_node(&dir.path().join("a"), "A").await;
	let b = start_node(&dir.path().join("b"), "B").await;

	let tag = a.node.tags().create(NewTag::named("draft")).await.unwrap();
	a.node.tags().rename(tag.id, "final").await.unwrap();

	let gone = a
		.node
		.bookmarks()
		.create(NewBookmark::note("scratch"))
		.await
		.unwrap();
	a.node.bookmarks().delete(gone.id).await.unwrap();

	deliver(&a.node, &b.node).await;

	let report = a.node.compact().await.unwrap();
	assert!(report.removed_events >= 3);

	assert!(a.node.change_log().events_for_object(tag.id).await.is_empty());
	assert!(a.node.change_log().events_for_object(PINNED_TAG_ID).await.is_empty());

	let kept = a.node.change_log().events_for_object(gone.id).await;
	assert_eq!(kept.len(), 1);
	assert_eq!(kept[0].kind, EventKind::Delete);

	// The store still carries the state the history described
	assert_eq!(a.node.tags().get(tag.id).await.unwrap().unwrap().label, "final");
	assert!(a.node.store().is_deleted(ObjectType::Bookmark, gone.id).await.unwrap());

	assert_eq!(a.node.compact().await.unwrap().removed_events, 0);
}

#[tokio::test]
#[traced_test]
async fn unshipped_history_survives_compaction() {
	let dir = tempdir().unwrap();
	let mut config = CoreConfig::default_with_dir(dir.path().join("a"));
	config.compaction.max_event_count = 0;

	let a = start_node_with(config.clone(), "A").await;
	let b = start_node(&dir.path().join("b"), "B").await;
	deliver(&a.node, &b.node).await;

	// Created after B's last acknowledgement
	let tag = a.node.tags().create(NewTag::named("rust")).await.unwrap();
	a.node.compact().await.unwrap();
	a.node.shutdown().await;

	let a = start_node_with(config, "A").await;
	assert!(!a.node.change_log().events_for_object(tag.id).await.is_empty());

	let report = deliver(&a.node, &b.node).await;
	assert!(report.stored_events >= 1);
	assert_eq!(b.node.tags().get(tag.id).await.unwrap().unwrap().label, "rust");

	// Once B has it, the history can go
	a.node.compact().await.unwrap();
	assert!(a.node.change_log().events_for_object(tag.id).await.is_empty());
}

#[tokio::test]
async fn without_peers_live_history_is_kept() {
	let dir = tempdir().unwrap();
	let a = start_node(dir.path(), "A").await;
	a.node.tags().create(NewTag::named("local")).await.unwrap();
	let before = a.node.change_log().event_count().await;

	let report = a.node.compact().await.unwrap();

	assert_eq!(report.removed_events, 0);
	assert_eq!(a.node.change_log().event_count().await, before);
}

#[tokio::test]
async fn large_log_is_compacted_on_start() {
	let dir = tempdir().unwrap();
	let a = start_node(&dir.path().join("a"), "A").await;
	let b = start_node(&dir.path().join("b"), "B").await;
	for label in ["one", "two", "three"] {
		a.node.tags().create(NewTag::named(label)).await.unwrap();
	}
	deliver(&a.node, &b.node).await;
	let before = a.node.change_log().event_count().await;
	a.node.shutdown().await;

	let mut config = CoreConfig::default_with_dir(dir.path().join("a"));
	config.compaction.max_event_count = 2;
	let a = start_node_with(config, "A").await;

	assert!(a.node.change_log().event_count().await < before);
	assert_eq!(a.node.change_log().event_count().await, 0);
}

#[tokio::test]
async fn cache_is_rebuilt_from_the_store() {
	let dir = tempdir().unwrap();
	let a = start_node(dir.path(), "A").await;

	let bookmark = a
		.node
		.bookmarks()
		.create(NewBookmark::link("Docs", "https://docs.rs"))
		.await
		.unwrap();
	let tag = a.node.tags().create(NewTag::named("gone")).await.unwrap();
	a.node.tags().delete(tag.id).await.unwrap();

	a.cache.clear().await;
	assert!(a.cache.is_empty().await);

	// Left behind by an object the store no longer knows
	let stale = Uuid::new_v4();
	a.cache
		.upsert(CachedEntity::new(ObjectType::Folder, stale, BTreeMap::new()))
		.await
		.unwrap();

	let projected = a.node.rebuild_cache().await.unwrap();

	let cached = a.cache.get(ObjectType::Bookmark, bookmark.id).await.unwrap();
	assert_eq!(cached.documents.len(), 2);
	assert!(a.cache.contains(ObjectType::Tag, PINNED_TAG_ID).await);
	assert!(!a.cache.contains(ObjectType::Tag, tag.id).await);
	assert!(!a.cache.contains(ObjectType::Folder, stale).await);
	assert_eq!(a.cache.len().await, projected - 1);
}

#[tokio::test]
#[traced_test]
async fn highlight_note_can_be_cleared() {
	let dir = tempdir().unwrap();
	let a = start_node(dir.path(), "A").await;

	let bookmark = a
		.node
		.bookmarks()
		.create(NewBookmark::note("Paper"))
		.await
		.unwrap();
	let highlight = a
		.node
		.highlights()
		.create(NewHighlight {
			bookmark_id: bookmark.id,
			content_version: 1,
			start_anchor: HighlightAnchor {
				block_id: "p1".to_string(),
				inline_path: vec![0],
				offset: 4,
			},
			end_anchor: HighlightAnchor {
				block_id: "p1".to_string(),
				inline_path: vec![0],
				offset: 12,
			},
			color_role: 2,
			note: Some("remember".to_string()),
		})
		.await
		.unwrap();

	a.node
		.highlights()
		.update_note(highlight.id, None)
		.await
		.unwrap();

	let stored = a.node.highlights().get(highlight.id).await.unwrap().unwrap();
	assert_eq!(stored.note, None);
	assert_eq!(stored.end_anchor.offset, 12);
}
