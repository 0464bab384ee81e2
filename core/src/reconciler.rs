//! Startup repair of the system objects.
//!
//! A merge with another replica can tombstone, drop, or re-parent an object the product expects to
//! always exist. Each repair is recorded as a regular local event so it reaches the other replicas
//! and doesn't regress on the next sync.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{error, info, instrument, warn};
use yaba_sync::{Document, EventFactory, EventKind, FieldChanges, Recorded, Tombstone};

use crate::{
	cache::project,
	context::NodeContext,
	entities::{fields, SystemObject},
	managers::{change_fields, create_object},
	store::load_state,
	Error,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealingReport {
	/// Objects whose document was missing and got recreated
	pub recreated: Vec<SystemObject>,
	pub tombstones_removed: Vec<SystemObject>,
	/// Whether the uncategorized folder had to be moved back to the top level
	pub reparented: bool,
}

impl HealingReport {
	#[must_use]
	pub fn is_clean(&self) -> bool {
		self.recreated.is_empty() && self.tombstones_removed.is_empty() && !self.reparented
	}
}

#[derive(Debug, Default, Clone, Copy)]
struct Healed {
	recreated: bool,
	tombstone_removed: bool,
	reparented: bool,
}

/// Repairs every system object, each in its own lane, and waits for all of them. Any store
/// failure aborts the pass.
#[instrument(skip_all, err)]
pub async fn perform_startup_self_healing(ctx: &NodeContext) -> Result<HealingReport, Error> {
	let mut report = HealingReport::default();

	for system in SystemObject::ALL {
		let healed = ctx
			.run_for_object(system.object_type(), system.id(), move |ctx| async move {
				heal(ctx, system).await
			})
			.await?;

		if healed.recreated {
			report.recreated.push(system);
		}
		if healed.tombstone_removed {
			report.tombstones_removed.push(system);
		}
		report.reparented |= healed.reparented;
	}

	if report.is_clean() {
		info!("System objects are healthy;");
	} else {
		warn!(?report, "Repaired system objects;");
	}

	Ok(report)
}

async fn heal(ctx: NodeContext, system: SystemObject) -> Result<Healed, Error> {
	let (object_type, object_id) = (system.object_type(), system.id());
	let target = object_type.primary_target();
	let mut healed = Healed::default();

	let tombstone = ctx.store.read_tombstone(object_type, object_id).await?;
	let document = ctx
		.store
		.read_document(object_type, object_id, target)
		.await?;

	match (document, tombstone) {
		(None, tombstone) => {
			// Starts from the tombstone clock when there is one, and takes the tombstone away
			create_object(
				&ctx,
				object_type,
				object_id,
				BTreeMap::from([(target, system.default_fields(yaba_utils::now_ms())?)]),
			)
			.await?;
			healed.recreated = true;
			healed.tombstone_removed = tombstone.is_some();
		}
		(Some(document), Some(tombstone)) => {
			outlive_tombstone(&ctx, system, document, &tombstone).await?;
			healed.tombstone_removed = true;
		}
		(Some(_), None) => {}
	}

	if system == SystemObject::UncategorizedFolder {
		let outcome = change_fields(
			&ctx,
			object_type,
			object_id,
			target,
			EventKind::Update,
			FieldChanges::new().set(fields::PARENT_ID, Value::Null),
		)
		.await?;
		healed.reparented = matches!(outcome, Recorded::Applied(_));
	}

	if let Some(state) = load_state(&*ctx.store, object_type, object_id).await? {
		project(&*ctx.cache, object_type, object_id, &state).await;
	}

	Ok(healed)
}

/// Rewrites the surviving document on top of the deletion and records it as an UPDATE, so every
/// replica holding the DELETE event resolves the object as alive.
async fn outlive_tombstone(
	ctx: &NodeContext,
	system: SystemObject,
	document: Document,
	tombstone: &Tombstone,
) -> Result<(), Error> {
	let (object_type, object_id) = (system.object_type(), system.id());
	let target = object_type.primary_target();

	let fields = if document.fields.is_empty() {
		system.default_fields(yaba_utils::now_ms())?
	} else {
		document.fields.clone()
	};

	let event = match ctx.log.update_event(
		object_id,
		object_type,
		target,
		FieldChanges::from(fields.clone()),
		&document.clock.merge(&tombstone.deletion_clock),
	) {
		Recorded::Applied(event) => event,
		Recorded::Skipped(reason) => {
			warn!(%object_type, %object_id, ?reason, "Couldn't record the restore of a system object;");
			return Ok(());
		}
	};

	ctx.store
		.write_document(
			object_type,
			object_id,
			target,
			&Document::new(fields, event.clock.clone()),
		)
		.await?;

	if let Err(e) = ctx.log.append_local(vec![event]).await {
		if let Err(rollback_err) = ctx
			.store
			.write_document(object_type, object_id, target, &document)
			.await
		{
			error!(%object_type, %object_id, ?rollback_err, "Failed to roll back restored document;");
		}
		return Err(e.into());
	}

	ctx.store.remove_tombstone(object_type, object_id).await?;

	Ok(())
}
