use uuid::Uuid;

use crate::{
	ChangeEvent, DeviceId, EventKind, FieldChanges, FileTarget, ObjectType, Recorded, SkipReason,
	VectorClock,
};

/// Builds [`ChangeEvent`]s stamped by the local device.
///
/// Building is pure: implementors decide where the events go (see the change log in
/// `yaba-core`).
pub trait EventFactory {
	fn device_id(&self) -> &DeviceId;

	fn new_event(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		kind: EventKind,
		payload: FieldChanges,
		clock: VectorClock,
	) -> ChangeEvent {
		ChangeEvent {
			event_id: Uuid::new_v4(),
			object_id,
			object_type,
			file_target,
			kind,
			payload,
			clock,
			device_id: self.device_id().clone(),
			timestamp: yaba_utils::now_ms(),
		}
	}

	/// Clock is `base_clock` bumped for the local device, `{local: 1}` for a fresh object.
	fn create_event(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		payload: FieldChanges,
		base_clock: &VectorClock,
	) -> ChangeEvent {
		self.new_event(
			object_id,
			object_type,
			file_target,
			EventKind::Create,
			payload,
			base_clock.increment(self.device_id()),
		)
	}

	fn update_event(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		changes: FieldChanges,
		current_clock: &VectorClock,
	) -> Recorded<ChangeEvent> {
		self.changes_event(
			object_id,
			object_type,
			file_target,
			EventKind::Update,
			changes,
			current_clock,
		)
	}

	/// Same contract as [`EventFactory::update_event`], for an object's secondary documents.
	fn field_change_event(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		changes: FieldChanges,
		current_clock: &VectorClock,
	) -> Recorded<ChangeEvent> {
		self.changes_event(
			object_id,
			object_type,
			file_target,
			EventKind::FieldChange,
			changes,
			current_clock,
		)
	}

	fn changes_event(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		file_target: FileTarget,
		kind: EventKind,
		changes: FieldChanges,
		current_clock: &VectorClock,
	) -> Recorded<ChangeEvent> {
		if changes.is_empty() {
			return Recorded::Skipped(SkipReason::EmptyChangeSet);
		}

		Recorded::Applied(self.new_event(
			object_id,
			object_type,
			file_target,
			kind,
			changes,
			current_clock.increment(self.device_id()),
		))
	}

	/// Deletes apply to the whole object, so they always target the primary document.
	fn delete_event(
		&self,
		object_id: Uuid,
		object_type: ObjectType,
		current_clock: &VectorClock,
	) -> ChangeEvent {
		self.new_event(
			object_id,
			object_type,
			object_type.primary_target(),
			EventKind::Delete,
			FieldChanges::new(),
			current_clock.increment(self.device_id()),
		)
	}
}
