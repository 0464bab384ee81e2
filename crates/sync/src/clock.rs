use std::{
	cmp::Ordering,
	collections::{btree_map, BTreeMap},
	fmt,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable per-install identifier, the key of every [`VectorClock`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<Uuid> for DeviceId {
	fn from(id: Uuid) -> Self {
		Self(id.to_string())
	}
}

impl From<&str> for DeviceId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
	#[error("vector clock must be a JSON object, found: {0}")]
	NotAnObject(&'static str),
	#[error("invalid counter for device <device='{device}'>: {value}")]
	InvalidCounter { device: String, value: String },
	#[error("document has no clock")]
	Missing,
}

/// Causal relation between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
	Equal,
	/// `self` has seen everything `other` has, plus more.
	Dominates,
	/// `other` has seen everything `self` has, plus more.
	DominatedBy,
	Concurrent,
}

type ClockMap = BTreeMap<DeviceId, u64>;

/// Immutable logical time: a counter per device.
///
/// Zero counters are never stored, so two clocks compare [`ClockOrdering::Equal`] exactly when
/// they are `==`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ClockMap", into = "ClockMap")]
pub struct VectorClock(ClockMap);

impl From<ClockMap> for VectorClock {
	fn from(map: ClockMap) -> Self {
		Self::from_map(map)
	}
}

impl From<VectorClock> for ClockMap {
	fn from(clock: VectorClock) -> Self {
		clock.0
	}
}

impl VectorClock {
	#[must_use]
	pub const fn empty() -> Self {
		Self(BTreeMap::new())
	}

	#[must_use]
	pub fn of(device: impl Into<DeviceId>, counter: u64) -> Self {
		Self::from_map([(device.into(), counter)])
	}

	pub fn from_map(map: impl IntoIterator<Item = (DeviceId, u64)>) -> Self {
		Self(map.into_iter().filter(|(_, counter)| *counter > 0).collect())
	}

	#[must_use]
	pub fn to_map(&self) -> ClockMap {
		self.0.clone()
	}

	/// Decodes a persisted clock map, rejecting anything that isn't `{deviceId: u64, ...}`.
	pub fn from_json(value: &Value) -> Result<Self, ClockError> {
		let Value::Object(entries) = value else {
			return Err(ClockError::NotAnObject(json_kind(value)));
		};

		entries
			.iter()
			.map(|(device, counter)| {
				counter
					.as_u64()
					.map(|counter| (DeviceId::new(device.as_str()), counter))
					.ok_or_else(|| ClockError::InvalidCounter {
						device: device.clone(),
						value: counter.to_string(),
					})
			})
			.collect::<Result<Vec<_>, _>>()
			.map(Self::from_map)
	}

	#[must_use]
	pub fn to_json(&self) -> Value {
		Value::Object(
			self.0
				.iter()
				.map(|(device, counter)| (device.to_string(), Value::from(*counter)))
				.collect(),
		)
	}

	#[must_use]
	pub fn get(&self, device: &DeviceId) -> u64 {
		self.0.get(device).copied().unwrap_or_default()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> btree_map::Iter<'_, DeviceId, u64> {
		self.0.iter()
	}

	#[must_use]
	pub fn increment(&self, device: &DeviceId) -> Self {
		let mut next = self.0.clone();
		*next.entry(device.clone()).or_default() += 1;
		Self(next)
	}

	/// Componentwise maximum over the union of devices.
	#[must_use]
	pub fn merge(&self, other: &Self) -> Self {
		let mut merged = self.0.clone();
		for (device, counter) in &other.0 {
			let entry = merged.entry(device.clone()).or_default();
			*entry = (*entry).max(*counter);
		}
		Self(merged)
	}

	#[must_use]
	pub fn compare(&self, other: &Self) -> ClockOrdering {
		let mut greater = false;
		let mut lesser = false;

		for device in self.0.keys().chain(other.0.keys()) {
			match self.get(device).cmp(&other.get(device)) {
				Ordering::Greater => greater = true,
				Ordering::Less => lesser = true,
				Ordering::Equal => {}
			}

			if greater && lesser {
				return ClockOrdering::Concurrent;
			}
		}

		match (greater, lesser) {
			(true, false) => ClockOrdering::Dominates,
			(false, true) => ClockOrdering::DominatedBy,
			(false, false) => ClockOrdering::Equal,
			(true, true) => ClockOrdering::Concurrent,
		}
	}

	#[must_use]
	pub fn dominates(&self, other: &Self) -> bool {
		self.compare(other) == ClockOrdering::Dominates
	}

	#[must_use]
	pub fn dominates_or_equals(&self, other: &Self) -> bool {
		matches!(
			self.compare(other),
			ClockOrdering::Dominates | ClockOrdering::Equal
		)
	}

	/// Neither side dominates. Equal clocks are the same observed state, not concurrent.
	#[must_use]
	pub fn is_concurrent_with(&self, other: &Self) -> bool {
		self.compare(other) == ClockOrdering::Concurrent
	}

	/// Total order used only to break ties between concurrent clocks deterministically on every
	/// replica: larger counter sum first, then the map order.
	#[must_use]
	pub fn deterministic_cmp(&self, other: &Self) -> Ordering {
		let sum = |clock: &Self| clock.0.values().copied().map(u128::from).sum::<u128>();

		sum(self)
			.cmp(&sum(other))
			.then_with(|| self.0.cmp(&other.0))
	}
}

impl<'a> IntoIterator for &'a VectorClock {
	type Item = (&'a DeviceId, &'a u64);
	type IntoIter = btree_map::Iter<'a, DeviceId, u64>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

impl fmt::Display for VectorClock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("{")?;
		for (idx, (device, counter)) in self.0.iter().enumerate() {
			if idx > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{device}: {counter}")?;
		}
		f.write_str("}")
	}
}

const fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	fn dev(id: &str) -> DeviceId {
		DeviceId::from(id)
	}

	fn clock(entries: &[(&str, u64)]) -> VectorClock {
		VectorClock::from_map(entries.iter().map(|(d, c)| (dev(d), *c)))
	}

	#[test]
	fn increments_on_different_devices_commute() {
		let base = clock(&[("a", 3), ("c", 7)]);

		let ab = base.increment(&dev("a")).increment(&dev("b"));
		let ba = base.increment(&dev("b")).increment(&dev("a"));

		assert_eq!(ab, ba);
		assert_eq!(ab.get(&dev("a")), 4);
		assert_eq!(ab.get(&dev("b")), 1);
		assert_eq!(ab.get(&dev("c")), 7);
	}

	#[test]
	fn increment_leaves_receiver_untouched() {
		let base = VectorClock::of("a", 1);
		let next = base.increment(&dev("a"));

		assert_eq!(base.get(&dev("a")), 1);
		assert_eq!(next.get(&dev("a")), 2);
	}

	#[test]
	fn merge_is_idempotent_commutative_and_an_upper_bound() {
		let a = clock(&[("a", 2), ("b", 1)]);
		let b = clock(&[("b", 4), ("c", 1)]);

		assert_eq!(a.merge(&a), a);
		assert_eq!(a.merge(&b), b.merge(&a));

		let merged = a.merge(&b);
		assert!(merged.dominates_or_equals(&a));
		assert!(merged.dominates_or_equals(&b));
		assert_eq!(merged, clock(&[("a", 2), ("b", 4), ("c", 1)]));
	}

	#[test]
	fn dominance_is_antisymmetric() {
		let samples = [
			VectorClock::empty(),
			clock(&[("a", 1)]),
			clock(&[("a", 2)]),
			clock(&[("b", 1)]),
			clock(&[("a", 1), ("b", 1)]),
			clock(&[("a", 2), ("b", 1)]),
		];

		for a in &samples {
			for b in &samples {
				assert!(
					!(a.dominates(b) && b.dominates(a)),
					"{a} and {b} dominate each other"
				);
				if a == b {
					assert_eq!(a.compare(b), ClockOrdering::Equal);
					assert!(!a.is_concurrent_with(b));
				}
			}
		}
	}

	#[test]
	fn concurrent_when_each_side_has_unseen_progress() {
		let a = clock(&[("a", 2)]);
		let b = clock(&[("a", 1), ("b", 1)]);

		assert!(a.is_concurrent_with(&b));
		assert!(!a.dominates(&b));
		assert!(!b.dominates(&a));
		assert!(clock(&[("a", 2), ("b", 1)]).dominates(&b));
	}

	#[test]
	fn zero_counters_are_not_stored() {
		assert_eq!(VectorClock::of("a", 0), VectorClock::empty());
		assert!(clock(&[("a", 0), ("b", 0)]).is_empty());
	}

	#[test]
	fn json_round_trip_is_lossless() {
		let original = clock(&[("device-1", 12), ("device-2", 1)]);

		let encoded = serde_json::to_value(&original).expect("serialize");
		assert_eq!(encoded, json!({"device-1": 12, "device-2": 1}));
		assert_eq!(VectorClock::from_json(&encoded), Ok(original.clone()));
		assert_eq!(
			serde_json::from_value::<VectorClock>(encoded).expect("deserialize"),
			original
		);
	}

	#[test]
	fn malformed_clocks_are_typed_errors() {
		assert_eq!(
			VectorClock::from_json(&json!([1, 2])),
			Err(ClockError::NotAnObject("array"))
		);
		assert!(matches!(
			VectorClock::from_json(&json!({"a": -1})),
			Err(ClockError::InvalidCounter { device, .. }) if device == "a"
		));
		assert!(matches!(
			VectorClock::from_json(&json!({"a": "3"})),
			Err(ClockError::InvalidCounter { .. })
		));
		assert!(serde_json::from_value::<VectorClock>(json!({"a": 1.5})).is_err());
	}

	#[test]
	fn deterministic_cmp_is_total_for_concurrent_clocks() {
		let a = clock(&[("a", 1), ("b", 2)]);
		let b = clock(&[("a", 2), ("b", 1)]);

		assert_ne!(a.deterministic_cmp(&b), Ordering::Equal);
		assert_eq!(a.deterministic_cmp(&b), b.deterministic_cmp(&a).reverse());
	}
}
