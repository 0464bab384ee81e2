//!
//! # Operation Queue
//!
//! Serializes asynchronous operations per key: operations sharing a key run one at a time in
//! submission order, while different keys make progress concurrently, bounded by a fixed amount
//! of permits.
//!
//! Every key has a lane that goes `IDLE -> RUNNING -> IDLE`. A lane only exists while it has work,
//! and a single drain task owns it for that whole time.
//!
//! Operations are never cancelled or aborted. A task running longer than the stall threshold gets
//! a warning logged and is still awaited.
//!
//! ## Example
//!
//! ```
//! use yaba_operation_queue::{OperationKey, OperationQueue, QueueError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let queue = OperationQueue::with_defaults()?;
//!
//!     let answer = queue
//!         .enqueue_and_await(OperationKey::named("answer"), async { Ok::<_, QueueError>(42) })
//!         .await?;
//!
//!     assert_eq!(answer, 42);
//!     Ok(())
//! }
//! ```

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

use std::{
	any::Any,
	collections::{HashMap, VecDeque},
	fmt,
	future::Future,
	num::NonZeroUsize,
	panic::AssertUnwindSafe,
	pin::pin,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex, PoisonError,
	},
	time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
	runtime::Handle,
	sync::{oneshot, Notify, Semaphore},
	time::timeout,
};
use tracing::{error, instrument, trace, warn};

mod key;

pub use key::OperationKey;

pub const DEFAULT_STALL_WARNING: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("operation queue must be created inside a tokio runtime")]
	NoRuntime,
	#[error("queued operation panicked <key='{0}'>")]
	TaskPanicked(String),
}

type Job = BoxFuture<'static, ()>;

/// Cheap to clone, every clone feeds the same lanes.
#[derive(Clone)]
pub struct OperationQueue {
	inner: Arc<Inner>,
}

struct Inner {
	lanes: Mutex<HashMap<String, VecDeque<Job>>>,
	permits: Semaphore,
	/// Queued plus running operations, over every lane
	pending: AtomicUsize,
	idle: Notify,
	stall_warning: Duration,
	runtime: Handle,
}

/// One permit per available core, the same way the task system sizes its worker pool.
#[must_use]
pub fn default_concurrency() -> NonZeroUsize {
	std::thread::available_parallelism().unwrap_or_else(|e| {
		error!(?e, "Failed to get available parallelism for the operation queue;");
		NonZeroUsize::MIN
	})
}

impl OperationQueue {
	/// Must be called from within a tokio runtime, lanes are drained on that runtime.
	pub fn new(max_concurrency: NonZeroUsize, stall_warning: Duration) -> Result<Self, QueueError> {
		let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

		Ok(Self {
			inner: Arc::new(Inner {
				lanes: Mutex::default(),
				permits: Semaphore::new(max_concurrency.get()),
				pending: AtomicUsize::new(0),
				idle: Notify::new(),
				stall_warning,
				runtime,
			}),
		})
	}

	pub fn with_defaults() -> Result<Self, QueueError> {
		Self::new(default_concurrency(), DEFAULT_STALL_WARNING)
	}

	/// Fire and forget. Errors returned by `task` are logged, never propagated.
	pub fn enqueue<F, E>(&self, key: impl Into<String>, task: F)
	where
		F: Future<Output = Result<(), E>> + Send + 'static,
		E: fmt::Display + Send + 'static,
	{
		let key = key.into();
		let task_key = key.clone();

		self.push(
			key,
			async move {
				if let Err(e) = task.await {
					error!(key = %task_key, %e, "Queued operation failed;");
				}
			}
			.boxed(),
		);
	}

	/// Same ordering guarantees as [`OperationQueue::enqueue`], but waits for the operation to
	/// run and hands back its result. A panic inside `task` surfaces as
	/// [`QueueError::TaskPanicked`].
	pub async fn enqueue_and_await<F, T, E>(&self, key: impl Into<String>, task: F) -> Result<T, E>
	where
		F: Future<Output = Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: From<QueueError> + Send + 'static,
	{
		let key = key.into();
		let (tx, rx) = oneshot::channel();

		self.push(
			key.clone(),
			async move {
				if tx.send(task.await).is_err() {
					trace!("Caller stopped waiting for a queued operation result;");
				}
			}
			.boxed(),
		);

		// The sender only gets dropped without sending if the task unwound
		rx.await.map_err(|_| QueueError::TaskPanicked(key))?
	}

	/// Resolves once no operation is queued or running on any lane.
	pub async fn wait_idle(&self) {
		loop {
			let mut notified = pin!(self.inner.idle.notified());
			notified.as_mut().enable();

			if self.inner.pending.load(Ordering::Acquire) == 0 {
				return;
			}

			notified.await;
		}
	}

	#[must_use]
	pub fn pending_count(&self) -> usize {
		self.inner.pending.load(Ordering::Acquire)
	}

	/// Whether `key` has an operation running or waiting.
	#[must_use]
	pub fn is_running(&self, key: &str) -> bool {
		self.inner.lock_lanes().contains_key(key)
	}

	fn push(&self, key: String, job: Job) {
		self.inner.pending.fetch_add(1, Ordering::AcqRel);

		let mut lanes = self.inner.lock_lanes();
		if let Some(lane) = lanes.get_mut(&key) {
			lane.push_back(job);
			return;
		}

		lanes.insert(key.clone(), VecDeque::from([job]));
		drop(lanes);

		self.inner.runtime.spawn(Arc::clone(&self.inner).drain(key));
	}
}

impl fmt::Debug for OperationQueue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OperationQueue")
			.field("pending", &self.pending_count())
			.field("available_permits", &self.inner.permits.available_permits())
			.field("stall_warning", &self.inner.stall_warning)
			.finish_non_exhaustive()
	}
}

impl Inner {
	fn lock_lanes(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Job>>> {
		// Jobs never run while the lock is held, so a poisoned map is still consistent
		self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
	}

	#[instrument(skip(self))]
	async fn drain(self: Arc<Self>, key: String) {
		let mut next = self.next_job(&key);

		while let Some(job) = next {
			self.run(&key, job).await;

			// Lane must be gone before the pending count can reach zero
			next = self.next_job(&key);
			if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
				self.idle.notify_waiters();
			}
		}
	}

	/// Pops the next job of the lane, removing the lane once it is empty.
	fn next_job(&self, key: &str) -> Option<Job> {
		let mut lanes = self.lock_lanes();
		let lane = lanes.get_mut(key)?;

		let job = lane.pop_front();
		if job.is_none() {
			lanes.remove(key);
		}

		job
	}

	async fn run(&self, key: &str, job: Job) {
		let Ok(_permit) = self.permits.acquire().await else {
			error!(key, "Operation queue permits were closed, dropping operation;");
			return;
		};

		let mut task = pin!(AssertUnwindSafe(job).catch_unwind());

		let outcome = if let Ok(outcome) = timeout(self.stall_warning, &mut task).await {
			outcome
		} else {
			warn!(
				key,
				stall_warning_secs = self.stall_warning.as_secs(),
				"Queued operation is taking too long, still waiting for it;"
			);
			task.await
		};

		if let Err(panic) = outcome {
			error!(
				key,
				panic = panic_message(&*panic),
				"Queued operation panicked;"
			);
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
	panic
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| panic.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("<non string panic payload>")
}
