use yaba_operation_queue::{OperationKey, OperationQueue, QueueError};

use std::{
	num::NonZeroUsize,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use tokio::{
	sync::oneshot,
	time::{sleep, timeout},
};
use tracing_test::traced_test;

fn queue(max_concurrency: usize) -> OperationQueue {
	OperationQueue::new(
		NonZeroUsize::new(max_concurrency).unwrap(),
		Duration::from_secs(30),
	)
	.unwrap()
}

#[derive(Debug, thiserror::Error)]
enum SampleError {
	#[error("sample failure: {0}")]
	Failed(&'static str),
	#[error(transparent)]
	Queue(#[from] QueueError),
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn same_key_runs_in_submission_order() {
	let queue = queue(8);
	let seen = Arc::new(Mutex::new(Vec::new()));

	for i in 0..50_u64 {
		let seen = Arc::clone(&seen);
		queue.enqueue("bookmark", async move {
			// Earlier tasks sleep longer, so any overlap would reorder them
			sleep(Duration::from_millis((50 - i) % 7)).await;
			seen.lock().unwrap().push(i);
			Ok::<_, QueueError>(())
		});
	}

	queue.wait_idle().await;

	assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn same_key_never_overlaps() {
	let queue = queue(8);
	let in_flight = Arc::new(AtomicUsize::new(0));
	let max_in_flight = Arc::new(AtomicUsize::new(0));

	for _ in 0..20 {
		let (in_flight, max_in_flight) = (Arc::clone(&in_flight), Arc::clone(&max_in_flight));
		queue.enqueue(OperationKey::object("Folder", 1), async move {
			let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			max_in_flight.fetch_max(now, Ordering::SeqCst);
			sleep(Duration::from_millis(2)).await;
			in_flight.fetch_sub(1, Ordering::SeqCst);
			Ok::<_, QueueError>(())
		});
	}

	queue.wait_idle().await;

	assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[traced_test]
async fn different_keys_run_concurrently() {
	let queue = queue(2);
	let (tx, rx) = oneshot::channel::<()>();

	// Would dead lock if "a" blocked "b"
	queue.enqueue("a", async move {
		rx.await.map_err(|_| SampleError::Failed("sender dropped"))
	});
	queue.enqueue("b", async move {
		tx.send(()).map_err(|()| SampleError::Failed("receiver dropped"))
	});

	timeout(Duration::from_secs(5), queue.wait_idle())
		.await
		.unwrap();
}

#[tokio::test]
#[traced_test]
async fn awaited_result_is_propagated() {
	let queue = queue(2);

	let value = queue
		.enqueue_and_await("tag", async { Ok::<_, SampleError>(7) })
		.await
		.unwrap();
	assert_eq!(value, 7);

	let failure = queue
		.enqueue_and_await("tag", async { Err::<(), _>(SampleError::Failed("nope")) })
		.await;
	assert!(matches!(failure, Err(SampleError::Failed("nope"))));
}

#[tokio::test]
#[traced_test]
async fn panicking_task_does_not_poison_its_lane() {
	let queue = queue(2);

	let outcome = queue
		.enqueue_and_await("highlight", async {
			if true {
				panic!("boom");
			}
			Ok::<(), QueueError>(())
		})
		.await;
	assert!(matches!(outcome, Err(QueueError::TaskPanicked(key)) if key == "highlight"));

	let after = queue
		.enqueue_and_await("highlight", async { Ok::<_, QueueError>("still alive") })
		.await
		.unwrap();
	assert_eq!(after, "still alive");
	assert!(logs_contain("Queued operation panicked"));
}

#[tokio::test]
#[traced_test]
async fn fire_and_forget_failures_are_logged() {
	let queue = queue(1);

	queue.enqueue("folder", async { Err::<(), _>(SampleError::Failed("disk full")) });
	queue.wait_idle().await;

	assert!(logs_contain("Queued operation failed"));
	assert!(logs_contain("disk full"));
}

#[tokio::test]
#[traced_test]
async fn lane_state_is_observable() {
	let queue = queue(2);
	let (release_tx, release_rx) = oneshot::channel::<()>();

	queue.enqueue("bookmark:1", async move {
		release_rx.await.map_err(|_| SampleError::Failed("sender dropped"))
	});
	queue.enqueue("bookmark:1", async { Ok::<_, SampleError>(()) });

	assert!(queue.is_running("bookmark:1"));
	assert!(!queue.is_running("bookmark:2"));
	assert_eq!(queue.pending_count(), 2);

	release_tx.send(()).unwrap();
	queue.wait_idle().await;

	assert!(!queue.is_running("bookmark:1"));
	assert_eq!(queue.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn stalled_task_is_reported_but_awaited() {
	let queue = OperationQueue::new(NonZeroUsize::MIN, Duration::from_secs(1)).unwrap();

	let value = queue
		.enqueue_and_await("slow", async {
			sleep(Duration::from_secs(5)).await;
			Ok::<_, QueueError>(5)
		})
		.await
		.unwrap();

	assert_eq!(value, 5);
	assert!(logs_contain("taking too long"));
}

#[test]
fn needs_a_runtime() {
	assert!(matches!(
		OperationQueue::with_defaults(),
		Err(QueueError::NoRuntime)
	));
}
