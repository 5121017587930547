use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use crossbeam_utils::sync::WaitGroup;
use workgroup::{
    AdaptiveConfig, GroupConfig, PoolMode, PoolState, ShutdownPolicy, WorkerGroup,
};

fn fast_tuning() -> AdaptiveConfig {
    AdaptiveConfig {
        sample_interval_ms: 5,
        grow_debounce_ms: 10,
        idle_timeout_ms: 100,
    }
}

fn adaptive_group(max_workers: usize) -> WorkerGroup {
    let config = GroupConfig::adaptive(max_workers)
        .with_label("adaptive")
        .with_adaptive(fast_tuning());
    WorkerGroup::with_config(config).unwrap()
}

/// Polls `cond` until it holds or `timeout` passes.
fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn starts_with_one_worker() {
    let group = adaptive_group(4);
    assert_eq!(group.worker_count(), 1);
    assert!(group.running());
}

#[test]
fn grows_to_max_under_load_and_shrinks_when_idle() {
    const MAX_WORKERS: usize = 4;
    let group = adaptive_group(MAX_WORKERS);
    let peak = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));

    for _ in 0..MAX_WORKERS * 3 {
        let peak = peak.clone();
        let active = active.clone();
        assert!(group.add_job(move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            active.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    assert!(eventually(Duration::from_secs(5), || {
        group.worker_count() == MAX_WORKERS
    }));
    group.wait_idle();
    assert!(peak.load(Ordering::SeqCst) <= MAX_WORKERS);
    assert!(peak.load(Ordering::SeqCst) > 1);

    assert!(eventually(Duration::from_secs(5), || group.worker_count() == 1));
}

#[test]
fn never_exceeds_max_workers() {
    let group = adaptive_group(2);
    let wg = WaitGroup::new();
    for _ in 0..40 {
        let wg = wg.clone();
        assert!(group.add_job(move || {
            thread::sleep(Duration::from_millis(10));
            drop(wg);
        }));
    }
    let mut max_seen = 0;
    while group.queue_size() > 0 {
        max_seen = max_seen.max(group.worker_count());
        thread::sleep(Duration::from_millis(2));
    }
    wg.wait();
    assert!(max_seen <= 2);
}

#[test]
fn one_worker_adaptive_group_keeps_fifo() {
    let group = adaptive_group(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..100 {
        let log = log.clone();
        assert!(group.add_job(move || log.lock().unwrap().push(i)));
    }
    group.stop();
    group.wait();
    assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn stop_and_wait_joins_every_worker() {
    let group = adaptive_group(3);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..30 {
        let counter = counter.clone();
        assert!(group.add_job(move || {
            thread::sleep(Duration::from_millis(5));
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    group.stop();
    assert!(!group.add_job(|| {}));
    group.wait();

    assert_eq!(counter.load(Ordering::SeqCst), 30);
    assert_eq!(group.worker_count(), 0);
    assert_eq!(group.state(), PoolState::Stopped);
}

#[test]
fn stop_immediately_returns_promptly() {
    let group = WorkerGroup::load_adaptive(Some("quick"), 8, Some(16)).unwrap();
    let start = Instant::now();
    group.stop();
    group.wait();
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn bounded_adaptive_queue_rejects_when_full() {
    let config = GroupConfig {
        mode: PoolMode::Adaptive,
        workers: 1,
        max_queue_len: Some(2),
        adaptive: fast_tuning(),
        ..GroupConfig::default()
    };
    let group = WorkerGroup::with_config(config).unwrap();
    let started = WaitGroup::new();
    let release = WaitGroup::new();
    {
        let started = started.clone();
        let release = release.clone();
        assert!(group.add_job(move || {
            drop(started);
            release.wait();
        }));
    }
    started.wait();

    assert!(group.add_job(|| {}));
    assert!(group.add_job(|| {}));
    assert!(!group.add_job(|| {}));

    drop(release);
    group.wait_idle();
    assert!(group.add_job(|| {}));
}

#[test]
fn panicking_jobs_are_contained() {
    let group = adaptive_group(2);
    let handle = group
        .run(|| {
            panic_control::disable_hook_in_current_thread();
            panic!("bad block");
        })
        .unwrap();
    assert!(handle.join().is_err());
    assert_eq!(group.run(|| 40 + 2).unwrap().join(), Ok(42));
}

#[test]
fn huge_queue_limit_is_accepted() {
    let config = GroupConfig::adaptive(2)
        .with_max_queue_len(usize::MAX)
        .with_adaptive(fast_tuning());
    let group = WorkerGroup::with_config(config).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = counter.clone();
        assert!(group.add_job(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    group.wait_idle();
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

/// Reports the group's worker count when dropped.
struct CountOnDrop {
    group: Weak<WorkerGroup>,
    seen: channel::Sender<usize>,
}

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        if let Some(group) = self.group.upgrade() {
            let _ = self.seen.send(group.worker_count());
        }
    }
}

#[test]
fn abandoned_jobs_may_call_back_into_the_group() {
    let config = GroupConfig::adaptive(1)
        .with_label("abandon")
        .with_shutdown(ShutdownPolicy::Abandon)
        .with_adaptive(fast_tuning());
    let group = Arc::new(WorkerGroup::with_config(config).unwrap());
    let ran = Arc::new(AtomicUsize::new(0));

    let started = WaitGroup::new();
    let release = WaitGroup::new();
    {
        let started = started.clone();
        let release = release.clone();
        assert!(group.add_job(move || {
            drop(started);
            release.wait();
        }));
    }
    started.wait();

    let (seen_tx, seen_rx) = channel::unbounded();
    for _ in 0..3 {
        let guard = CountOnDrop {
            group: Arc::downgrade(&group),
            seen: seen_tx.clone(),
        };
        let ran = ran.clone();
        assert!(group.add_job(move || {
            let _guard = guard;
            ran.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let (stopped_tx, stopped_rx) = channel::bounded(1);
    let stopper = {
        let group = group.clone();
        thread::spawn(move || {
            group.stop();
            stopped_tx.send(()).unwrap();
        })
    };
    let stopped = stopped_rx.recv_timeout(Duration::from_secs(5)).is_ok();
    if !stopped {
        // A stuck stop would also hang the group's destructor.
        std::mem::forget(group);
        panic!("stop() did not return");
    }
    stopper.join().unwrap();

    let counts: Vec<usize> = seen_rx.try_iter().collect();
    assert_eq!(counts, vec![1, 1, 1]);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    drop(release);
    group.wait();
    assert_eq!(group.state(), PoolState::Stopped);
}
