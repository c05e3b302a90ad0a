//! End-to-end behaviour of the scheduler loop.
//!
//! These tests run real loop threads with short intervals and assert on
//! invocation counts and order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rstest::rstest;
use update_scheduler::{
    ErrorKind, FaultPolicy, ScheduleOptions, ScheduledUpdater, Scheduler, SchedulerConfig,
    UpdateCallback,
};

fn config(auto_start: bool) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_auto_start(auto_start)
        .with_thread_name("scenario-scheduler")
        .with_fault_policy(FaultPolicy::StopLoop)
}

fn recording(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> UpdateCallback {
    let log = log.clone();
    UpdateCallback::from_fn(move || log.lock().push(label))
}

mod interval_tests {
    use super::*;

    #[rstest]
    #[case(&[200], 200)]
    #[case(&[200, 50], 50)]
    #[case(&[75, 300, 120], 75)]
    #[case(&[10, 10, 10], 10)]
    fn test_interval_is_min_of_actives(#[case] intervals: &[u64], #[case] expected: u64) {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let callbacks: Vec<_> = intervals
            .iter()
            .map(|&ms| {
                let cb = UpdateCallback::from_fn(|| {});
                scheduler.schedule(&cb, ScheduleOptions::new(ms)).unwrap();
                cb
            })
            .collect();

        assert_eq!(scheduler.report_interval(), Duration::from_millis(expected));

        // Suspending the fastest falls back to the next fastest or the default.
        let fastest = intervals
            .iter()
            .position(|&ms| ms == expected)
            .unwrap();
        scheduler.suspend(&callbacks[fastest]).unwrap();

        let remaining = intervals
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != fastest)
            .map(|(_, &ms)| ms)
            .min()
            .unwrap_or(500);
        assert_eq!(scheduler.report_interval(), Duration::from_millis(remaining));
    }

    #[test]
    fn test_scheduler_scenario() {
        let scheduler = Scheduler::new(config(true)).unwrap();
        let cb_a = UpdateCallback::from_fn(|| {});
        let cb_b = UpdateCallback::from_fn(|| {});

        scheduler.schedule(&cb_a, ScheduleOptions::new(200)).unwrap();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.report_interval(), Duration::from_millis(200));

        scheduler.schedule(&cb_b, ScheduleOptions::new(50)).unwrap();
        assert_eq!(scheduler.report_interval(), Duration::from_millis(50));

        scheduler.suspend(&cb_b).unwrap();
        assert_eq!(scheduler.report_interval(), Duration::from_millis(200));

        scheduler.unschedule(&cb_a).unwrap();
        // cb_b is suspended but still registered.
        assert!(scheduler.is_running());

        scheduler.unschedule(&cb_b).unwrap();
        assert!(!scheduler.is_running());
    }
}

mod order_tests {
    use super::*;

    #[test]
    fn test_order_stable_under_suspend_resume() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording(&log, "A");
        let b = recording(&log, "B");
        let c = recording(&log, "C");
        for cb in [&a, &b, &c] {
            scheduler.schedule(cb, ScheduleOptions::new(15)).unwrap();
        }

        scheduler.suspend(&b).unwrap();
        scheduler.resume(&b).unwrap();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(80));
        scheduler.stop();

        let log = log.lock();
        assert!(log.len() >= 3);
        assert_eq!(log.len() % 3, 0);
        for pass in log.chunks(3) {
            assert_eq!(pass, ["A", "B", "C"]);
        }
    }

    #[test]
    fn test_reschedule_appends_to_order() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording(&log, "A");
        let b = recording(&log, "B");
        let c = recording(&log, "C");
        for cb in [&a, &b, &c] {
            scheduler.schedule(cb, ScheduleOptions::new(15)).unwrap();
        }

        scheduler.unschedule(&a).unwrap();
        scheduler.schedule(&a, ScheduleOptions::new(15)).unwrap();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();

        let log = log.lock();
        assert!(log.len() >= 3);
        assert_eq!(&log[..3], ["B", "C", "A"]);
    }

    #[test]
    fn test_suspended_callback_skipped_but_neighbours_run() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording(&log, "A");
        let b = recording(&log, "B");
        let c = recording(&log, "C");
        for cb in [&a, &b, &c] {
            scheduler.schedule(cb, ScheduleOptions::new(15)).unwrap();
        }
        scheduler.suspend(&b).unwrap();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();

        let log = log.lock();
        assert!(!log.is_empty());
        assert!(!log.contains(&"B"));
        for pass in log.chunks(2) {
            assert_eq!(pass, ["A", "C"]);
        }
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_double_start_runs_one_loop() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = {
            let count = count.clone();
            UpdateCallback::from_fn(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        scheduler.schedule(&cb, ScheduleOptions::new(100)).unwrap();

        scheduler.start().unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();

        // A duplicate loop would have invoked the callback twice by now.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_when_not_running_is_noop() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_stop_does_not_wait_for_full_interval() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let cb = UpdateCallback::from_fn(|| {});
        scheduler.schedule(&cb, ScheduleOptions::new(5_000)).unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = std::time::Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_dedicated_schedulers_run_independently() {
        let fast = Scheduler::new(config(false).with_thread_name("fast")).unwrap();
        let slow = Scheduler::new(config(false).with_thread_name("slow")).unwrap();
        let fast_count = Arc::new(AtomicUsize::new(0));
        let slow_count = Arc::new(AtomicUsize::new(0));

        let fast_cb = {
            let count = fast_count.clone();
            UpdateCallback::from_fn(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let slow_cb = {
            let count = slow_count.clone();
            UpdateCallback::from_fn(move || {
                count.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(60));
            })
        };

        fast.schedule(&fast_cb, ScheduleOptions::new(10)).unwrap();
        slow.schedule(&slow_cb, ScheduleOptions::new(10)).unwrap();
        fast.start().unwrap();
        slow.start().unwrap();
        thread::sleep(Duration::from_millis(150));
        fast.stop();
        slow.stop();

        assert!(fast_count.load(Ordering::SeqCst) > slow_count.load(Ordering::SeqCst));
        assert!(slow.stats().overruns >= 1);
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn test_double_schedule_rejected() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let cb = UpdateCallback::from_async(|| async {});
        scheduler.schedule(&cb, ScheduleOptions::new(100)).unwrap();

        let err = scheduler
            .schedule(&cb, ScheduleOptions::new(5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(scheduler.options_of(&cb).unwrap(), ScheduleOptions::new(100));
    }

    #[test]
    fn test_unknown_callback_rejected() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let cb = UpdateCallback::from_fn(|| {});

        for result in [
            scheduler.suspend(&cb),
            scheduler.resume(&cb),
            scheduler.update_schedule(&cb, ScheduleOptions::new(10)),
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
        }
    }
}

mod async_tests {
    use super::*;

    #[test]
    fn test_bare_runtime_future_as_callback() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        // The timer is built when the callback is called, not when polled.
        let cb = UpdateCallback::from_async(|| tokio::time::sleep(Duration::from_millis(1)));
        scheduler.schedule(&cb, ScheduleOptions::new(10)).unwrap();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(scheduler.is_running());
        let stats = scheduler.stats();
        assert!(stats.async_invocations >= 2, "stats = {stats:?}");
        scheduler.stop();
    }

    #[test]
    fn test_async_callback_performs_io() {
        let scheduler = Scheduler::new(config(false)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = {
            let count = count.clone();
            UpdateCallback::from_async(move || {
                let count = count.clone();
                async move {
                    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                        .await
                        .expect("bind loopback listener");
                    let addr = listener.local_addr().expect("listener address");
                    let (client, accepted) =
                        tokio::join!(tokio::net::TcpStream::connect(addr), listener.accept());
                    if client.is_ok() && accepted.is_ok() {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        };
        scheduler.schedule(&cb, ScheduleOptions::new(10)).unwrap();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}

mod concurrency_tests {
    use super::*;

    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    #[test]
    fn test_mutation_from_many_threads_while_looping() {
        let scheduler = Arc::new(Scheduler::new(config(true)).unwrap());
        let invocations = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let scheduler = scheduler.clone();
                let invocations = invocations.clone();
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        let invocations = invocations.clone();
                        let cb = if round % 2 == 0 {
                            UpdateCallback::from_fn(move || {
                                invocations.fetch_add(1, Ordering::Relaxed);
                            })
                        } else {
                            UpdateCallback::from_async(move || {
                                let invocations = invocations.clone();
                                async move {
                                    invocations.fetch_add(1, Ordering::Relaxed);
                                }
                            })
                        };
                        let interval = 5 + (t * ROUNDS + round) as u64 % 40;

                        scheduler.schedule(&cb, ScheduleOptions::new(interval)).unwrap();
                        scheduler.suspend(&cb).unwrap();
                        scheduler.resume(&cb).unwrap();
                        scheduler
                            .update_schedule(&cb, ScheduleOptions::new(interval + 1))
                            .unwrap();
                        if round % 5 == 0 {
                            thread::sleep(Duration::from_millis(1));
                        }
                        scheduler.unschedule(&cb).unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(scheduler.subscription_count(), 0);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.report_interval(), Duration::from_millis(500));
    }
}

mod updater_tests {
    use super::*;

    #[test]
    fn test_updater_polls_at_interval() {
        let scheduler = Arc::new(Scheduler::new(config(true)).unwrap());
        let updater = ScheduledUpdater::new(scheduler.clone(), ScheduleOptions::new(50)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            updater
                .set_update_action(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        updater.start().unwrap();
        thread::sleep(Duration::from_millis(220));
        updater.stop().unwrap();

        let count = counter.load(Ordering::SeqCst);
        assert!((3..=5).contains(&count), "count = {count}");

        // Stopped updaters are suspended, not removed.
        assert!(scheduler.is_running());
        updater.dispose();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_async_updater_polls() {
        let scheduler = Arc::new(Scheduler::new(config(true)).unwrap());
        let updater = ScheduledUpdater::new(scheduler.clone(), ScheduleOptions::new(20)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            updater
                .set_async_update_action(move || {
                    let counter = counter.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
        }

        updater.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        updater.dispose();

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }
}
