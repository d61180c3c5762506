//! Integration tests for periodic watchers.

use crossbeam::channel;
use parking_lot::Mutex;
use spindle::{EventLoop, TickerConfig, Watcher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_millis(500);

/// Slot for handing a watcher to its own callback.
fn watcher_slot() -> Arc<OnceLock<Watcher>> {
    Arc::new(OnceLock::new())
}

#[test]
fn test_starts_immediately_by_default() {
    let ev = EventLoop::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::bounded(1);

    let ticked = Arc::clone(&count);
    let watcher = ev.call_every(Duration::from_millis(10), move || {
        if ticked.fetch_add(1, Ordering::SeqCst) + 1 == 1 {
            let _ = tx.send(());
        }
    });

    assert!(watcher.is_running());
    rx.recv_timeout(WAIT).unwrap();
    assert!(count.load(Ordering::SeqCst) >= 1);

    assert!(watcher.stop());
    assert!(!watcher.is_running());
}

#[test]
fn test_wait_mode_prevents_reentry() {
    let ev = EventLoop::new().unwrap();
    let in_callback = Arc::new(AtomicBool::new(false));
    let reentered = Arc::new(AtomicBool::new(false));
    let (tx, rx) = channel::bounded(1);

    let slot = watcher_slot();
    let callback_slot = Arc::clone(&slot);
    let in_cb = Arc::clone(&in_callback);
    let saw_reentry = Arc::clone(&reentered);
    let mut count = 0;

    let watcher = ev.call_every_with(
        Duration::from_millis(10),
        TickerConfig {
            start: true,
            wait: true,
        },
        move || {
            if in_cb.swap(true, Ordering::SeqCst) {
                saw_reentry.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(30));
            in_cb.store(false, Ordering::SeqCst);

            count += 1;
            if count >= 2 {
                if let Some(watcher) = callback_slot.get() {
                    watcher.stop();
                }
                let _ = tx.send(());
            }
        },
    );
    let _ = slot.set(watcher);

    rx.recv_timeout(WAIT).unwrap();
    assert!(!reentered.load(Ordering::SeqCst));
}

#[test]
fn test_start_stop_semantics() {
    let ev = EventLoop::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::bounded(1);

    let ticked = Arc::clone(&count);
    let watcher = ev.call_every_with(
        Duration::from_millis(10),
        TickerConfig {
            start: false,
            wait: false,
        },
        move || {
            if ticked.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                let _ = tx.send(());
            }
        },
    );

    assert!(!watcher.is_running());
    assert!(!watcher.stop());

    // Not armed: nothing fires.
    let (idle_tx, idle_rx) = channel::bounded(1);
    let idle_count = Arc::clone(&count);
    ev.call_later(Duration::from_millis(30), move || {
        let _ = idle_tx.send(idle_count.load(Ordering::SeqCst) == 0);
    });
    assert!(idle_rx.recv_timeout(WAIT).unwrap());

    assert!(watcher.start());
    assert!(!watcher.start());

    rx.recv_timeout(WAIT).unwrap();

    assert!(watcher.stop());
    assert!(!watcher.stop());

    let stopped_at = count.load(Ordering::SeqCst);
    let (stable_tx, stable_rx) = channel::bounded(1);
    let stable_count = Arc::clone(&count);
    ev.call_later(Duration::from_millis(50), move || {
        let _ = stable_tx.send(stable_count.load(Ordering::SeqCst) == stopped_at);
    });
    assert!(stable_rx.recv_timeout(WAIT).unwrap());
}

#[test]
fn test_stop_from_callback() {
    let ev = EventLoop::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::bounded(1);

    let slot = watcher_slot();
    let callback_slot = Arc::clone(&slot);
    let ticked = Arc::clone(&count);
    let watcher = ev.call_every_with(
        Duration::from_millis(10),
        TickerConfig {
            start: false,
            wait: false,
        },
        move || {
            if ticked.fetch_add(1, Ordering::SeqCst) + 1 == 1 {
                if let Some(watcher) = callback_slot.get() {
                    watcher.stop();
                }
                let _ = tx.send(());
            }
        },
    );
    let _ = slot.set(watcher.clone());

    assert!(watcher.start());
    rx.recv_timeout(WAIT).unwrap();

    let stopped_at = count.load(Ordering::SeqCst);
    assert!(!watcher.is_running());

    let (stable_tx, stable_rx) = channel::bounded(1);
    let stable_count = Arc::clone(&count);
    ev.call_later(Duration::from_millis(50), move || {
        let _ = stable_tx.send(stable_count.load(Ordering::SeqCst) == stopped_at);
    });
    assert!(stable_rx.recv_timeout(WAIT).unwrap());
}

#[test]
fn test_cadence_stays_near_interval() {
    const INTERVAL: Duration = Duration::from_millis(20);
    const SAMPLES: usize = 5;

    let ev = EventLoop::new().unwrap();
    let times = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = channel::bounded(1);

    let slot = watcher_slot();
    let callback_slot = Arc::clone(&slot);
    let recorded = Arc::clone(&times);
    let watcher = ev.call_every(INTERVAL, move || {
        let mut times = recorded.lock();
        times.push(Instant::now());
        if times.len() >= SAMPLES {
            if let Some(watcher) = callback_slot.get() {
                watcher.stop();
            }
            let _ = tx.send(());
        }
    });
    let _ = slot.set(watcher);

    rx.recv_timeout(WAIT).unwrap();

    let times = times.lock();
    assert!(times.len() >= SAMPLES);
    let duration = times[SAMPLES - 1] - times[0];
    let expected = INTERVAL * (SAMPLES as u32 - 1);
    assert!(duration <= expected + Duration::from_millis(120));
}

#[test]
fn test_panic_keeps_watcher_armed() {
    let ev = EventLoop::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::bounded(1);

    let slot = watcher_slot();
    let callback_slot = Arc::clone(&slot);
    let ticked = Arc::clone(&count);
    let watcher = ev.call_every(Duration::from_millis(10), move || {
        let idx = ticked.fetch_add(1, Ordering::SeqCst);
        if idx == 0 {
            panic!("boom");
        }
        if let Some(watcher) = callback_slot.get() {
            watcher.stop();
        }
        let _ = tx.send(());
    });
    let _ = slot.set(watcher);

    rx.recv_timeout(WAIT).unwrap();
    assert!(count.load(Ordering::SeqCst) >= 2);
    assert_eq!(ev.stats().callbacks_panicked, 1);
}

#[test]
fn test_wait_mode_delays_next_tick() {
    const INTERVAL: Duration = Duration::from_millis(40);
    const WORK: Duration = Duration::from_millis(60);

    fn measure_gap(wait: bool) -> Duration {
        let ev = EventLoop::new().unwrap();
        let (end_tx, end_rx) = channel::bounded(1);
        let (start_tx, start_rx) = channel::bounded(1);

        let slot = watcher_slot();
        let callback_slot = Arc::clone(&slot);
        let mut idx = 0usize;
        let watcher = ev.call_every_with(
            INTERVAL,
            TickerConfig { start: true, wait },
            move || {
                match idx {
                    0 => {
                        thread::sleep(WORK);
                        let _ = end_tx.send(Instant::now());
                    }
                    1 => {
                        let _ = start_tx.send(Instant::now());
                        if let Some(watcher) = callback_slot.get() {
                            watcher.stop();
                        }
                    }
                    _ => {}
                }
                idx += 1;
            },
        );
        let _ = slot.set(watcher);

        let end_first = end_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let start_second = start_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        start_second - end_first
    }

    let gap_no_wait = measure_gap(false);
    let gap_wait = measure_gap(true);

    assert!(gap_wait >= gap_no_wait + Duration::from_millis(30));
}

#[test]
fn test_destruction_stops_tickers() {
    let count = Arc::new(AtomicUsize::new(0));
    let watcher;

    {
        let ev = EventLoop::new().unwrap();
        let (tx, rx) = channel::bounded(1);

        let ticked = Arc::clone(&count);
        watcher = ev.call_every(Duration::from_millis(10), move || {
            if ticked.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                let _ = tx.send(());
            }
        });

        rx.recv_timeout(WAIT).unwrap();
    }

    // The loop is joined: whatever the ticker reached is final.
    let stopped_at = count.load(Ordering::SeqCst);
    assert!(stopped_at >= 2);
    assert!(!watcher.is_running());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), stopped_at);
}
