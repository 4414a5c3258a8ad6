use super::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The registry and retire list are process-global; serialize the tests
/// that assert on their state.
static REGISTRY_LOCK: Mutex<()> = Mutex::new(());

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_protect_and_unprotect_toggle_hazard() {
    let _guard = REGISTRY_LOCK.lock();

    let value = Box::into_raw(Box::new(17u64));
    let hp = HazardPtr::new();
    assert!(hp.available());

    assert!(!is_hazard(value as *const ()));
    hp.protect(value as *const ());
    assert!(is_hazard(value as *const ()));
    hp.unprotect();
    assert!(!is_hazard(value as *const ()));

    unsafe { drop(Box::from_raw(value)) };
}

#[test]
fn test_retire_unprotected_pointer_drops_immediately() {
    let _guard = REGISTRY_LOCK.lock();

    let drops = Arc::new(AtomicUsize::new(0));
    let p = Box::into_raw(Box::new(DropCounter(Arc::clone(&drops))));
    retire(p);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_protected_pointer_is_reclaimed_only_after_unprotect() {
    let _guard = REGISTRY_LOCK.lock();

    let drops = Arc::new(AtomicUsize::new(0));
    let p = Box::into_raw(Box::new(DropCounter(Arc::clone(&drops))));

    let hp = HazardPtr::new();
    hp.protect(p as *const ());

    let before = retired_len();
    retire(p);
    // Parked, not dropped.
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(retired_len(), before + 1);

    // Still hazardous: sweep must keep it.
    sweep_and_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    hp.unprotect();
    sweep_and_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(retired_len(), before);

    // A second sweep must not run the deleter again.
    sweep_and_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retire_with_custom_deleter_runs_exactly_once() {
    let _guard = REGISTRY_LOCK.lock();

    let hits = Arc::new(AtomicUsize::new(0));
    let p = Box::into_raw(Box::new(5i32));

    let hp = HazardPtr::new();
    hp.protect(p as *const ());

    let h = Arc::clone(&hits);
    retire_with(p, move |raw: *mut i32| {
        unsafe { drop(Box::from_raw(raw)) };
        h.fetch_add(1, Ordering::SeqCst);
    });

    hp.unprotect();
    sweep_and_reclaim();
    sweep_and_reclaim();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retire_while_remote_thread_protects() {
    let _guard = REGISTRY_LOCK.lock();

    let drops = Arc::new(AtomicUsize::new(0));
    let p = Box::into_raw(Box::new(DropCounter(Arc::clone(&drops))));
    let addr = p as usize;

    // Reader thread pins the pointer, then parks until told to let go.
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let (pinned_tx, pinned_rx) = std::sync::mpsc::channel::<()>();
    let reader = std::thread::spawn(move || {
        let hp = HazardPtr::new();
        hp.protect(addr as *const ());
        pinned_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        // hp drops here, releasing slot and protection
    });

    pinned_rx.recv().unwrap();
    retire(p);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    sweep_and_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    release_tx.send(()).unwrap();
    reader.join().unwrap();

    sweep_and_reclaim();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_acquire_protected_pins_current_value() {
    let _guard = REGISTRY_LOCK.lock();

    let first = Box::into_raw(Box::new(1u32));
    let shared = AtomicPtr::new(first);

    let hp = HazardPtr::new();
    let pinned = hp.acquire_protected(&shared);
    assert_eq!(pinned, first);
    assert!(is_hazard(pinned as *const ()));

    hp.unprotect();
    unsafe { drop(Box::from_raw(first)) };
}

#[test]
fn test_slot_released_on_drop_is_reusable() {
    let _guard = REGISTRY_LOCK.lock();

    // Claim every slot, drop the guards, then claim again.
    let guards: Vec<HazardPtr> = (0..MAX_SLOTS).map(|_| HazardPtr::new()).collect();
    let exhausted = HazardPtr::new();
    assert!(!exhausted.available());
    drop(guards);

    let mut retry = exhausted;
    assert!(retry.reacquire());
    assert!(retry.available());
}
