//! Cross-device synchronization and device-loss notification.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{GraphicsError, GraphicsResult};
use crate::resource::NativeObject;

/// Outcome of a keyed-mutex acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Acquired,
    Timeout,
    /// The previous owner went away without releasing; ownership is not
    /// granted and the resource contents are undefined.
    Abandoned,
}

#[derive(Debug, Default)]
struct KeyedMutexState {
    holder: Option<u64>,
    abandoned: bool,
}

/// Key-tagged mutex guarding a surface shared between devices. Any key
/// may acquire once the mutex is free; release must present the key the
/// holder acquired with.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    state: Mutex<KeyedMutexState>,
    changed: Condvar,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, KeyedMutexState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn acquire(&self, key: u64, timeout: Duration) -> SyncStatus {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock_state();
        loop {
            if state.abandoned {
                return SyncStatus::Abandoned;
            }
            if state.holder.is_none() {
                state.holder = Some(key);
                return SyncStatus::Acquired;
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return SyncStatus::Timeout;
            }
            state = match self.changed.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn release(&self, key: u64) -> GraphicsResult<()> {
        let mut state = self.lock_state();
        match state.holder {
            Some(holder) if holder == key => {
                state.holder = None;
                drop(state);
                self.changed.notify_all();
                Ok(())
            }
            Some(holder) => Err(GraphicsError::SyncViolation(format!(
                "keyed mutex released with key {key}, held with key {holder}"
            ))),
            None => Err(GraphicsError::SyncViolation(format!(
                "keyed mutex released with key {key} while not held"
            ))),
        }
    }

    /// Marks the mutex abandoned; pending and future acquires observe
    /// [`SyncStatus::Abandoned`].
    pub fn abandon(&self) {
        let mut state = self.lock_state();
        state.abandoned = true;
        state.holder = None;
        drop(state);
        self.changed.notify_all();
    }

    pub fn holder(&self) -> Option<u64> {
        self.lock_state().holder
    }
}

/// Caller-chosen identity of a device-loss registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LossIdentity(pub usize);

pub type ReleaseCallback = Box<dyn FnMut() + Send>;
pub type RebuildCallback = Box<dyn FnMut(NativeObject) + Send>;

/// Callbacks invoked around a device rebuild. `release` drops everything
/// derived from the lost device; `rebuild` receives the new native device.
pub struct DeviceLossCallbacks {
    pub identity: LossIdentity,
    pub release: ReleaseCallback,
    pub rebuild: RebuildCallback,
}

impl DeviceLossCallbacks {
    pub fn new(
        identity: LossIdentity,
        release: impl FnMut() + Send + 'static,
        rebuild: impl FnMut(NativeObject) + Send + 'static,
    ) -> Self {
        Self {
            identity,
            release: Box::new(release),
            rebuild: Box::new(rebuild),
        }
    }
}

impl std::fmt::Debug for DeviceLossCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLossCallbacks")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Registered loss callbacks in registration order.
#[derive(Debug, Default)]
pub struct DeviceLossRegistry {
    entries: Vec<DeviceLossCallbacks>,
}

impl DeviceLossRegistry {
    pub fn register(&mut self, callbacks: DeviceLossCallbacks) {
        log::debug!("registered device loss callbacks {:?}", callbacks.identity);
        self.entries.push(callbacks);
    }

    /// Removes every registration with `identity`; returns how many.
    pub fn unregister(&mut self, identity: LossIdentity) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.identity != identity);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notify_release(&mut self) {
        for entry in &mut self.entries {
            (entry.release)();
        }
    }

    pub fn notify_rebuild(&mut self, device: NativeObject) {
        for entry in &mut self.entries {
            (entry.rebuild)(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn acquire_times_out_while_held_and_succeeds_after_release() -> GraphicsResult<()> {
        let mutex = Arc::new(KeyedMutex::new());
        assert_eq!(mutex.acquire(0, Duration::ZERO), SyncStatus::Acquired);
        assert_eq!(
            mutex.acquire(1, Duration::from_millis(10)),
            SyncStatus::Timeout
        );

        let waiter = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || mutex.acquire(1, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        mutex.release(0)?;
        assert_eq!(waiter.join().ok(), Some(SyncStatus::Acquired));
        assert_eq!(mutex.holder(), Some(1));
        Ok(())
    }

    #[test]
    fn release_with_wrong_key_is_a_violation() {
        let mutex = KeyedMutex::new();
        assert!(matches!(
            mutex.release(3),
            Err(GraphicsError::SyncViolation(_))
        ));
        assert_eq!(mutex.acquire(1, Duration::ZERO), SyncStatus::Acquired);
        assert!(matches!(
            mutex.release(2),
            Err(GraphicsError::SyncViolation(_))
        ));
        assert_eq!(mutex.holder(), Some(1));
    }

    #[test]
    fn abandoned_mutex_never_grants_ownership() {
        let mutex = KeyedMutex::new();
        mutex.abandon();
        assert_eq!(mutex.acquire(0, Duration::ZERO), SyncStatus::Abandoned);
        assert_eq!(mutex.holder(), None);
    }

    #[test]
    fn unregister_removes_all_matching_registrations() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut registry = DeviceLossRegistry::default();
        for identity in [1, 2, 1] {
            let released = Arc::clone(&released);
            registry.register(DeviceLossCallbacks::new(
                LossIdentity(identity),
                move || {
                    released.fetch_add(1, Ordering::SeqCst);
                },
                |_| {},
            ));
        }

        assert_eq!(registry.unregister(LossIdentity(1)), 2);
        assert_eq!(registry.unregister(LossIdentity(9)), 0);
        registry.notify_release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebuild_receives_new_device_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DeviceLossRegistry::default();
        for identity in [10, 20] {
            let order = Arc::clone(&order);
            registry.register(DeviceLossCallbacks::new(
                LossIdentity(identity),
                || {},
                move |device| {
                    if let Ok(mut order) = order.lock() {
                        order.push((identity, device));
                    }
                },
            ));
        }
        registry.notify_rebuild(NativeObject(0xd3d));
        let seen = order.lock().map(|o| o.clone()).unwrap_or_default();
        assert_eq!(seen, vec![(10, NativeObject(0xd3d)), (20, NativeObject(0xd3d))]);
    }
}
