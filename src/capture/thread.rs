use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::anyhow;

use crate::error::{GraphicsError, GraphicsResult, violation};

use super::provider::ThreadAttachment;

const THREAD_NAME: &str = "snow-gs-capture";

/// Work the capture thread repeats while it runs.
pub(crate) trait ThreadWork: Send + Sync + 'static {
    fn attach(&self) -> GraphicsResult<ThreadAttachment>;

    /// Polls every source once; true when any produced a frame.
    fn sweep(&self) -> bool;
}

#[derive(Debug, Default)]
struct Control {
    refs: usize,
    /// Bumped on every 0->1 and 1->0 transition. A worker exits as soon
    /// as it observes a generation other than its own.
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        match self.control.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Reference-counted background polling thread. The thread exists only
/// while more starts than stops have been issued.
pub(crate) struct CaptureThread {
    shared: Arc<Shared>,
    interval: Duration,
}

impl CaptureThread {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            interval,
        }
    }

    pub(crate) fn start(&self, work: Arc<dyn ThreadWork>) -> GraphicsResult<()> {
        let mut control = self.shared.lock();
        control.refs += 1;
        if control.refs > 1 {
            return Ok(());
        }

        control.generation += 1;
        let generation = control.generation;
        let stale = control.handle.take();
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(&shared, work.as_ref(), generation, interval));
        match spawned {
            Ok(handle) => {
                control.handle = Some(handle);
                drop(control);
                if let Some(stale) = stale {
                    let _ = stale.join();
                }
                log::debug!("capture thread started (generation {generation})");
                Ok(())
            }
            Err(err) => {
                control.refs -= 1;
                Err(GraphicsError::Platform(anyhow!(
                    "failed to spawn capture thread: {err}"
                )))
            }
        }
    }

    pub(crate) fn stop(&self) -> GraphicsResult<()> {
        let mut control = self.shared.lock();
        if control.refs == 0 {
            return Err(violation(GraphicsError::ContextViolation(
                "capture thread stopped more often than started".into(),
            )));
        }
        control.refs -= 1;
        if control.refs > 0 {
            return Ok(());
        }

        control.generation += 1;
        let handle = control.handle.take();
        drop(control);
        self.shared.wake.notify_all();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        log::debug!("capture thread stopped");
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shared.lock().refs > 0
    }

    pub(crate) fn refs(&self) -> usize {
        self.shared.lock().refs
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        let mut control = self.shared.lock();
        if control.refs > 0 {
            log::warn!(
                "capture thread dropped with {} outstanding starts",
                control.refs
            );
        }
        control.refs = 0;
        control.generation += 1;
        let handle = control.handle.take();
        drop(control);
        self.shared.wake.notify_all();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run(shared: &Shared, work: &dyn ThreadWork, generation: u64, interval: Duration) {
    let _attachment = match work.attach() {
        Ok(attachment) => attachment,
        Err(err) => {
            log::error!("capture thread could not attach: {err}");
            return;
        }
    };

    loop {
        if shared.lock().generation != generation {
            break;
        }
        if work.sweep() {
            continue;
        }
        let control = shared.lock();
        if control.generation != generation {
            break;
        }
        let _ = shared.wake.wait_timeout(control, interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWork {
        attaches: AtomicUsize,
        sweeps: AtomicUsize,
    }

    impl ThreadWork for CountingWork {
        fn attach(&self) -> GraphicsResult<ThreadAttachment> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(()))
        }

        fn sweep(&self) -> bool {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn balanced_starts_and_stops_stop_the_thread() -> GraphicsResult<()> {
        let work = Arc::new(CountingWork::default());
        let thread = CaptureThread::new(Duration::from_millis(1));
        for _ in 0..3 {
            thread.start(work.clone())?;
        }
        thread.stop()?;
        thread.stop()?;
        assert!(thread.is_running());
        thread.stop()?;
        assert!(!thread.is_running());
        assert_eq!(work.attaches.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn restart_attaches_again() -> GraphicsResult<()> {
        let work = Arc::new(CountingWork::default());
        let thread = CaptureThread::new(Duration::from_millis(1));
        thread.start(work.clone())?;
        thread.stop()?;
        thread.start(work.clone())?;
        thread.stop()?;
        assert_eq!(work.attaches.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn unmatched_stop_is_a_violation() {
        let thread = CaptureThread::new(Duration::from_millis(1));
        assert!(matches!(
            thread.stop(),
            Err(GraphicsError::ContextViolation(_))
        ));
        assert_eq!(thread.refs(), 0);
    }
}
