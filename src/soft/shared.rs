use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use rustc_hash::FxHashMap;

use crate::resource::TextureDesc;
use crate::sync::KeyedMutex;

/// Texture storage visible to every soft device in the process through a
/// 32-bit handle. Legacy and NT handles share one namespace.
#[derive(Debug)]
pub(crate) struct SharedSurface {
    handle: u32,
    pub(crate) desc: TextureDesc,
    levels: Mutex<Vec<Vec<u8>>>,
    pub(crate) keyed_mutex: Option<KeyedMutex>,
}

type Registry = Mutex<FxHashMap<u32, Weak<SharedSurface>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

fn lock_registry() -> MutexGuard<'static, FxHashMap<u32, Weak<SharedSurface>>> {
    match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(0x40);

impl SharedSurface {
    pub(crate) fn publish(desc: TextureDesc, levels: Vec<Vec<u8>>, keyed: bool) -> Arc<Self> {
        let handle = NEXT_HANDLE.fetch_add(4, Ordering::Relaxed);
        let surface = Arc::new(Self {
            handle,
            desc,
            levels: Mutex::new(levels),
            keyed_mutex: keyed.then(KeyedMutex::new),
        });
        lock_registry().insert(handle, Arc::downgrade(&surface));
        log::debug!("published shared surface {handle:#x}");
        surface
    }

    pub(crate) fn open(handle: u32) -> Option<Arc<Self>> {
        lock_registry().get(&handle).and_then(Weak::upgrade)
    }

    pub(crate) fn handle(&self) -> u32 {
        self.handle
    }

    pub(crate) fn levels(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        match self.levels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SharedSurface {
    fn drop(&mut self) {
        let mut registry = lock_registry();
        if registry
            .get(&self.handle)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            registry.remove(&self.handle);
        }
    }
}
