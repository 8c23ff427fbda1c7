use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Keys (feed URLs) currently being synced.
#[derive(Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `None` when the key is already held.
    pub fn try_acquire(&self, key: &str) -> Option<InFlightGuard> {
        if !self.lock().insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            keys: Arc::clone(&self.keys),
            key: key.to_string(),
        })
    }
}

pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Admits one sync cycle at a time.
#[derive(Default)]
pub struct CycleGate {
    running: AtomicBool,
}

impl CycleGate {
    pub fn try_enter(&self) -> Option<CycleTicket<'_>> {
        if self.running.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(CycleTicket { gate: self })
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct CycleTicket<'a> {
    gate: &'a CycleGate,
}

impl Drop for CycleTicket<'_> {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::SeqCst);
    }
}
