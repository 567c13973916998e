//! The process-wide periodic driver: drains each registered store's
//! lock-wait queue and timeout queue on a fixed tick, and occasionally
//! probes available memory.
//!
//! Mirrors the teacher's `Cache::monitor`: a loop built on an
//! [`async_io::Timer`] interval that the caller spawns on whatever
//! executor they like (the crate stays executor-agnostic, matching the
//! teacher's `smol`/`async-std`/`tokio`-compatible test suite).
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_io::Timer;
use async_lock::Mutex;
use futures_lite::stream::StreamExt;
use log::{trace, warn};
use sysinfo::System;

use crate::config::ManagerConfig;
use crate::registry::StoreRegistry;

/// Below this many available bytes, the sweeper logs a "memory low"
/// warning and flips [`Sweeper::memory_low`]. Advisory only: no operation
/// consults this flag, per the explicit non-goal against capacity
/// enforcement.
const LOW_MEMORY_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

/// Source of "available memory" readings, abstracted so tests can inject a
/// deterministic probe instead of querying the real host.
pub trait MemoryProbe: Send {
    fn available_bytes(&mut self) -> u64;
}

/// Default probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn available_bytes(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory()
    }
}

/// The periodic sweeper. One instance drives every store in a
/// [`StoreRegistry`]; construct it with `Arc::new` and spawn
/// [`Sweeper::run`] on an executor.
pub struct Sweeper {
    registry: Arc<StoreRegistry>,
    config: ManagerConfig,
    tick_guard: Mutex<()>,
    last_memory_check: Mutex<Option<Instant>>,
    memory_low: AtomicBool,
    memory_probe: std::sync::Mutex<Box<dyn MemoryProbe>>,
}

impl Sweeper {
    pub fn new(registry: Arc<StoreRegistry>, config: ManagerConfig) -> Self {
        Self::with_probe(registry, config, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(registry: Arc<StoreRegistry>, config: ManagerConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            registry,
            config,
            tick_guard: Mutex::new(()),
            last_memory_check: Mutex::new(None),
            memory_low: AtomicBool::new(false),
            memory_probe: std::sync::Mutex::new(probe),
        }
    }

    /// Whether the most recent memory probe reported less than
    /// [`LOW_MEMORY_THRESHOLD_BYTES`] available. Purely advisory.
    pub fn memory_low(&self) -> bool {
        self.memory_low.load(Ordering::Relaxed)
    }

    /// Runs the periodic driver forever. Spawn this on your executor; it
    /// never returns.
    pub async fn run(self: Arc<Self>) {
        let mut interval = Timer::interval(self.config.timeout_check_period());
        loop {
            interval.next().await;
            self.tick().await;
        }
    }

    /// Runs a single tick. Exposed directly so tests can drive the
    /// sweeper deterministically instead of waiting on a real timer.
    pub async fn tick(&self) {
        let guard = match self.tick_guard.try_lock() {
            Some(g) => g,
            None => {
                trace!("sweeper tick skipped: previous tick still in flight");
                return;
            }
        };

        for store in self.registry.store_handles().await {
            store.process_lock_wait_queue().await;
            store.process_timeouts().await;
        }

        self.maybe_check_memory().await;
        drop(guard);
    }

    async fn maybe_check_memory(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_memory_check.lock().await;
            let due = match *last {
                Some(t) => now.duration_since(t) >= self.config.memory_check_period(),
                None => true,
            };
            if !due {
                return;
            }
            *last = Some(now);
        }

        let available = {
            let mut probe = self.memory_probe.lock().expect("memory probe mutex poisoned");
            probe.available_bytes()
        };

        let low = available < LOW_MEMORY_THRESHOLD_BYTES;
        self.memory_low.store(low, Ordering::Relaxed);
        if low {
            warn!(
                "available memory ({} bytes) below threshold ({} bytes)",
                available, LOW_MEMORY_THRESHOLD_BYTES
            );
        }
    }
}
