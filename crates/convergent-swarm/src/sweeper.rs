//! Background sweeps with an explicit lifecycle.
//!
//! A sweeper runs a closure on a dedicated worker thread at a fixed
//! interval, with a cooperative stop flag. The thread observes the flag
//! between sleep slices and terminates before the next tick. For
//! deterministic tests, skip the sweeper and drive the tick directly
//! (`evaporate_at`, `poll_once`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

/// How often the worker re-checks the stop flag while sleeping.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(50);

/// A background worker with start/stop lifecycle.
pub struct Sweeper {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a worker that runs `tick` every `interval` until stopped.
    pub fn start<F>(name: &str, interval: Duration, tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker_name = name.to_string();

        let handle = std::thread::spawn(move || {
            info!(sweeper = %worker_name, ?interval, "sweeper started");
            loop {
                // Sleep in slices so a stop lands promptly.
                let mut slept = Duration::ZERO;
                while slept < interval {
                    if worker_stop.load(Ordering::Relaxed) {
                        info!(sweeper = %worker_name, "sweeper stopped");
                        return;
                    }
                    let slice = STOP_CHECK_SLICE.min(interval - slept);
                    std::thread::sleep(slice);
                    slept += slice;
                }
                if worker_stop.load(Ordering::Relaxed) {
                    info!(sweeper = %worker_name, "sweeper stopped");
                    return;
                }
                tick();
            }
        });

        Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for it to terminate.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(sweeper = %self.name, "sweeper thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
