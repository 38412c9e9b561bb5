//! Cancellable one-shot timer backing the termination grace period

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct TimerShared {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Runs a callback on a dedicated thread after a delay unless cancelled
/// first. Dropping the timer cancels it.
pub struct GraceTimer {
    shared: Arc<TimerShared>,
    deadline: Instant,
}

impl GraceTimer {
    pub fn start<F>(name: String, delay: Duration, on_expire: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
        });
        let deadline = Instant::now() + delay;

        let waiter = shared.clone();
        thread::Builder::new().name(name).spawn(move || {
            let mut cancelled = waiter.cancelled.lock();
            while !*cancelled {
                if waiter.signal.wait_until(&mut cancelled, deadline).timed_out() {
                    break;
                }
            }
            let fire = !*cancelled;
            drop(cancelled);
            if fire {
                on_expire();
            }
        })?;

        Ok(Self { shared, deadline })
    }

    pub fn cancel(&self) {
        *self.shared.cancelled.lock() = true;
        self.shared.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.cancelled.lock()
    }

    /// Time left before expiry, zero once due
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_timer_fires() {
        let (tx, rx) = mpsc::channel();
        let _timer = GraceTimer::start("t-fire".into(), Duration::from_millis(10), move || {
            tx.send(()).ok();
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let (tx, rx) = mpsc::channel();
        let timer = GraceTimer::start("t-cancel".into(), Duration::from_millis(50), move || {
            tx.send(()).ok();
        })
        .unwrap();
        timer.cancel();
        assert!(timer.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_drop_cancels() {
        let (tx, rx) = mpsc::channel();
        let timer = GraceTimer::start("t-drop".into(), Duration::from_millis(50), move || {
            tx.send(()).ok();
        })
        .unwrap();
        drop(timer);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
