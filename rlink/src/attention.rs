//! Waiting for attention from the target.
//!
//! The transport raises an [`AttentionSignal`] whenever the target
//! reports that some attention source became active.  Waiting for a
//! particular source then works in one of two ways:
//!
//! - passively, when no [`AttentionServer`](crate::AttentionServer) is
//!   running: the waiting thread itself waits for the signal, fetches
//!   the attention pattern with an attention query and checks it
//!   against the mask it is interested in;
//! - actively, when the server is running: the server consumes the
//!   signal and dispatches the pattern to handlers, one of which
//!   lowers an [`ActivityFlag`]; the waiting thread just waits for
//!   that flag to go down.
use std::sync::{Condvar, LockResult, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{event, span, Level};

use super::connection::{Connection, LinkError};

pub(crate) fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled { elapsed: Duration },
    TimedOut { elapsed: Duration },
}

impl WaitOutcome {
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            WaitOutcome::Signaled { elapsed } | WaitOutcome::TimedOut { elapsed } => *elapsed,
        }
    }

    #[must_use]
    pub fn is_signaled(&self) -> bool {
        matches!(self, WaitOutcome::Signaled { .. })
    }
}

/// A latched, auto-clearing "attention arrived" notification.
#[derive(Debug, Default)]
pub struct AttentionSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl AttentionSignal {
    #[must_use]
    pub fn new() -> AttentionSignal {
        AttentionSignal::default()
    }

    pub fn notify(&self) {
        *relock(self.pending.lock()) = true;
        self.cond.notify_all();
    }

    /// Wait up to `timeout` for the signal, consuming it.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let start = Instant::now();
        let guard = relock(self.pending.lock());
        let (mut pending, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = start.elapsed();
        if *pending {
            *pending = false;
            WaitOutcome::Signaled { elapsed }
        } else {
            WaitOutcome::TimedOut { elapsed }
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        *relock(self.pending.lock())
    }
}

/// Tracks whether something (typically the CPU) is running.
#[derive(Debug, Default)]
pub struct ActivityFlag {
    active: Mutex<bool>,
    cond: Condvar,
}

impl ActivityFlag {
    #[must_use]
    pub fn new() -> ActivityFlag {
        ActivityFlag::default()
    }

    pub fn set_up(&self) {
        *relock(self.active.lock()) = true;
    }

    pub fn set_down(&self) {
        *relock(self.active.lock()) = false;
        self.cond.notify_all();
    }

    #[must_use]
    pub fn is_up(&self) -> bool {
        *relock(self.active.lock())
    }

    /// Wait up to `timeout` for the flag to be down.
    pub fn wait_down(&self, timeout: Duration) -> WaitOutcome {
        let start = Instant::now();
        let guard = relock(self.active.lock());
        let (active, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |active| *active)
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = start.elapsed();
        if *active {
            WaitOutcome::TimedOut { elapsed }
        } else {
            WaitOutcome::Signaled { elapsed }
        }
    }
}

/// Waits until the attention sources selected by `mask` report.
pub struct AttentionWaiter<'a> {
    connection: &'a Connection,
    mask: u16,
    activity: &'a ActivityFlag,
}

impl<'a> AttentionWaiter<'a> {
    #[must_use]
    pub fn new(connection: &'a Connection, mask: u16, activity: &'a ActivityFlag) -> Self {
        AttentionWaiter {
            connection,
            mask,
            activity,
        }
    }

    pub fn wait(&self, timeout: Duration) -> Result<WaitOutcome, LinkError> {
        let span = span!(Level::DEBUG, "attention wait", mask = self.mask);
        let _enter = span.enter();
        let outcome = if self.connection.server_active() {
            self.activity.wait_down(timeout)
        } else {
            self.wait_passive(timeout)?
        };
        match outcome {
            WaitOutcome::Signaled { elapsed } => {
                event!(Level::DEBUG, "attention after {elapsed:?}");
            }
            WaitOutcome::TimedOut { elapsed } => {
                event!(Level::INFO, "no attention after {elapsed:?}");
            }
        }
        self.connection.note_attention_wait(outcome);
        Ok(outcome)
    }

    fn wait_passive(&self, timeout: Duration) -> Result<WaitOutcome, LinkError> {
        let start = Instant::now();
        let signal = self.connection.attention_signal();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Ok(WaitOutcome::TimedOut {
                    elapsed: start.elapsed(),
                });
            }
            if let WaitOutcome::TimedOut { .. } = signal.wait(remaining) {
                return Ok(WaitOutcome::TimedOut {
                    elapsed: start.elapsed(),
                });
            }
            let mut batch = self.connection.new_batch();
            batch.add_attention_query()?;
            self.connection.execute(&mut batch)?;
            let pattern = batch.result(0).map_or(0, |r| r.data());
            if pattern & self.mask != 0 {
                self.activity.set_down();
                return Ok(WaitOutcome::Signaled {
                    elapsed: start.elapsed(),
                });
            }
            event!(
                Level::DEBUG,
                "discarding attention pattern {pattern:#06x} (waiting for {:#06x})",
                self.mask
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_signal_is_latched_and_consumed() {
        let signal = AttentionSignal::new();
        signal.notify();
        assert!(signal.is_pending());
        assert!(signal.wait(Duration::ZERO).is_signaled());
        assert!(!signal.is_pending());
        assert!(!signal.wait(Duration::from_millis(10)).is_signaled());
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(AttentionSignal::new());
        let notifier = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.notify();
        });
        assert!(signal.wait(Duration::from_secs(5)).is_signaled());
        handle.join().unwrap();
    }

    #[test]
    fn test_activity_flag() {
        let flag = Arc::new(ActivityFlag::new());
        assert!(flag.wait_down(Duration::ZERO).is_signaled());
        flag.set_up();
        let outcome = flag.wait_down(Duration::from_millis(30));
        assert!(!outcome.is_signaled());
        assert!(outcome.elapsed() >= Duration::from_millis(30));
        let lowerer = Arc::clone(&flag);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            lowerer.set_down();
        });
        assert!(flag.wait_down(Duration::from_secs(5)).is_signaled());
        handle.join().unwrap();
    }
}
