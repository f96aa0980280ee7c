//! The attention server.
//!
//! While it runs, the server thread owns the link's attention signal:
//! each time the signal is raised it fetches the attention pattern
//! with an attention query and passes it to the handlers registered
//! with [`Connection::add_attention_handler`].
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{event, span, Level};

use super::attention::WaitOutcome;
use super::connection::{Connection, LinkError};

pub struct AttentionServer {
    connection: Arc<Connection>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AttentionServer {
    pub fn start(connection: Arc<Connection>) -> Result<AttentionServer, LinkError> {
        if connection.set_server_active(true) {
            return Err(LinkError::ServerAlreadyActive);
        }
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let connection = Arc::clone(&connection);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("attention-server".to_string())
                .spawn(move || serve(&connection, &stop))
        };
        match thread {
            Ok(handle) => {
                event!(Level::INFO, "attention server started");
                Ok(AttentionServer {
                    connection,
                    stop,
                    thread: Some(handle),
                })
            }
            Err(e) => {
                connection.set_server_active(false);
                Err(LinkError::ServerSpawn(e))
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the server thread and wait for it to finish.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.stop.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                event!(Level::ERROR, "attention server thread panicked");
            }
            self.connection.set_server_active(false);
            event!(Level::INFO, "attention server stopped");
        }
    }
}

impl Drop for AttentionServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(connection: &Connection, stop: &AtomicBool) {
    let span = span!(Level::DEBUG, "attention server");
    let _enter = span.enter();
    let poll = connection.config().attention_poll();
    while !stop.load(Ordering::SeqCst) {
        if let WaitOutcome::TimedOut { .. } = connection.attention_signal().wait(poll) {
            continue;
        }
        let mut batch = connection.new_batch();
        let pattern = batch
            .add_attention_query()
            .map_err(LinkError::from)
            .and_then(|_| connection.execute(&mut batch))
            .map(|_| batch.result(0).map_or(0, |r| r.data()));
        match pattern {
            Ok(0) => event!(Level::DEBUG, "attention signal with empty pattern"),
            Ok(pattern) => {
                event!(Level::DEBUG, "attention pattern {pattern:#06x}");
                connection.dispatch_attention(pattern);
            }
            Err(e) => event!(Level::ERROR, "failed to fetch attention pattern: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::attention::{ActivityFlag, AttentionWaiter};
    use crate::config::LinkConfig;
    use crate::testing::{plain_response, ScriptedTransport};

    fn connection(pattern: u16) -> Arc<Connection> {
        Arc::new(Connection::new(
            Box::new(ScriptedTransport::answering(move |op| {
                plain_response(op, pattern)
            })),
            LinkConfig {
                attention_poll_ms: 10,
                ..LinkConfig::default()
            },
        ))
    }

    #[test]
    fn test_dispatch_to_matching_handler() {
        let conn = connection(0x0005);
        let (tx, rx) = mpsc::channel();
        let other = tx.clone();
        conn.add_attention_handler(
            0x0001,
            Box::new(move |pattern| {
                let _ = tx.send((1, pattern));
            }),
        );
        conn.add_attention_handler(
            0x0002,
            Box::new(move |pattern| {
                let _ = other.send((2, pattern));
            }),
        );
        let mut server = AttentionServer::start(Arc::clone(&conn)).unwrap();
        assert!(conn.server_active());
        assert!(matches!(
            AttentionServer::start(Arc::clone(&conn)),
            Err(LinkError::ServerAlreadyActive)
        ));
        conn.attention_signal().notify();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok((1, 0x0005)));
        server.stop();
        assert!(!conn.server_active());
        // The handler for bit 1 never saw the pattern.
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.stats().attention_dispatches, 1);
    }

    #[test]
    fn test_active_wait_uses_activity_flag() {
        let conn = connection(0x0001);
        let activity = Arc::new(ActivityFlag::new());
        {
            let activity = Arc::clone(&activity);
            conn.add_attention_handler(0x0001, Box::new(move |_| activity.set_down()));
        }
        let _server = AttentionServer::start(Arc::clone(&conn)).unwrap();
        activity.set_up();
        let notifier = Arc::clone(&conn);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.attention_signal().notify();
        });
        let outcome = AttentionWaiter::new(&conn, 0x0001, &activity)
            .wait(Duration::from_secs(5))
            .unwrap();
        assert!(outcome.is_signaled());
        handle.join().unwrap();
    }
}
