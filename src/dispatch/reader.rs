//! Background reader thread

use crate::connection::Connection;
use crate::error::Result;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Owns the reader thread draining a connection.
///
/// A transport failure is fatal: the thread reports it through
/// [`Connection::fail`] and exits.
pub struct Dispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(connection: Arc<Connection>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("wlbridge-reader".to_string())
            .spawn(move || reader_loop(&connection, &thread_stop))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the reader after its current iteration and joins it.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("📡 Reader thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn reader_loop(connection: &Connection, stop: &AtomicBool) {
    info!("📡 Reader thread started");
    while !stop.load(Ordering::SeqCst) && !connection.is_shutdown() {
        match connection.pump_once() {
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                connection.fail(&err);
                break;
            }
            Err(err) => warn!("📡 Reader iteration failed: {}", err),
        }
    }
    info!("📡 Reader thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::error::Error;
    use crate::protocol::loopback::LoopbackBackend;
    use crate::protocol::{ObjectId, ProtocolEvent};
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn connect() -> (Arc<LoopbackBackend>, Arc<Connection>) {
        let backend = Arc::new(LoopbackBackend::new());
        let config = ConnectionConfig {
            reader_poll_ms: 5,
            ..ConnectionConfig::default()
        };
        let connection = Connection::connect(backend.clone(), &config).unwrap();
        (backend, connection)
    }

    #[test]
    fn test_reader_delivers_buffer_release() {
        let (backend, connection) = connect();
        let busy = Arc::new(AtomicBool::new(true));
        connection.track_buffer(ObjectId(77), Arc::clone(&busy));

        let dispatcher = Dispatcher::spawn(Arc::clone(&connection)).unwrap();
        backend.inject(ProtocolEvent::BufferRelease { buffer: ObjectId(77) });

        assert!(wait_until(|| !busy.load(Ordering::Acquire)));
        dispatcher.shutdown();
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let (backend, connection) = connect();
        let failed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed);
        connection.set_fatal_hook(move |err: &Error| {
            assert!(err.is_fatal());
            flag.store(true, Ordering::SeqCst);
        });

        let dispatcher = Dispatcher::spawn(Arc::clone(&connection)).unwrap();
        backend.break_transport("connection reset by peer");

        assert!(wait_until(|| failed.load(Ordering::SeqCst)));
        assert!(wait_until(|| !dispatcher.is_running()));
        assert!(connection.is_shutdown());
    }
}
