//! The voice socket's dedicated reader thread.
//!
//! Inbound datagrams (IP discovery replies, keepalive echoes, other users'
//! audio) are offered to registered callbacks. Callbacks deliver into the
//! cooperative domain over channels, which re-enter the scheduler safely.

use parking_lot::Mutex;
use std::{
    io::ErrorKind,
    net::UdpSocket,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::trace;

/// A datagram consumer. Returning `true` marks the datagram consumed and
/// removes the callback, guaranteeing single delivery to one-shot waiters.
pub(crate) type Callback = Box<dyn FnMut(&[u8]) -> bool + Send>;

#[derive(Clone, Default)]
pub(crate) struct CallbackRegistry {
    inner: Arc<Mutex<Vec<Callback>>>,
}

impl CallbackRegistry {
    pub(crate) fn register(&self, callback: Callback) {
        self.inner.lock().push(callback);
    }

    /// Offers `data` to every callback, dropping those that consume it.
    pub(crate) fn dispatch(&self, data: &[u8]) {
        self.inner.lock().retain_mut(|callback| !callback(data));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Owns the background thread draining the voice UDP socket.
pub(crate) struct SocketReader {
    end: Arc<AtomicBool>,
}

impl SocketReader {
    /// Spawns the reader over its own clone of the voice socket.
    pub(crate) fn start(socket: UdpSocket, registry: CallbackRegistry) -> std::io::Result<Self> {
        let end = Arc::new(AtomicBool::new(false));
        let thread_end = Arc::clone(&end);

        // The timeout bounds how long a stop request can go unnoticed.
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        std::thread::Builder::new()
            .name("lorikeet voice rx".into())
            .spawn(move || {
                trace!("UDP reader thread started.");
                let mut buffer = [0u8; 2048];

                while !thread_end.load(Ordering::Relaxed) {
                    match socket.recv(&mut buffer) {
                        Ok(len) => registry.dispatch(&buffer[..len]),
                        Err(e)
                            if e.kind() == ErrorKind::WouldBlock
                                || e.kind() == ErrorKind::TimedOut => {},
                        Err(_) => {},
                    }
                }

                trace!("UDP reader thread finished.");
            })?;

        Ok(Self { end })
    }

    /// Signals the thread to exit. Idempotent.
    pub(crate) fn stop(&self) {
        self.end.store(true, Ordering::Relaxed);
    }
}

impl Drop for SocketReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    /// Builds a discovery-style reply datagram for `ssrc`.
    fn discovery_reply(ssrc: u32) -> Vec<u8> {
        let mut data = vec![0u8; 74];
        BigEndian::write_u16(&mut data[0..2], 2);
        BigEndian::write_u16(&mut data[2..4], 70);
        BigEndian::write_u32(&mut data[4..8], ssrc);
        data
    }

    #[test]
    fn matching_datagram_wakes_exactly_one_waiter() {
        let registry = CallbackRegistry::default();
        let (tx, rx) = flume::bounded::<Vec<u8>>(1);

        registry.register(Box::new(move |data| {
            if data.len() == 74 && BigEndian::read_u32(&data[4..8]) == 41 {
                let _ = tx.send(data.to_vec());
                true
            } else {
                false
            }
        }));

        // Non-matching traffic leaves the waiter registered.
        registry.dispatch(&discovery_reply(99));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len(), 1);

        registry.dispatch(&discovery_reply(41));
        assert_eq!(rx.try_recv().unwrap().len(), 74);
        assert_eq!(registry.len(), 0);

        // A duplicate reply finds no registration left to wake.
        registry.dispatch(&discovery_reply(41));
        assert!(rx.try_recv().is_err());
    }
}
