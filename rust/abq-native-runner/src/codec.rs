//! Length-prefixed JSON framing.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON. Reads and writes are whole-message transactions over a
//! blocking stream; nothing is buffered between calls.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::WorkerError;

/// Size of the length prefix in bytes.
const LEN_PREFIX_SIZE: usize = 4;

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming<T> {
    Message(T),
    /// The peer closed the connection cleanly between messages.
    Closed,
}

impl<T> Incoming<T> {
    pub fn into_message(self) -> Option<T> {
        match self {
            Self::Message(message) => Some(message),
            Self::Closed => None,
        }
    }
}

/// A duplex byte stream carrying framed JSON messages.
pub struct FramedStream<S> {
    stream: S,
}

impl<S> std::fmt::Debug for FramedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedStream").finish_non_exhaustive()
    }
}

impl<S: Read + Write> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Serialize `message` and write it as one frame.
    pub fn write<T: Serialize>(&mut self, message: &T) -> Result<(), WorkerError> {
        let payload = serde_json::to_vec(message)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            WorkerError::Internal(format!("message of {} bytes exceeds frame limit", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&payload);

        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        tracing::trace!(len, "frame written");
        Ok(())
    }

    /// Read one frame and decode it as `T`.
    ///
    /// A close before the first byte of the length prefix is
    /// [`Incoming::Closed`]; a close anywhere inside a frame is a broken
    /// connection.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<Incoming<T>, WorkerError> {
        let mut len_buf = [0u8; LEN_PREFIX_SIZE];
        if !self.read_prefix(&mut len_buf)? {
            tracing::trace!("peer closed connection");
            return Ok(Incoming::Closed);
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        // Grows with the bytes actually received; the prefix alone never
        // sizes an allocation.
        let mut payload = Vec::new();
        (&mut self.stream)
            .take(len as u64)
            .read_to_end(&mut payload)?;
        if payload.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} of {len} frame bytes", payload.len()),
            )
            .into());
        }
        tracing::trace!(len, "frame read");

        Ok(Incoming::Message(serde_json::from_slice(&payload)?))
    }

    /// Fills `buf`, returning `false` if the stream ended before any byte.
    fn read_prefix(&mut self, buf: &mut [u8; LEN_PREFIX_SIZE]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended after {filled} of {LEN_PREFIX_SIZE} length bytes"),
                    ));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// Connect to the worker socket at `addr` (`host:port`).
///
/// Every resolved address is tried with `timeout`. The returned stream has
/// Nagle's algorithm disabled: messages are small and latency matters more
/// than packet count on a local link.
pub fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, WorkerError> {
    let failed = |source: io::Error| WorkerError::ConnectionFailed {
        addr: addr.to_owned(),
        source,
    };

    let mut last_error = None;
    for socket_addr in addr.to_socket_addrs().map_err(failed)? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(failed)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%socket_addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(failed(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    })))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::{Value, json};

    use super::*;

    /// Reads from a fixed buffer, collects writes.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails every operation like a reset socket.
    struct Reset;

    impl Read for Reset {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::ConnectionReset.into())
        }
    }

    impl Write for Reset {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_four_byte_big_endian_header() {
        let mut framed = FramedStream::new(Duplex::new(Vec::new()));
        framed.write(&json!({"a": 1, "b": 2})).unwrap();

        let output = framed.into_inner().output;
        assert_eq!(&output[..4], &[0, 0, 0, 13]);
        assert_eq!(&output[4..], br#"{"a":1,"b":2}"#);
    }

    #[test]
    fn reads_exactly_the_prefixed_length() {
        let mut input = vec![0x00, 0x00, 0x00, 0x0D];
        input.extend_from_slice(br#"{"a":1,"b":2}"#);
        input.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);
        input.extend_from_slice(b"{}");

        let mut framed = FramedStream::new(Duplex::new(input));
        let first: Incoming<Value> = framed.read().unwrap();
        assert_eq!(first, Incoming::Message(json!({"a": 1, "b": 2})));
        let second: Incoming<Value> = framed.read().unwrap();
        assert_eq!(second, Incoming::Message(json!({})));
    }

    #[test]
    fn clean_close_is_not_an_error() {
        let mut framed = FramedStream::new(Duplex::new(Vec::new()));
        let read: Incoming<Value> = framed.read().unwrap();
        assert_eq!(read, Incoming::Closed);
    }

    #[test]
    fn truncated_frames_are_broken_connections() {
        let mut framed = FramedStream::new(Duplex::new(vec![0x00, 0x00]));
        let err = framed.read::<Value>().unwrap_err();
        assert!(matches!(err, WorkerError::ConnectionBroken(_)));

        let mut input = vec![0x00, 0x00, 0x00, 0x0D];
        input.extend_from_slice(br#"{"a":1"#);
        let mut framed = FramedStream::new(Duplex::new(input));
        let err = framed.read::<Value>().unwrap_err();
        assert!(matches!(err, WorkerError::ConnectionBroken(_)));
    }

    #[test]
    fn oversized_prefix_reads_only_what_arrives() {
        let mut input = vec![0xFF, 0xFF, 0xFF, 0xFF];
        input.extend_from_slice(b"{}");
        let mut framed = FramedStream::new(Duplex::new(input));
        let err = framed.read::<Value>().unwrap_err();
        assert!(matches!(err, WorkerError::ConnectionBroken(_)));
    }

    #[test]
    fn bad_json_is_malformed_not_broken() {
        let mut input = vec![0x00, 0x00, 0x00, 0x03];
        input.extend_from_slice(b"{{{");
        let mut framed = FramedStream::new(Duplex::new(input));
        let err = framed.read::<Value>().unwrap_err();
        assert!(matches!(err, WorkerError::MalformedMessage(_)));
    }

    #[test]
    fn io_failures_are_broken_connections() {
        let mut framed = FramedStream::new(Reset);
        assert!(matches!(
            framed.write(&json!({})).unwrap_err(),
            WorkerError::ConnectionBroken(_)
        ));
        assert!(matches!(
            framed.read::<Value>().unwrap_err(),
            WorkerError::ConnectionBroken(_)
        ));
    }

    #[test]
    fn tcp_round_trip() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut framed = FramedStream::new(stream);
            let message: Incoming<Value> = framed.read().unwrap();
            framed.write(&message.into_message().unwrap()).unwrap();
        });

        let stream = connect(&addr, Duration::from_secs(5)).unwrap();
        assert!(stream.nodelay().unwrap());
        let mut framed = FramedStream::new(stream);
        framed.write(&json!({"ping": true})).unwrap();
        let echoed: Incoming<Value> = framed.read().unwrap();
        assert_eq!(echoed, Incoming::Message(json!({"ping": true})));
        server.join().unwrap();
    }

    #[test]
    fn unreachable_address_is_connection_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, WorkerError::ConnectionFailed { .. }));
        assert!(err.to_string().contains(&addr));
    }
}
