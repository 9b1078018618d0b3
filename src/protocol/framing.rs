//! The framed request channel: one length-prefixed send, one length-prefixed receive, on a fresh
//! connection per exchange. The remote daemon's protocol carries no session state the manager
//! relies on, so per-call connections keep failure recovery simple — there is never a stale
//! connection to detect and tear down.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::FramingError;

/// A request/response exchange with the remote-forwarding daemon.
///
/// Messages are bytes, not `str`: a `write` command embeds a raw WPK chunk, which is not
/// guaranteed to be valid UTF-8.
pub trait RequestChannel: Send + Sync {
    fn exchange(&self, msg: &[u8]) -> Result<Vec<u8>, FramingError>;
}

/// Connects to a local Unix stream socket for every exchange.
pub struct UnixSocketChannel {
    path: PathBuf,
    max_reply_size: usize,
    timeout: Option<Duration>,
}

impl UnixSocketChannel {
    pub fn new(path: impl AsRef<Path>, max_reply_size: usize) -> Self {
        UnixSocketChannel {
            path: path.as_ref().to_path_buf(),
            max_reply_size,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn connect(&self) -> Result<UnixStream, FramingError> {
        UnixStream::connect(&self.path).map_err(|source| FramingError::Connect {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl RequestChannel for UnixSocketChannel {
    fn exchange(&self, msg: &[u8]) -> Result<Vec<u8>, FramingError> {
        let mut stream = self.connect()?;
        if let Some(timeout) = self.timeout {
            let _ = stream.set_read_timeout(Some(timeout));
            let _ = stream.set_write_timeout(Some(timeout));
        }

        debug!(message = %String::from_utf8_lossy(msg), "sending message to agent");
        send_frame(&mut stream, msg).map_err(FramingError::Send)?;

        let reply = recv_frame(&mut stream, self.max_reply_size)?;
        debug!(message = %String::from_utf8_lossy(&reply), "receiving message from agent");

        Ok(reply)
    }
}

fn send_frame(stream: &mut UnixStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_u32::<BigEndian>(payload.len() as u32)?;
    stream.write_all(payload)?;
    stream.flush()
}

fn recv_frame(stream: &mut UnixStream, max_size: usize) -> Result<Vec<u8>, FramingError> {
    let len = stream.read_u32::<BigEndian>().map_err(FramingError::Recv)? as usize;
    if len > max_size {
        return Err(FramingError::TooLarge);
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).map_err(FramingError::Recv)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader};
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn spawn_echo_daemon(path: &Path, respond_with: &'static str) -> thread::JoinHandle<String> {
        let listener = UnixListener::bind(path).unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let len = reader.get_mut().read_u32::<BigEndian>().unwrap() as usize;
            let mut buf = vec![0u8; len];
            std::io::Read::read_exact(&mut reader, &mut buf).unwrap();
            let received = String::from_utf8(buf).unwrap();

            stream.write_u32::<BigEndian>(respond_with.len() as u32).unwrap();
            stream.write_all(respond_with.as_bytes()).unwrap();
            received
        })
    }

    #[test]
    fn exchange_round_trips_a_framed_message() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("request.sock");
        let handle = spawn_echo_daemon(&sock_path, "ok");

        // Give the listener a moment to bind before connecting.
        std::thread::sleep(Duration::from_millis(20));

        let channel = UnixSocketChannel::new(&sock_path, 65536);
        let reply = channel.exchange(b"111 com lock_restart -1").unwrap();

        assert_eq!(reply, b"ok");
        assert_eq!(handle.join().unwrap(), "111 com lock_restart -1");
    }

    #[test]
    fn exchange_fails_to_connect_when_no_daemon_listening() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("absent.sock");
        let channel = UnixSocketChannel::new(&sock_path, 65536);

        let err = channel.exchange(b"111 com lock_restart -1").unwrap_err();
        assert!(matches!(err, FramingError::Connect { .. }));
    }

    #[test]
    fn exchange_rejects_oversized_reply() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("toolarge.sock");
        let handle = spawn_echo_daemon(&sock_path, &"x".repeat(100));
        std::thread::sleep(Duration::from_millis(20));

        let channel = UnixSocketChannel::new(&sock_path, 10);
        let err = channel.exchange(b"111 com sha1 test.wpk").unwrap_err();

        assert!(matches!(err, FramingError::TooLarge));
        handle.join().unwrap();
    }
}
