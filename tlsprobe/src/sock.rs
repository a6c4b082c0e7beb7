//! TCP socket with every byte interposed by the recorder. While replaying,
//! nothing touches the network at all.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use probe::error::Error;
use probe::recorder::SharedRecorder;

use crate::error::TlsError;

const RECV_CHUNK: usize = 16384 + 2048 + 5;

pub struct Socket {
    host: String,
    port: u16,
    recorder: SharedRecorder,
    stream: Option<TcpStream>,
}

impl Socket {
    pub fn new(host: impl Into<String>, port: u16, recorder: SharedRecorder) -> Socket {
        Socket {
            host: host.into(),
            port,
            recorder,
            stream: None,
        }
    }

    fn open(&mut self) -> Result<&mut TcpStream, TlsError> {
        if self.stream.is_none() {
            let addr = (self.host.as_str(), self.port);
            let stream = TcpStream::connect(addr).map_err(|err| {
                TlsError::Framework(Error::Io(format!(
                    "connect to {}:{}: {}",
                    self.host, self.port, err
                )))
            })?;
            if let (Ok(local), Ok(peer)) = (stream.local_addr(), stream.peer_addr()) {
                log::debug!("socket opened, local {} remote {}", local, peer);
            }
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| TlsError::Framework(Error::Io("socket not open".to_string())))
    }

    pub fn sendall(&mut self, data: &[u8]) -> Result<(), TlsError> {
        let emit = self.recorder.borrow_mut().socket_sendall(data)?;
        if emit {
            self.open()?
                .write_all(data)
                .map_err(|err| TlsError::Framework(Error::Io(err.to_string())))?;
        }
        Ok(())
    }

    /// One read from the network, bounded by `timeout`. An expired timeout
    /// and a peer close are distinct outcomes, and both replay faithfully.
    pub fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TlsError> {
        if let Some(replayed) = self.recorder.borrow_mut().inject_socket_recv()? {
            return match replayed {
                Some(data) if data.is_empty() => Err(TlsError::Closed),
                Some(data) => Ok(data),
                None => Err(TlsError::Timeout),
            };
        }

        let stream = self.open()?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| TlsError::Framework(Error::Io(err.to_string())))?;
        let mut buffer = vec![0u8; RECV_CHUNK];
        match stream.read(&mut buffer) {
            Ok(count) => {
                buffer.truncate(count);
                self.recorder.borrow_mut().trace_socket_recv(Some(&buffer))?;
                if count == 0 {
                    Err(TlsError::Closed)
                } else {
                    Ok(buffer)
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                self.recorder.borrow_mut().trace_socket_recv(None)?;
                Err(TlsError::Timeout)
            }
            Err(err) => Err(TlsError::Framework(Error::Io(err.to_string()))),
        }
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::debug!("closing socket");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Resolve the configured host, split by address family.
    pub fn resolve(host: &str, port: u16) -> (Vec<String>, Vec<String>) {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        if let Ok(addrs) = (host, port).to_socket_addrs() {
            for addr in addrs {
                match addr {
                    std::net::SocketAddr::V4(a) => v4.push(a.ip().to_string()),
                    std::net::SocketAddr::V6(a) => v6.push(a.ip().to_string()),
                }
            }
        }
        (v4, v6)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe::recorder::Recorder;

    #[test]
    fn replayed_socket_never_touches_the_network() {
        let recorder = Recorder::shared();
        recorder.borrow_mut().record();
        recorder
            .borrow_mut()
            .trace_socket_recv(Some(&[22, 3, 1, 0, 1, 0]))
            .unwrap();
        recorder.borrow_mut().trace_socket_recv(None).unwrap();
        recorder.borrow_mut().trace_socket_recv(Some(&[])).unwrap();
        assert!(recorder.borrow_mut().socket_sendall(b"hello").unwrap());

        recorder.borrow_mut().replay();
        // host is unroutable on purpose; replay must not connect
        let mut socket = Socket::new("host.invalid", 443, recorder);
        socket.sendall(b"hello").unwrap();
        assert_eq!(
            socket.recv(Duration::from_millis(10)).unwrap(),
            vec![22, 3, 1, 0, 1, 0]
        );
        assert_eq!(
            socket.recv(Duration::from_millis(10)).unwrap_err(),
            TlsError::Timeout
        );
        assert_eq!(
            socket.recv(Duration::from_millis(10)).unwrap_err(),
            TlsError::Closed
        );
    }

    #[test]
    fn diverging_send_is_a_replay_error() {
        let recorder = Recorder::shared();
        recorder.borrow_mut().record();
        assert!(recorder.borrow_mut().socket_sendall(b"recorded").unwrap());
        recorder.borrow_mut().replay();

        let mut socket = Socket::new("host.invalid", 443, recorder);
        let err = socket.sendall(b"different").unwrap_err();
        assert!(matches!(err, TlsError::Framework(Error::Replay(_))));
    }
}
