//! TCP stream port.
//!
//! Args are a local bind address `"host:port"`. The port listens and the
//! link comes up when a peer attaches; it goes back down when the peer
//! leaves. The stream is treated as a packet pipe: one read is one packet,
//! no framing is imposed.

use super::{Port, PortCore, PortId, PortKind};
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;
use std::time::Duration;

pub struct TcpPort {
    core: PortCore,
    addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    stream: Mutex<Option<TcpStream>>,
    recv_timeout: Duration,
}

impl TcpPort {
    pub fn new(id: PortId, name: &str, args: &str, recv_timeout: Duration) -> Result<Self> {
        let addr = args
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("bad tcp bind address: {}", args)))?;
        Ok(Self {
            core: PortCore::new(id, name),
            addr,
            listener: Mutex::new(None),
            stream: Mutex::new(None),
            recv_timeout,
        })
    }

    /// Accepts a pending peer, if any, and attaches it.
    fn poll_accept(&self) -> Result<()> {
        let listener = self.listener.lock().unwrap();
        let listener = match listener.as_ref() {
            Some(listener) => listener,
            None => return Ok(()),
        };
        match listener.accept() {
            Ok((stream, _peer)) => {
                stream.set_read_timeout(Some(self.recv_timeout))?;
                *self.stream.lock().unwrap() = Some(stream);
                self.core.set_link_up(true);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::PortIo(e)),
        }
    }

    fn detach(&self) {
        *self.stream.lock().unwrap() = None;
        self.core.set_link_up(false);
    }
}

impl Port for TcpPort {
    fn core(&self) -> &PortCore {
        &self.core
    }

    fn kind(&self) -> PortKind {
        PortKind::Tcp
    }

    fn open(&self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)?;
        listener.set_nonblocking(true)?;
        *self.listener.lock().unwrap() = Some(listener);
        // Link stays down until a peer attaches.
        Ok(())
    }

    fn close(&self) {
        self.detach();
        *self.listener.lock().unwrap() = None;
    }

    fn send(&self, frame: &[u8]) -> Result<usize> {
        let mut stream = self.stream.lock().unwrap();
        match stream.as_mut() {
            Some(stream) => {
                stream.write_all(frame)?;
                Ok(frame.len())
            }
            None => Err(Error::PortIo(io::ErrorKind::NotConnected.into())),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.stream.lock().unwrap().is_none() {
            self.poll_accept()?;
            return Ok(None);
        }
        let mut stream = self.stream.lock().unwrap();
        let result = match stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => return Ok(None),
        };
        drop(stream);
        match result {
            // Peer closed the stream.
            Ok(0) => {
                self.detach();
                Ok(None)
            }
            Ok(n) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => {
                self.detach();
                Err(Error::PortIo(e))
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_args_fail_construction() {
        assert!(TcpPort::new(1, "p", "not-an-addr", Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_link_up_on_peer_attach() {
        let port = TcpPort::new(1, "p", "127.0.0.1:0", Duration::from_millis(10)).unwrap();
        port.open().unwrap();
        assert!(!port.link_up());

        let addr = port.local_addr().unwrap();
        let peer = TcpStream::connect(addr).unwrap();

        let mut buf = [0u8; 64];
        for _ in 0..100 {
            let _ = port.recv(&mut buf);
            if port.link_up() {
                break;
            }
        }
        assert!(port.link_up());
        drop(peer);
    }

    #[test]
    fn test_stream_roundtrip_and_detach() {
        let port = TcpPort::new(1, "p", "127.0.0.1:0", Duration::from_millis(10)).unwrap();
        port.open().unwrap();
        let addr = port.local_addr().unwrap();

        let mut peer = TcpStream::connect(addr).unwrap();
        peer.write_all(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 64];
        let mut got = None;
        for _ in 0..200 {
            match port.recv(&mut buf).unwrap() {
                Some(n) => {
                    got = Some(n);
                    break;
                }
                None => continue,
            }
        }
        assert_eq!(got, Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);

        drop(peer);
        for _ in 0..200 {
            let _ = port.recv(&mut buf);
            if !port.link_up() {
                break;
            }
        }
        assert!(!port.link_up());
    }

    #[test]
    fn test_send_without_peer_fails() {
        let port = TcpPort::new(1, "p", "127.0.0.1:0", Duration::from_millis(1)).unwrap();
        port.open().unwrap();
        assert!(port.send(&[1]).is_err());
    }
}
