//! UDP datagram port.
//!
//! Args are `"src_ip:src_port,dst_ip:dst_port"`: the port binds the source
//! address and transmits every frame to the destination. One datagram is one
//! packet.

use super::{Port, PortCore, PortId, PortKind};
use crate::error::{Error, Result};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::RwLock;
use std::time::Duration;

pub struct UdpPort {
    core: PortCore,
    src: SocketAddr,
    dst: SocketAddr,
    socket: RwLock<Option<UdpSocket>>,
    recv_timeout: Duration,
}

impl UdpPort {
    pub fn new(id: PortId, name: &str, args: &str, recv_timeout: Duration) -> Result<Self> {
        let (src, dst) = parse_args(args)?;
        Ok(Self {
            core: PortCore::new(id, name),
            src,
            dst,
            socket: RwLock::new(None),
            recv_timeout,
        })
    }

    pub fn dst(&self) -> SocketAddr {
        self.dst
    }
}

fn parse_args(args: &str) -> Result<(SocketAddr, SocketAddr)> {
    let (src, dst) = args
        .split_once(',')
        .ok_or_else(|| Error::Config(format!("udp args must be \"src,dst\": {}", args)))?;
    let src = src
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("bad udp source address: {}", src)))?;
    let dst = dst
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("bad udp destination address: {}", dst)))?;
    Ok((src, dst))
}

impl Port for UdpPort {
    fn core(&self) -> &PortCore {
        &self.core
    }

    fn kind(&self) -> PortKind {
        PortKind::Udp
    }

    fn open(&self) -> Result<()> {
        let socket = UdpSocket::bind(self.src)?;
        socket.set_read_timeout(Some(self.recv_timeout))?;
        *self.socket.write().unwrap() = Some(socket);
        self.core.set_link_up(true);
        Ok(())
    }

    fn close(&self) {
        self.core.set_link_up(false);
        *self.socket.write().unwrap() = None;
    }

    fn send(&self, frame: &[u8]) -> Result<usize> {
        let socket = self.socket.read().unwrap();
        match socket.as_ref() {
            Some(socket) => Ok(socket.send_to(frame, self.dst)?),
            None => Err(Error::PortIo(io::ErrorKind::NotConnected.into())),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let socket = self.socket.read().unwrap();
        let socket = match socket.as_ref() {
            Some(socket) => socket,
            None => return Ok(None),
        };
        match socket.recv_from(buf) {
            Ok((n, _peer)) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(Error::PortIo(e)),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .read()
            .unwrap()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let (src, dst) = parse_args("127.0.0.1:5000, 127.0.0.1:5001").unwrap();
        assert_eq!(src, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(dst, "127.0.0.1:5001".parse().unwrap());
    }

    #[test]
    fn test_bad_args_fail_construction() {
        assert!(UdpPort::new(1, "p", "127.0.0.1:5000", Duration::from_millis(1)).is_err());
        assert!(UdpPort::new(1, "p", "nonsense,127.0.0.1:1", Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_open_flips_link() {
        let port = UdpPort::new(
            1,
            "p",
            "127.0.0.1:0,127.0.0.1:9",
            Duration::from_millis(1),
        )
        .unwrap();
        assert!(!port.link_up());
        port.open().unwrap();
        assert!(port.link_up());
        assert!(port.local_addr().is_some());
        port.close();
        assert!(!port.link_up());
        assert!(port.local_addr().is_none());
    }

    #[test]
    fn test_send_closed_port_fails() {
        let port = UdpPort::new(
            1,
            "p",
            "127.0.0.1:0,127.0.0.1:9",
            Duration::from_millis(1),
        )
        .unwrap();
        assert!(port.send(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_recv_timeout_is_none() {
        let port = UdpPort::new(
            1,
            "p",
            "127.0.0.1:0,127.0.0.1:9",
            Duration::from_millis(1),
        )
        .unwrap();
        port.open().unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(port.recv(&mut buf), Ok(None)));
    }

    #[test]
    fn test_datagram_roundtrip() {
        let port = UdpPort::new(
            1,
            "p",
            "127.0.0.1:0,127.0.0.1:9",
            Duration::from_millis(10),
        )
        .unwrap();
        port.open().unwrap();
        let addr = port.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.send_to(&[0xab, 0xcd], addr).unwrap();

        let mut buf = [0u8; 64];
        let mut got = None;
        for _ in 0..100 {
            if let Some(n) = port.recv(&mut buf).unwrap() {
                got = Some(n);
                break;
            }
        }
        assert_eq!(got, Some(2));
        assert_eq!(&buf[..2], &[0xab, 0xcd]);
    }
}
