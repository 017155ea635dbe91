//! UDP multicast sockets
//!
//! One socket per interface, bound to the protocol port and joined to the
//! multicast group on that interface. Sending and receiving share the same
//! socket; the receive loops feed decoded-address datagrams to the engine
//! task over a channel.
//!
//! A send that fails with `EPERM` (typically a firewall reload) invalidates
//! the interface's socket; the periodic sweep calls [`UdpTransport::maintain`]
//! to rebind it and the receive loop picks the fresh socket up on its next
//! iteration.

use std::ffi::CString;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::engine::Transport;
use crate::network::resolve::mac_to_ipv6_ll;
use crate::network::wire::MacAddr;
use crate::protocol::{Config, ProtocolError};

/// One datagram handed from a receive loop to the engine task.
#[derive(Debug)]
pub(crate) struct RecvFrame {
    pub iface: usize,
    pub src: IpAddr,
    pub bytes: Vec<u8>,
}

/// An interface bound and joined to the multicast group.
pub struct BoundInterface {
    pub name: String,
    /// OS interface index; doubles as the IPv6 scope id.
    pub index: u32,
    pub hwaddr: MacAddr,
    /// Our own addresses on this link, for the loop-back filter.
    pub own_addrs: Vec<IpAddr>,
    pub socket: Arc<UdpSocket>,
}

/// Get the OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32, ProtocolError> {
    let cname = CString::new(name)
        .map_err(|_| ProtocolError::Interface(format!("invalid interface name: {}", name)))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(ProtocolError::Interface(format!(
            "interface '{}' not found",
            name
        )));
    }
    Ok(index)
}

/// Read the interface's hardware address from sysfs.
pub fn if_hwaddr(name: &str) -> Result<MacAddr, ProtocolError> {
    let path = format!("/sys/class/net/{}/address", name);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ProtocolError::Interface(format!("{}: {}", path, e)))?;
    parse_mac(text.trim()).ok_or_else(|| {
        ProtocolError::Interface(format!("{}: unparsable address '{}'", name, text.trim()))
    })
}

/// Parse `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(s: &str) -> Option<MacAddr> {
    let mut octets = [0u8; 6];
    let mut parts = s.split(':');
    for octet in octets.iter_mut() {
        *octet = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(MacAddr::new(octets))
}

/// Bind one interface: create the socket, join the group, discover our own
/// addresses on the link.
pub fn bind_interface(name: &str, config: &Config) -> Result<BoundInterface, ProtocolError> {
    let index = if_index(name)?;
    let hwaddr = if_hwaddr(name)?;

    let std_socket = match config.mcast_group() {
        IpAddr::V6(group) => make_v6_socket(name, index, &group, config.port),
        IpAddr::V4(group) => make_v4_socket(name, &group, config.port),
    }
    .map_err(|e| ProtocolError::Socket(format!("{}: {}", name, e)))?;

    let socket = UdpSocket::from_std(std_socket)
        .map_err(|e| ProtocolError::Socket(format!("{}: {}", name, e)))?;

    let own_addrs = if config.ipv4_mode {
        own_ipv4_addr(name, config)
            .map(|a| vec![IpAddr::V4(a)])
            .unwrap_or_default()
    } else {
        vec![IpAddr::V6(mac_to_ipv6_ll(&hwaddr))]
    };

    debug!(iface = name, index, hwaddr = %hwaddr, ?own_addrs, "interface bound");

    Ok(BoundInterface {
        name: name.to_string(),
        index,
        hwaddr,
        own_addrs,
        socket: Arc::new(socket),
    })
}

fn make_v6_socket(
    name: &str,
    index: u32,
    group: &Ipv6Addr,
    port: u16,
) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_only_v6(true)?;
    socket.set_nonblocking(true)?;
    socket.bind_device(Some(name.as_bytes()))?;
    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v6(group, index)?;
    socket.set_multicast_if_v6(index)?;
    // Hop limit 1: never routed beyond this link.
    socket.set_multicast_hops_v6(1)?;
    Ok(socket.into())
}

fn make_v4_socket(name: &str, group: &Ipv4Addr, port: u16) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind_device(Some(name.as_bytes()))?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(1)?;
    Ok(socket.into())
}

/// Discover the interface's IPv4 address with a connected probe socket; the
/// kernel picks the source address without sending anything.
fn own_ipv4_addr(name: &str, config: &Config) -> Option<Ipv4Addr> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP)).ok()?;
    socket.bind_device(Some(name.as_bytes())).ok()?;
    let group = match config.mcast_group() {
        IpAddr::V4(g) => g,
        IpAddr::V6(_) => Ipv4Addr::new(224, 0, 0, 66),
    };
    socket
        .connect(&SocketAddr::from(SocketAddrV4::new(group, config.port)).into())
        .ok()?;
    match socket.local_addr().ok()?.as_socket() {
        Some(SocketAddr::V4(addr)) => Some(*addr.ip()),
        _ => None,
    }
}

struct TransportEntry {
    name: String,
    index: u32,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

/// Frame egress over the bound sockets. Shared between the engine (send
/// path) and the receive loops.
pub struct UdpTransport {
    port: u16,
    entries: Vec<TransportEntry>,
}

impl UdpTransport {
    pub fn new(port: u16, interfaces: &[BoundInterface]) -> Arc<Self> {
        Arc::new(Self {
            port,
            entries: interfaces
                .iter()
                .map(|bound| TransportEntry {
                    name: bound.name.clone(),
                    index: bound.index,
                    socket: Mutex::new(Some(bound.socket.clone())),
                })
                .collect(),
        })
    }

    fn socket_for(&self, iface: usize) -> Option<Arc<UdpSocket>> {
        self.entries
            .get(iface)?
            .socket
            .lock()
            .ok()?
            .as_ref()
            .cloned()
    }

    /// Rebind any interface whose socket was invalidated. Called from the
    /// sweep tick.
    pub fn maintain(&self, config: &Config) {
        for entry in &self.entries {
            let needs_reopen = entry
                .socket
                .lock()
                .map(|guard| guard.is_none())
                .unwrap_or(false);
            if !needs_reopen {
                continue;
            }
            match bind_interface(&entry.name, config) {
                Ok(bound) => {
                    if let Ok(mut guard) = entry.socket.lock() {
                        *guard = Some(bound.socket);
                    }
                    warn!(iface = %entry.name, "socket reopened");
                }
                Err(e) => warn!(iface = %entry.name, error = %e, "socket reopen failed"),
            }
        }
    }

    fn invalidate(&self, iface: usize) {
        if let Some(entry) = self.entries.get(iface) {
            if let Ok(mut guard) = entry.socket.lock() {
                *guard = None;
            }
        }
    }
}

impl Transport for Arc<UdpTransport> {
    fn send_frame(&self, iface: usize, dest: IpAddr, frame: &[u8]) -> bool {
        let Some(entry) = self.entries.get(iface) else {
            return false;
        };
        let Some(socket) = self.socket_for(iface) else {
            trace!(iface = %entry.name, "send on invalidated socket");
            return false;
        };

        let dest_addr: SocketAddr = match dest {
            // Link-local and multicast destinations need the scope id.
            IpAddr::V6(v6) => SocketAddrV6::new(v6, self.port, 0, entry.index).into(),
            IpAddr::V4(v4) => SocketAddrV4::new(v4, self.port).into(),
        };

        match socket.try_send_to(frame, dest_addr) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(iface = %entry.name, %dest, "send denied, invalidating socket");
                self.invalidate(iface);
                false
            }
            Err(e) => {
                debug!(iface = %entry.name, %dest, error = %e, "send failed");
                false
            }
        }
    }
}

/// Receive loop for one interface. Runs until the channel closes; survives
/// socket invalidation by polling for the reopened socket.
pub(crate) async fn run_recv_loop(
    transport: Arc<UdpTransport>,
    iface: usize,
    max_payload: usize,
    frame_tx: mpsc::Sender<RecvFrame>,
) {
    let mut buf = vec![0u8; max_payload];
    loop {
        let Some(socket) = transport.socket_for(iface) else {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if frame_tx.is_closed() {
                return;
            }
            continue;
        };

        tokio::select! {
            _ = frame_tx.closed() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let frame = RecvFrame {
                        iface,
                        src: src.ip(),
                        bytes: buf[..len].to_vec(),
                    };
                    if frame_tx.try_send(frame).is_err() {
                        trace!(iface, "receive queue full, dropping datagram");
                    }
                }
                Err(e) => {
                    debug!(iface, error = %e, "recv failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
}
