// crates/echonet-rs/src/transport/udp.rs
//! The production transport: a multicast-joined UDP socket on 3610.

use crate::error::EchonetError;
use crate::log::{dev_debug, dev_error, dev_warn};
use crate::transport::{InboundDatagram, PacketTransport};
use crate::types::{C_ECHONET_PORT, C_MAX_FRAME_SIZE, C_MULTICAST_ADDR};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the inbound datagram channel. Inbound UDP is bursty during
/// discovery; the session drains quickly, so a short queue suffices.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Backoff applied after a transient receive error before retrying.
const RECEIVE_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_ips: HashSet<IpAddr>,
    cancel: CancellationToken,
}

impl UdpTransport {
    /// Binds 0.0.0.0:3610 with address reuse, joins the ECHONET Lite
    /// multicast group, and spawns the receive task.
    ///
    /// Returns the transport and the inbound channel. `extra_local_ips`
    /// lists addresses of this host beyond the auto-detected default-route
    /// address (interface enumeration is the caller's concern).
    pub fn bind(
        extra_local_ips: &[IpAddr],
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, mpsc::Receiver<InboundDatagram>), EchonetError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, C_ECHONET_PORT).into())?;
        socket.join_multicast_v4(&C_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_nonblocking(true)?;

        let socket = Arc::new(UdpSocket::from_std(socket.into())?);

        let mut local_ips: HashSet<IpAddr> = extra_local_ips.iter().copied().collect();
        local_ips.insert(IpAddr::V4(Ipv4Addr::LOCALHOST));
        if let Some(ip) = detect_default_local_ip() {
            local_ips.insert(ip);
        }

        let transport = Arc::new(Self {
            socket: socket.clone(),
            local_ips,
            cancel: cancel.clone(),
        });

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        tokio::spawn(receive_loop(socket, tx, cancel));

        Ok((transport, rx))
    }
}

impl PacketTransport for UdpTransport {
    fn send_to(&self, ip: IpAddr, payload: &[u8]) -> Result<usize, EchonetError> {
        if payload.len() > C_MAX_FRAME_SIZE {
            return Err(EchonetError::FrameTooLarge);
        }
        let addr = SocketAddr::new(ip, C_ECHONET_PORT);
        match self.socket.try_send_to(payload, addr) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // UDP send buffers are rarely full; treat it as a dropped
                // datagram and let the session retry schedule recover.
                dev_warn!(ip, "send buffer full, datagram dropped");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_local_ip(&self, ip: IpAddr) -> bool {
        self.local_ips.contains(&ip)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Receives datagrams until cancellation or socket closure. Transient
/// errors are logged and retried after a short backoff.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<InboundDatagram>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; C_MAX_FRAME_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                dev_debug!("receive loop cancelled");
                return;
            }
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((len, source)) => {
                        let datagram = InboundDatagram {
                            payload: buffer[..len].to_vec(),
                            source,
                        };
                        if tx.send(datagram).await.is_err() {
                            // Consumer is gone; nothing left to deliver to.
                            return;
                        }
                    }
                    Err(e) if is_closed_error(&e) => {
                        dev_debug!("socket closed, receive loop exiting");
                        return;
                    }
                    Err(e) => {
                        dev_error!("receive error: {}", e);
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}

fn is_closed_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
    )
}

/// Learns the default-route local address by "connecting" a throwaway UDP
/// socket to the multicast group. No datagram is sent.
fn detect_default_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket
        .connect((C_MULTICAST_ADDR, C_ECHONET_PORT))
        .ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
