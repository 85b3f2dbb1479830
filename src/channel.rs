/// Datagram transport used by both endpoints.
///
/// The protocol core talks to a [`Channel`] rather than a socket directly so
/// tests can slide a fault-injecting implementation underneath.
/// [`UdpChannel`] is the production implementation: one UDP socket with sized
/// buffers and a bounded read timeout, shared by a listener thread and a
/// window-manager thread.
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// Kernel buffer size requested for both directions. Enough to ride out a
/// close burst plus a full window of datagrams without drops.
const SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// A bidirectional, unreliable datagram transport.
///
/// `recv_from` must return within the implementation's read timeout,
/// surfacing expiry as `WouldBlock` or `TimedOut` (see [`is_timeout`]) so
/// listener threads can poll their stop flag.
pub trait Channel: Send + Sync {
    fn send_to(&self, frame: &[u8], dest: SocketAddr) -> io::Result<()>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Read timeouts come back as `WouldBlock` on unix and `TimedOut` on
/// windows; both mean "nothing arrived, try again".
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// UDP socket wrapper with sized kernel buffers.
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    /// Bind to `addr`. `read_timeout` bounds how long a `recv_from` blocks;
    /// keep it small (tens of milliseconds) so listener threads stay
    /// responsive to shutdown.
    pub fn bind(addr: SocketAddr, read_timeout: Duration) -> io::Result<UdpChannel> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        // Best effort; the OS may clamp these.
        let _ = socket.set_send_buffer_size(SOCKET_BUFFER);
        let _ = socket.set_recv_buffer_size(SOCKET_BUFFER);
        socket.bind(&addr.into())?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(UdpChannel { socket })
    }
}

impl Channel for UdpChannel {
    fn send_to(&self, frame: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(frame, dest).map(|_| ())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
