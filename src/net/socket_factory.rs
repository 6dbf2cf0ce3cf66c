//! Sockets pinned to one loopback address.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Listen backlog for directory sockets.
const LISTEN_BACKLOG: u32 = 64;

/// Creates client and server sockets bound to one explicit loopback address.
///
/// The factory is a plain value so it can travel inside a [`RemoteRef`]
/// and be used again on the other side of the process boundary.
///
/// [`RemoteRef`]: crate::directory::RemoteRef
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeSocketFactory {
    address: IpAddr,
}

impl BridgeSocketFactory {
    /// Create a factory for `address`, which must be a loopback address.
    pub fn new(address: IpAddr) -> Result<Self> {
        if !address.is_loopback() {
            return Err(BridgeError::NotLoopback(address));
        }
        Ok(Self { address })
    }

    /// Loopback address both ends of every socket bind to.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    fn socket(&self) -> std::io::Result<TcpSocket> {
        match self.address {
            IpAddr::V4(_) => TcpSocket::new_v4(),
            IpAddr::V6(_) => TcpSocket::new_v6(),
        }
    }

    /// Bind a listening socket on exactly `(address, port)`.
    ///
    /// A port held by another listener fails with `AddrInUse`.
    pub fn bind_listener(&self, port: u16) -> Result<TcpListener> {
        let socket = self.socket()?;
        socket.bind(SocketAddr::new(self.address, port))?;
        Ok(socket.listen(LISTEN_BACKLOG)?)
    }

    /// Connect to `target`, binding the local end to the factory address.
    pub async fn connect(&self, target: SocketAddr) -> Result<TcpStream> {
        let socket = self.socket()?;
        socket.bind(SocketAddr::new(self.address, 0))?;
        let stream = socket.connect(target).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
