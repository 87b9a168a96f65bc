//! Kernel netlink transport
//!
//! A generic-netlink socket towards the kernel's simulated-radio
//! driver, built on `neli`. Startup resolves the family id and sends
//! REGISTER through the typed `NlSocketHandle`; the runtime loop then
//! drives the underlying socket nonblocking through the tokio reactor,
//! exchanging whole messages as bytes with the daemon's event channel
//! like every other transport.

use crate::daemon::client::{Client, ClientId, ClientKind};
use crate::daemon::core::DaemonEvent;
use crate::hwsim;
use crate::{MediumError, Result};
use neli::consts::socket::NlFamily;
use neli::socket::{NlSocket, NlSocketHandle};
use std::io;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

/// Receive buffer for one netlink message.
const RECV_BUF_LEN: usize = 8192;

/// Nonblocking socket driven by the tokio reactor.
#[derive(Debug)]
pub struct AsyncNetlinkSocket {
    inner: AsyncFd<NlSocket>,
}

impl AsyncNetlinkSocket {
    pub fn new(socket: NlSocket) -> io::Result<Self> {
        socket.nonblock()?;
        Ok(Self {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub async fn recv(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv(&mut buf[..], 0)) {
                Ok(result) => {
                    let len = result? as usize;
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send(&self, msg: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => return result.map(|len| len as usize),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Bring up the kernel transport: resolve the family, register for
/// frames, and run reader/writer tasks against the daemon's channels.
///
/// Returns the netlink client id and the resolved family id.
pub fn start(events: mpsc::UnboundedSender<DaemonEvent>) -> Result<(ClientId, u16)> {
    let mut handle = NlSocketHandle::connect(NlFamily::Generic, None, &[])
        .map_err(|e| MediumError::Transport(format!("netlink socket: {}", e)))?;
    let family_id = handle.resolve_genl_family(hwsim::FAMILY_NAME).map_err(|e| {
        MediumError::Transport(format!(
            "family {} not registered: {}",
            hwsim::FAMILY_NAME,
            e
        ))
    })?;

    handle
        .send(hwsim::register_msg(family_id))
        .map_err(|e| MediumError::Transport(format!("netlink register: {}", e)))?;
    tracing::info!("registered with {} (family {})", hwsim::FAMILY_NAME, family_id);

    // The typed handle did its setup work; the runtime loop runs the
    // raw socket through the reactor.
    let socket = unsafe { NlSocket::from_raw_fd(handle.into_raw_fd()) };
    let socket = Arc::new(
        AsyncNetlinkSocket::new(socket)
            .map_err(|e| MediumError::Transport(format!("netlink reactor: {}", e)))?,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(ClientKind::Netlink, tx);
    let id = client.id;
    events
        .send(DaemonEvent::ClientConnected(client))
        .map_err(|_| MediumError::Transport("daemon gone".to_string()))?;

    // Reader: kernel messages become ingress events.
    let reader = Arc::clone(&socket);
    let reader_events = events;
    tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(data) => {
                    if reader_events
                        .send(DaemonEvent::Ingress { client: id, data })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("netlink recv: {}", e);
                    let _ = reader_events.send(DaemonEvent::ClientDisconnected(id));
                    break;
                }
            }
        }
    });

    // Writer: egress messages go back to the kernel.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = socket.send(&msg).await {
                tracing::error!("netlink send: {}", e);
            }
        }
    });

    Ok((id, family_id))
}
