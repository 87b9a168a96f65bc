//! vhost-user transport seam
//!
//! The virtio plumbing (memory regions, vrings, feature negotiation)
//! belongs to an external vhost-user device library; the medium only
//! needs two virtqueues: guest transmissions arrive on `VQ_TX`, cloned
//! receptions leave on `VQ_RX`. The bundled adapter carries whole
//! netlink messages length-prefixed over the device's unix stream,
//! which is the contract the device side implements on top of its
//! vrings.

use crate::daemon::client::{Client, ClientKind};
use crate::daemon::core::DaemonEvent;
use crate::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// Guest-to-host queue (ingress).
pub const VQ_TX: u16 = 0;
/// Host-to-guest queue (cloned receptions).
pub const VQ_RX: u16 = 1;
/// Number of virtqueues a device exposes.
pub const NUM_VQS: u16 = 2;

/// Upper bound on one queued message.
const MAX_MSG_LEN: u32 = 64 * 1024;

/// Accept vhost-user device connections until the listener dies.
pub async fn run_vhost_server(
    listener: UnixListener,
    events: mpsc::UnboundedSender<DaemonEvent>,
) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        tokio::spawn(handle_device(stream, events.clone()));
    }
}

/// Drive one connected device: length-prefixed netlink messages in both
/// directions, `VQ_TX` in, `VQ_RX` out.
pub async fn handle_device(mut stream: UnixStream, events: mpsc::UnboundedSender<DaemonEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(ClientKind::VhostUser, tx);
    let id = client.id;
    if events.send(DaemonEvent::ClientConnected(client)).is_err() {
        return;
    }

    loop {
        tokio::select! {
            ready = stream.readable() => {
                if ready.is_err() {
                    break;
                }
                match read_message(&mut stream).await {
                    Ok(data) => {
                        if events.send(DaemonEvent::Ingress { client: id, data }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("vhost device {}: {}", id, e);
                        break;
                    }
                }
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if write_message(&mut stream, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = events.send(DaemonEvent::ClientDisconnected(id));
}

async fn read_message(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let len = stream.read_u32_le().await?;
    if len > MAX_MSG_LEN {
        return Err(crate::MediumError::Protocol(format!(
            "oversized vhost message ({} bytes)",
            len
        )));
    }
    let mut data = vec![0u8; len as usize];
    stream.read_exact(&mut data).await?;
    Ok(data)
}

async fn write_message(stream: &mut UnixStream, msg: &[u8]) -> Result<()> {
    stream.write_u32_le(msg.len() as u32).await?;
    stream.write_all(msg).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ingress_and_egress_framing() {
        let (mut guest_side, host_side) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_device(host_side, tx));

        let sender = match rx.recv().await.unwrap() {
            DaemonEvent::ClientConnected(client) => client.sender,
            other => panic!("expected connect, got {:?}", other),
        };

        // Guest transmission in.
        guest_side.write_u32_le(3).await.unwrap();
        guest_side.write_all(&[1, 2, 3]).await.unwrap();
        match rx.recv().await.unwrap() {
            DaemonEvent::Ingress { data, .. } => assert_eq!(data, vec![1, 2, 3]),
            other => panic!("expected ingress, got {:?}", other),
        }

        // Cloned reception out.
        sender.send(vec![9, 9]).unwrap();
        let len = guest_side.read_u32_le().await.unwrap();
        assert_eq!(len, 2);
        let mut payload = [0u8; 2];
        guest_side.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, [9, 9]);
    }

    #[tokio::test]
    async fn test_device_disconnect_reported() {
        let (guest_side, host_side) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_device(host_side, tx));

        let id = match rx.recv().await.unwrap() {
            DaemonEvent::ClientConnected(client) => client.id,
            other => panic!("expected connect, got {:?}", other),
        };
        drop(guest_side);
        match rx.recv().await.unwrap() {
            DaemonEvent::ClientDisconnected(gone) => assert_eq!(gone, id),
            other => panic!("expected disconnect, got {:?}", other),
        }
    }
}
