//! Framed API-socket transport
//!
//! A stream socket carrying little-endian `u32 type, u32 data_len`
//! headers. Clients REGISTER to join the broadcast set, UNREGISTER to
//! leave it, and tunnel raw netlink messages with NETLINK. Every message
//! is answered with an ACK or INVALID header; when the daemon pushes a
//! frame out, it writes the message and synchronously reads the client's
//! ACK header back — the only synchronous back-pressure in the system.

use crate::daemon::client::{Client, ClientKind};
use crate::daemon::core::DaemonEvent;
use crate::{MediumError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

/// Protocol message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ApiMsgType {
    Invalid = 0,
    Ack = 1,
    Register = 2,
    Unregister = 3,
    Netlink = 4,
}

impl ApiMsgType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Ack),
            2 => Some(Self::Register),
            3 => Some(Self::Unregister),
            4 => Some(Self::Netlink),
            _ => None,
        }
    }
}

/// Safety valve on inbound payload size.
const MAX_DATA_LEN: u32 = 1024 * 1024;

/// Fixed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiHeader {
    pub msg_type: u32,
    pub data_len: u32,
}

impl ApiHeader {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[4..8].copy_from_slice(&self.data_len.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; Self::LEN]) -> Self {
        Self {
            msg_type: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            data_len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Accept API clients until the listener dies.
pub async fn run_api_server(
    listener: UnixListener,
    events: mpsc::UnboundedSender<DaemonEvent>,
) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        tokio::spawn(handle_connection(stream, events.clone()));
    }
}

/// Drive one API client connection.
///
/// Inbound headers are requests answered with a verdict from the daemon
/// task; outbound pushes are written framed and the client's ACK header
/// is read straight back.
pub async fn handle_connection(mut stream: UnixStream, events: mpsc::UnboundedSender<DaemonEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(ClientKind::ApiSock, tx);
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
                match serve_request(&mut stream, id, &events).await {
                    Ok(()) => {}
                    Err(e) => {
                        tracing::debug!("api client {}: {}", id, e);
                        break;
                    }
                }
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if push_message(&mut stream, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = events.send(DaemonEvent::ClientDisconnected(id));
}

async fn read_header(stream: &mut UnixStream) -> Result<ApiHeader> {
    let mut buf = [0u8; ApiHeader::LEN];
    stream.read_exact(&mut buf).await?;
    Ok(ApiHeader::decode(&buf))
}

/// Read one request, get the daemon's verdict, answer it.
async fn serve_request(
    stream: &mut UnixStream,
    id: crate::daemon::client::ClientId,
    events: &mpsc::UnboundedSender<DaemonEvent>,
) -> Result<()> {
    let hdr = read_header(stream).await?;
    if hdr.data_len > MAX_DATA_LEN {
        return Err(MediumError::Protocol(format!(
            "oversized api payload ({} bytes)",
            hdr.data_len
        )));
    }
    let mut data = vec![0u8; hdr.data_len as usize];
    stream.read_exact(&mut data).await?;

    let (resp_tx, resp_rx) = oneshot::channel();
    events
        .send(DaemonEvent::ApiRequest {
            client: id,
            msg_type: hdr.msg_type,
            data,
            resp: resp_tx,
        })
        .map_err(|_| MediumError::Transport("daemon gone".to_string()))?;
    let response = resp_rx.await.unwrap_or(ApiMsgType::Invalid as u32);

    let reply = ApiHeader {
        msg_type: response,
        data_len: 0,
    };
    stream.write_all(&reply.encode()).await?;
    Ok(())
}

/// Write one framed netlink message and wait for the ACK header.
async fn push_message(stream: &mut UnixStream, msg: &[u8]) -> Result<()> {
    let hdr = ApiHeader {
        msg_type: ApiMsgType::Netlink as u32,
        data_len: msg.len() as u32,
    };
    stream.write_all(&hdr.encode()).await?;
    stream.write_all(msg).await?;
    // Synchronous back-pressure: the client acknowledges every push.
    read_header(stream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let hdr = ApiHeader {
            msg_type: ApiMsgType::Register as u32,
            data_len: 42,
        };
        assert_eq!(ApiHeader::decode(&hdr.encode()), hdr);
    }

    #[test]
    fn test_msg_type_values() {
        assert_eq!(ApiMsgType::from_u32(0), Some(ApiMsgType::Invalid));
        assert_eq!(ApiMsgType::from_u32(4), Some(ApiMsgType::Netlink));
        assert_eq!(ApiMsgType::from_u32(99), None);
    }

    #[tokio::test]
    async fn test_request_response_cycle() {
        let (mut client_side, server_side) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_connection(server_side, tx));

        let connected = rx.recv().await.unwrap();
        assert!(matches!(connected, DaemonEvent::ClientConnected(_)));

        // REGISTER with no payload.
        let hdr = ApiHeader {
            msg_type: ApiMsgType::Register as u32,
            data_len: 0,
        };
        client_side.write_all(&hdr.encode()).await.unwrap();

        // The daemon stub acknowledges it.
        match rx.recv().await.unwrap() {
            DaemonEvent::ApiRequest { msg_type, resp, .. } => {
                assert_eq!(msg_type, ApiMsgType::Register as u32);
                resp.send(ApiMsgType::Ack as u32).unwrap();
            }
            other => panic!("expected request, got {:?}", other),
        }

        let mut buf = [0u8; ApiHeader::LEN];
        client_side.read_exact(&mut buf).await.unwrap();
        let reply = ApiHeader::decode(&buf);
        assert_eq!(reply.msg_type, ApiMsgType::Ack as u32);
        assert_eq!(reply.data_len, 0);
    }

    #[tokio::test]
    async fn test_push_waits_for_ack() {
        let (mut client_side, server_side) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_connection(server_side, tx));

        let sender = match rx.recv().await.unwrap() {
            DaemonEvent::ClientConnected(client) => client.sender,
            other => panic!("expected connect, got {:?}", other),
        };

        sender.send(vec![0xaa, 0xbb]).unwrap();

        let mut buf = [0u8; ApiHeader::LEN];
        client_side.read_exact(&mut buf).await.unwrap();
        let pushed = ApiHeader::decode(&buf);
        assert_eq!(pushed.msg_type, ApiMsgType::Netlink as u32);
        assert_eq!(pushed.data_len, 2);
        let mut payload = [0u8; 2];
        client_side.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, [0xaa, 0xbb]);

        // Acknowledge the push; a second push must only arrive after.
        sender.send(vec![0xcc]).unwrap();
        let ack = ApiHeader {
            msg_type: ApiMsgType::Ack as u32,
            data_len: 0,
        };
        client_side.write_all(&ack.encode()).await.unwrap();

        client_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(ApiHeader::decode(&buf).data_len, 1);
    }

    #[tokio::test]
    async fn test_disconnect_reported() {
        let (client_side, server_side) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_connection(server_side, tx));

        let connected = rx.recv().await.unwrap();
        let id = match connected {
            DaemonEvent::ClientConnected(client) => client.id,
            other => panic!("expected connect, got {:?}", other),
        };

        drop(client_side);
        match rx.recv().await.unwrap() {
            DaemonEvent::ClientDisconnected(gone) => assert_eq!(gone, id),
            other => panic!("expected disconnect, got {:?}", other),
        }
    }
}
