//! Client records and registry
//!
//! A client is one connected transport endpoint: the kernel netlink
//! socket, a vhost-user device or an API-socket stream. The registry
//! tracks them uniformly; stations remember the client that most
//! recently transmitted as them so receptions can be routed back.

use crate::{MediumError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of a connected client.
pub type ClientId = Uuid;

/// The transport a client arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Kernel-side generic netlink.
    Netlink,
    /// vhost-user device (virtual machine).
    VhostUser,
    /// Framed API stream socket.
    ApiSock,
}

/// One connected client.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub kind: ClientKind,
    /// Outbound raw netlink messages; the owning transport task frames
    /// and writes them.
    pub sender: mpsc::UnboundedSender<Vec<u8>>,
    /// Registered clients receive broadcast receptions. Netlink and
    /// vhost-user clients register on connect; API clients send an
    /// explicit REGISTER.
    pub registered: bool,
    pub connected_at: DateTime<Utc>,
}

impl Client {
    pub fn new(kind: ClientKind, sender: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender,
            registered: !matches!(kind, ClientKind::ApiSock),
            connected_at: Utc::now(),
        }
    }
}

/// All connected clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, client: Client) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        id
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Mark an API client registered. Double registration is a protocol
    /// violation.
    pub fn register(&mut self, id: ClientId) -> Result<()> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| MediumError::ClientNotFound(id.to_string()))?;
        if client.registered {
            return Err(MediumError::Protocol("client already registered".to_string()));
        }
        client.registered = true;
        Ok(())
    }

    /// Unregister an API client. Unregistering an unregistered client is
    /// a protocol violation.
    pub fn unregister(&mut self, id: ClientId) -> Result<()> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| MediumError::ClientNotFound(id.to_string()))?;
        if !client.registered {
            return Err(MediumError::Protocol("client not registered".to_string()));
        }
        client.registered = false;
        Ok(())
    }

    /// Send raw message bytes to one client.
    pub fn send(&self, id: ClientId, msg: Vec<u8>) -> Result<()> {
        let client = self
            .clients
            .get(&id)
            .ok_or_else(|| MediumError::ClientNotFound(id.to_string()))?;
        client
            .sender
            .send(msg)
            .map_err(|_| MediumError::Transport(format!("client {} send queue closed", id)))
    }

    /// Send a copy to every registered client.
    pub fn broadcast(&self, msg: &[u8]) {
        for client in self.clients.values().filter(|c| c.registered) {
            if client.sender.send(msg.to_vec()).is_err() {
                tracing::warn!("client {} send queue closed during broadcast", client.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(kind: ClientKind) -> (Client, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Client::new(kind, tx), rx)
    }

    #[test]
    fn test_registration_defaults() {
        let (netlink, _rx) = client(ClientKind::Netlink);
        assert!(netlink.registered);
        let (vhost, _rx) = client(ClientKind::VhostUser);
        assert!(vhost.registered);
        let (api, _rx) = client(ClientKind::ApiSock);
        assert!(!api.registered);
    }

    #[test]
    fn test_register_protocol() {
        let mut registry = ClientRegistry::new();
        let (api, _rx) = client(ClientKind::ApiSock);
        let id = registry.add(api);

        registry.register(id).unwrap();
        assert!(registry.register(id).is_err());
        registry.unregister(id).unwrap();
        assert!(registry.unregister(id).is_err());
    }

    #[test]
    fn test_broadcast_skips_unregistered() {
        let mut registry = ClientRegistry::new();
        let (api, mut api_rx) = client(ClientKind::ApiSock);
        registry.add(api);
        let (netlink, mut nl_rx) = client(ClientKind::Netlink);
        registry.add(netlink);

        registry.broadcast(&[1, 2, 3]);
        assert_eq!(nl_rx.try_recv().unwrap(), vec![1, 2, 3]);
        assert!(api_rx.try_recv().is_err());
    }

    #[test]
    fn test_direct_send_ignores_registration() {
        let mut registry = ClientRegistry::new();
        let (api, mut api_rx) = client(ClientKind::ApiSock);
        let id = registry.add(api);

        registry.send(id, vec![9]).unwrap();
        assert_eq!(api_rx.try_recv().unwrap(), vec![9]);

        registry.remove(id).unwrap();
        assert!(registry.send(id, vec![9]).is_err());
    }
}
