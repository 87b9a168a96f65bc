//! Daemon core
//!
//! One task owns the medium and every piece of simulation state.
//! Transports (netlink, vhost-user, API socket) run as their own tasks
//! and talk to the core exclusively over the event channel, so all state
//! transitions happen between event callbacks and no locking exists.

use crate::daemon::api::ApiMsgType;
use crate::daemon::client::{Client, ClientId, ClientRegistry};
use crate::hwsim;
use crate::medium::{Delivery, Medium};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};

/// Everything that can happen to the daemon.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A transport produced a new client.
    ClientConnected(Client),
    /// A transport lost its client.
    ClientDisconnected(ClientId),
    /// A raw netlink message arrived from a client.
    Ingress { client: ClientId, data: Vec<u8> },
    /// An API-socket request awaiting its verdict.
    ApiRequest {
        client: ClientId,
        msg_type: u32,
        data: Vec<u8>,
        resp: oneshot::Sender<u32>,
    },
}

/// External pacing of simulated time.
///
/// With a controller attached the scheduler never consults the wall
/// clock: before firing jobs at a deadline the daemon asks for a grant
/// and blocks until the controller hands the simulation its time slice.
#[async_trait]
pub trait TimeController: Send {
    async fn wait_until(&mut self, usec: u64) -> Result<()>;
}

/// Controller speaking a fixed 8-byte request/grant exchange over a
/// unix stream.
#[derive(Debug)]
pub struct SocketTimeController {
    stream: UnixStream,
}

impl SocketTimeController {
    pub async fn connect(path: &Path) -> Result<Self> {
        Ok(Self {
            stream: UnixStream::connect(path).await?,
        })
    }
}

#[async_trait]
impl TimeController for SocketTimeController {
    async fn wait_until(&mut self, usec: u64) -> Result<()> {
        self.stream.write_all(&usec.to_le_bytes()).await?;
        let mut grant = [0u8; 8];
        self.stream.read_exact(&mut grant).await?;
        Ok(())
    }
}

/// The daemon: medium, clients and the event loop around them.
pub struct MediumDaemon {
    medium: Medium,
    clients: ClientRegistry,
    family_id: u16,
    events_tx: mpsc::UnboundedSender<DaemonEvent>,
    events_rx: mpsc::UnboundedReceiver<DaemonEvent>,
    time_ctrl: Option<Box<dyn TimeController>>,
    epoch: tokio::time::Instant,
}

impl std::fmt::Debug for MediumDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediumDaemon")
            .field("medium", &self.medium)
            .field("clients", &self.clients.len())
            .field("family_id", &self.family_id)
            .field("time_controlled", &self.time_ctrl.is_some())
            .finish()
    }
}

impl MediumDaemon {
    pub fn new(medium: Medium, time_ctrl: Option<Box<dyn TimeController>>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            medium,
            clients: ClientRegistry::new(),
            family_id: 0,
            events_tx,
            events_rx,
            time_ctrl,
            epoch: tokio::time::Instant::now(),
        }
    }

    /// Event channel handle for transports.
    pub fn events_handle(&self) -> mpsc::UnboundedSender<DaemonEvent> {
        self.events_tx.clone()
    }

    /// Family id resolved by the netlink transport at startup.
    pub fn set_family_id(&mut self, family_id: u16) {
        self.family_id = family_id;
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Run until every event source is gone.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.medium.next_deadline() {
                Some(next) if self.time_ctrl.is_some() => {
                    // Controlled time: drain what is already queued,
                    // then ask for the slice and fire.
                    while let Ok(event) = self.events_rx.try_recv() {
                        self.handle_event(event);
                    }
                    if let Some(ctrl) = &mut self.time_ctrl {
                        ctrl.wait_until(next).await?;
                    }
                    let deliveries = self.medium.run_due(next);
                    self.dispatch(deliveries);
                }
                Some(next) => {
                    let deadline = self.epoch + Duration::from_micros(next);
                    tokio::select! {
                        event = self.events_rx.recv() => match event {
                            Some(event) => self.handle_event(event),
                            None => return Ok(()),
                        },
                        _ = tokio::time::sleep_until(deadline) => {
                            let now = self.now_usec();
                            let deliveries = self.medium.run_due(now);
                            self.dispatch(deliveries);
                        }
                    }
                }
                None => match self.events_rx.recv().await {
                    Some(event) => self.handle_event(event),
                    None => return Ok(()),
                },
            }
        }
    }

    fn now_usec(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// One state transition.
    pub fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::ClientConnected(client) => {
                tracing::info!("client {} connected ({:?})", client.id, client.kind);
                self.clients.add(client);
            }
            DaemonEvent::ClientDisconnected(id) => {
                tracing::info!("client {} disconnected", id);
                self.clients.remove(id);
                self.medium.remove_client(id);
            }
            DaemonEvent::Ingress { client, data } => self.handle_ingress(client, &data),
            DaemonEvent::ApiRequest {
                client,
                msg_type,
                data,
                resp,
            } => {
                let verdict = self.handle_api(client, msg_type, &data);
                let _ = resp.send(verdict as u32);
            }
        }
    }

    fn handle_ingress(&mut self, client: ClientId, data: &[u8]) {
        match hwsim::parse_ingress(data) {
            Ok(Some(ingress)) => {
                self.medium.ingest(ingress, Some(client));
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("client {}: dropping malformed message: {}", client, e),
        }
    }

    fn handle_api(&mut self, client: ClientId, msg_type: u32, data: &[u8]) -> ApiMsgType {
        match ApiMsgType::from_u32(msg_type) {
            Some(ApiMsgType::Register) => match self.clients.register(client) {
                Ok(()) => ApiMsgType::Ack,
                Err(_) => ApiMsgType::Invalid,
            },
            Some(ApiMsgType::Unregister) => match self.clients.unregister(client) {
                Ok(()) => ApiMsgType::Ack,
                Err(_) => ApiMsgType::Invalid,
            },
            Some(ApiMsgType::Netlink) => match hwsim::parse_ingress(data) {
                Ok(Some(ingress)) => {
                    self.medium.ingest(ingress, Some(client));
                    ApiMsgType::Ack
                }
                Ok(None) => ApiMsgType::Ack,
                Err(_) => ApiMsgType::Invalid,
            },
            _ => ApiMsgType::Invalid,
        }
    }

    /// Serialize and route the effects of fired deliveries.
    fn dispatch(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Reception {
                    station,
                    client,
                    data,
                    signal,
                    rx_rate,
                    freq,
                } => {
                    let hwaddr = match self.medium.stations().get(station) {
                        Some(sta) => sta.hwaddr,
                        None => continue,
                    };
                    let msg = hwsim::cloned_frame_msg(
                        self.family_id,
                        &hwaddr,
                        &data,
                        rx_rate,
                        signal,
                        freq,
                    )
                    .and_then(|msg| hwsim::to_bytes(&msg));
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::error!("reception for station {}: {}", station, e);
                            continue;
                        }
                    };
                    match client {
                        Some(id) => {
                            if let Err(e) = self.clients.send(id, msg) {
                                tracing::warn!("reception for station {}: {}", station, e);
                            }
                        }
                        None => self.clients.broadcast(&msg),
                    }
                }
                Delivery::TxStatus {
                    client,
                    transmitter_hwaddr,
                    flags,
                    signal,
                    tx_rates,
                    cookie,
                } => {
                    let Some(id) = client else {
                        tracing::debug!("tx status for cookie {} has no source client", cookie);
                        continue;
                    };
                    let msg = hwsim::tx_info_msg(
                        self.family_id,
                        &transmitter_hwaddr,
                        flags,
                        signal,
                        &tx_rates,
                        cookie,
                    )
                    .and_then(|msg| hwsim::to_bytes(&msg));
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::error!("tx status for cookie {}: {}", cookie, e);
                            continue;
                        }
                    };
                    if let Err(e) = self.clients.send(id, msg) {
                        tracing::warn!("tx status for cookie {}: {}", cookie, e);
                    }
                }
            }
        }
    }
}
