use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time::MissedTickBehavior;

use tandem::{ClientId, Clock, MAX_PACKET_SIZE, Message, Packet, SystemClock};

use crate::authority::{AuthoritativeState, Authority};
use crate::clients::{ClientRegistry, Registration};
use crate::config::ServerConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayStats {
    pub client_count: usize,
    pub accepted_updates: u64,
    pub rejected_updates: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
}

/// Single-socket authority that arbitrates between competing client branches.
pub struct RelayServer {
    socket: UdpSocket,
    clients: ClientRegistry,
    authority: Authority,
    config: ServerConfig,
    clock: SystemClock,
    packets_received: u64,
    packets_dropped: u64,
}

impl RelayServer {
    pub async fn bind<A: ToSocketAddrs>(bind_addr: A, config: ServerConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            clients: ClientRegistry::new(config.max_clients, config.client_timeout()),
            authority: Authority::new(),
            config,
            clock: SystemClock,
            packets_received: 0,
            packets_dropped: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            client_count: self.clients.len(),
            accepted_updates: self.authority.accepted(),
            rejected_updates: self.authority.rejected(),
            packets_received: self.packets_received,
            packets_dropped: self.packets_dropped,
        }
    }

    /// Serves until `shutdown` resolves.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr).await,
                    Err(e) => log::debug!("Receive failed: {}", e),
                },
                _ = sweep.tick() => self.sweep(Instant::now()).await,
                _ = &mut shutdown => break,
            }
        }

        let stats = self.stats();
        log::info!(
            "Relay stopped: {} clients, {} accepted, {} rejected",
            stats.client_count,
            stats.accepted_updates,
            stats.rejected_updates
        );
    }

    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        self.packets_received += 1;

        let packet = match Packet::deserialize(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.packets_dropped += 1;
                log::debug!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        let client_id = match self.clients.register(addr, Instant::now()) {
            Ok(Registration::Existing(client_id)) => client_id,
            Ok(Registration::Joined(client_id)) => {
                log::info!(
                    "Client {} joined from {} ({} connected)",
                    client_id,
                    addr,
                    self.clients.len()
                );
                self.welcome(client_id, addr).await;
                client_id
            }
            Err(reason) => {
                self.packets_dropped += 1;
                log::warn!("Ignoring {}: {}", addr, reason);
                return;
            }
        };

        match packet.payload {
            Message::Ping { sent_time } => {
                let pong = Message::Pong {
                    server_time: self.clock.now_ms(),
                    sent_time,
                };
                self.send_to(pong, addr).await;
            }
            Message::GameStateUpdate {
                state,
                id,
                based_on_id,
                handled_action_ids,
                server_time_estimate,
            } => {
                let candidate = AuthoritativeState {
                    state,
                    id,
                    based_on_id,
                    handled_action_ids,
                    server_time_estimate,
                };
                self.handle_state_update(client_id, candidate, addr).await;
            }
            Message::PlayerAction { id, action } => {
                self.broadcast(Message::PlayerAction { id, action }, Some(addr))
                    .await;
            }
            other => {
                self.packets_dropped += 1;
                log::debug!("Ignoring {} from client {}", other.name(), client_id);
            }
        }
    }

    /// Tells a newcomer who else is here and what the current state is, and
    /// tells everyone else about the newcomer.
    async fn welcome(&mut self, client_id: ClientId, addr: SocketAddr) {
        for existing in self.clients.ids() {
            if existing == client_id {
                continue;
            }
            let joined = Message::ClientJoined {
                client_id: existing,
            };
            self.send_to(joined, addr).await;
        }
        if let Some(current) = self.authority.current() {
            let message = current.to_message();
            self.send_to(message, addr).await;
        }
        self.broadcast(Message::ClientJoined { client_id }, Some(addr))
            .await;
    }

    async fn handle_state_update(
        &mut self,
        client_id: ClientId,
        candidate: AuthoritativeState,
        addr: SocketAddr,
    ) {
        let id = candidate.id;
        if self.authority.offer(candidate) {
            log::trace!("Accepted {} from client {}", id, client_id);
            if let Some(current) = self.authority.current() {
                let message = current.to_message();
                self.broadcast(message, None).await;
            }
        } else if let Some(current) = self.authority.current() {
            log::debug!(
                "Rejected {} from client {}, resending {}",
                id,
                client_id,
                current.id
            );
            let message = current.to_message();
            self.send_to(message, addr).await;
        }
    }

    async fn sweep(&mut self, now: Instant) {
        for entry in self.clients.remove_timed_out(now) {
            log::info!(
                "Client {} timed out ({:.1}s after joining)",
                entry.client_id,
                now.saturating_duration_since(entry.joined_at).as_secs_f32()
            );
            self.broadcast(
                Message::ClientLeft {
                    client_id: entry.client_id,
                },
                None,
            )
            .await;
        }

        if self.clients.is_empty() && self.authority.current().is_some() {
            log::info!("No clients left, discarding authoritative state");
            self.authority.reset();
        }
    }

    async fn send_to(&self, message: Message, addr: SocketAddr) {
        match Packet::new(message).serialize() {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    log::warn!("Failed to send to {}: {}", addr, e);
                }
            }
            Err(e) => log::warn!("Failed to encode message for {}: {}", addr, e),
        }
    }

    /// Sends to every client except `skip`.
    async fn broadcast(&self, message: Message, skip: Option<SocketAddr>) {
        let kind = message.name();
        let data = match Packet::new(message).serialize() {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Failed to encode {} broadcast: {}", kind, e);
                return;
            }
        };

        for addr in self.clients.addrs() {
            if Some(addr) == skip {
                continue;
            }
            if let Err(e) = self.socket.send_to(&data, addr).await {
                log::warn!("Failed to send {} to {}: {}", kind, addr, e);
            }
        }
    }
}
