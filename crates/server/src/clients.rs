use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tandem::ClientId;

#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub client_id: ClientId,
    pub addr: SocketAddr,
    pub joined_at: Instant,
    pub last_seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Existing(ClientId),
    Joined(ClientId),
}

/// Clients are identified by source address. Any valid packet from an unknown
/// address registers it; silence longer than the timeout removes it.
pub struct ClientRegistry {
    clients_by_addr: HashMap<SocketAddr, ClientId>,
    clients: HashMap<ClientId, ClientEntry>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Refreshes a known client or registers a new one.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<Registration, &'static str> {
        if let Some(&client_id) = self.clients_by_addr.get(&addr) {
            if let Some(entry) = self.clients.get_mut(&client_id) {
                entry.last_seen = now;
            }
            return Ok(Registration::Existing(client_id));
        }

        if self.clients.len() >= self.max_clients {
            return Err("Server full");
        }

        let client_id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        self.clients.insert(
            client_id,
            ClientEntry {
                client_id,
                addr,
                joined_at: now,
                last_seen: now,
            },
        );
        self.clients_by_addr.insert(addr, client_id);

        Ok(Registration::Joined(client_id))
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<ClientEntry> {
        let entry = self.clients.remove(&client_id)?;
        self.clients_by_addr.remove(&entry.addr);
        Some(entry)
    }

    /// Removes every client that has been silent for longer than the timeout.
    pub fn remove_timed_out(&mut self, now: Instant) -> Vec<ClientEntry> {
        let timed_out: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| now.saturating_duration_since(c.last_seen) > self.timeout)
            .map(|c| c.client_id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|client_id| self.remove(client_id))
            .collect()
    }

    /// Client ids in ascending order.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.clients.values().map(|c| c.addr).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut registry = ClientRegistry::new(4, Duration::from_secs(5));
        let now = Instant::now();

        assert_eq!(
            registry.register(addr(1000), now),
            Ok(Registration::Joined(ClientId(1)))
        );
        assert_eq!(
            registry.register(addr(1001), now),
            Ok(Registration::Joined(ClientId(2)))
        );
        assert_eq!(
            registry.register(addr(1000), now),
            Ok(Registration::Existing(ClientId(1)))
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![ClientId(1), ClientId(2)]);
    }

    #[test]
    fn test_server_full() {
        let mut registry = ClientRegistry::new(1, Duration::from_secs(5));
        let now = Instant::now();

        registry.register(addr(1000), now).unwrap();
        assert_eq!(registry.register(addr(1001), now), Err("Server full"));
        assert!(registry.register(addr(1000), now).is_ok());
    }

    #[test]
    fn test_timed_out_clients_are_removed() {
        let mut registry = ClientRegistry::new(4, Duration::from_secs(5));
        let start = Instant::now();

        registry.register(addr(1000), start).unwrap();
        registry.register(addr(1001), start).unwrap();
        registry
            .register(addr(1001), start + Duration::from_secs(4))
            .unwrap();

        let removed = registry.remove_timed_out(start + Duration::from_secs(6));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].client_id, ClientId(1));
        assert_eq!(registry.ids(), vec![ClientId(2)]);

        // A returning address registers as a new client.
        assert_eq!(
            registry.register(addr(1000), start + Duration::from_secs(7)),
            Ok(Registration::Joined(ClientId(3)))
        );
    }
}
