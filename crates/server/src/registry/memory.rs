use async_trait::async_trait;
use awgbot_common::PeerName;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ActivePeer, ConfiguredPeer, MaterializedPeer, PeerRegistry, RegistryError};
use crate::db::RemoveOutcome;

#[derive(Debug, Clone)]
struct FakePeer {
    name: String,
    allowed_ips: String,
    latest_handshake: Option<String>,
    transfer: Option<String>,
}

/// In-process registry for tests. Peers are keyed by public key.
#[derive(Default)]
pub struct InMemoryRegistry {
    peers: Mutex<BTreeMap<String, FakePeer>>,
    fail_add: Mutex<bool>,
    fail_remove: Mutex<HashSet<String>>,
    remove_delay: Mutex<Option<Duration>>,
    key_counter: AtomicUsize,
    pub add_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_add(&self) {
        *self.fail_add_flag() = true;
    }

    fn fail_add_flag(&self) -> std::sync::MutexGuard<'_, bool> {
        self.fail_add.lock().unwrap()
    }

    pub fn fail_remove_for(&self, name: &str) {
        self.fail_remove.lock().unwrap().insert(name.to_string());
    }

    /// Makes every later removal take `delay`, like a slow `docker exec`.
    pub fn delay_removals(&self, delay: Duration) {
        *self.remove_delay.lock().unwrap() = Some(delay);
    }

    async fn removal_latency(&self) {
        let delay = *self.remove_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Simulates live counters and a recent handshake for `name`.
    pub fn set_transfer(&self, name: &str, transfer: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.values_mut().find(|p| p.name == name) {
            peer.transfer = Some(transfer.to_string());
            peer.latest_handshake.get_or_insert_with(|| "5 seconds ago".to_string());
        }
    }

    pub fn set_handshake(&self, name: &str, handshake: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.values_mut().find(|p| p.name == name) {
            peer.latest_handshake = Some(handshake.to_string());
        }
    }

    /// Installs a peer the way an out-of-band tool would: named by its key.
    pub fn insert_raw(&self, public_key: &str, allowed_ips: &str) {
        self.peers.lock().unwrap().insert(
            public_key.to_string(),
            FakePeer {
                name: public_key.to_string(),
                allowed_ips: allowed_ips.to_string(),
                latest_handshake: None,
                transfer: None,
            },
        );
    }

    /// Drops a peer behind the engine's back.
    pub fn drop_externally(&self, name: &str) {
        self.peers.lock().unwrap().retain(|_, peer| peer.name != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.lock().unwrap().values().any(|p| p.name == name)
    }

    pub fn public_key_of(&self, name: &str) -> Option<String> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(key, _)| key.clone())
    }
}

#[async_trait]
impl PeerRegistry for InMemoryRegistry {
    async fn add_peer(&self, name: &PeerName, _ipv6: bool) -> Result<MaterializedPeer, RegistryError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut *self.fail_add_flag()) {
            return Err(RegistryError::CommandFailed {
                command: "wg set".to_string(),
                status: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        let n = self.key_counter.fetch_add(1, Ordering::SeqCst) + 2;
        let public_key = format!("pubkey-{name}-{n}");
        let allowed_ips = format!("10.8.1.{n}/32");
        self.peers.lock().unwrap().insert(
            public_key.clone(),
            FakePeer {
                name: name.to_string(),
                allowed_ips: allowed_ips.clone(),
                latest_handshake: None,
                transfer: None,
            },
        );
        let config = format!(
            "[Interface]\nAddress = {allowed_ips}\nPrivateKey = priv-{n}\n\n[Peer]\nEndpoint = vpn.test:51820\n"
        );
        Ok(MaterializedPeer {
            public_key,
            allowed_ips,
            config,
        })
    }

    async fn remove_peer(&self, name: &PeerName) -> Result<RemoveOutcome, RegistryError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.removal_latency().await;
        if self.fail_remove.lock().unwrap().contains(name.as_str()) {
            return Err(RegistryError::Timeout {
                command: "wg set remove".to_string(),
                seconds: 10,
            });
        }
        let mut peers = self.peers.lock().unwrap();
        let before = peers.len();
        peers.retain(|_, peer| peer.name != name.as_str());
        Ok(if peers.len() < before {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::Absent
        })
    }

    async fn remove_key(&self, public_key: &str) -> Result<RemoveOutcome, RegistryError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.removal_latency().await;
        Ok(match self.peers.lock().unwrap().remove(public_key) {
            Some(_) => RemoveOutcome::Removed,
            None => RemoveOutcome::Absent,
        })
    }

    async fn list_configured_peers(&self) -> Result<Vec<ConfiguredPeer>, RegistryError> {
        Ok(self
            .peers
            .lock()
            .unwrap()
            .iter()
            .map(|(key, peer)| ConfiguredPeer {
                name: peer.name.clone(),
                public_key: key.clone(),
                allowed_ips: peer.allowed_ips.clone(),
            })
            .collect())
    }

    async fn list_active_peers(&self) -> Result<Vec<ActivePeer>, RegistryError> {
        Ok(self
            .peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, peer)| peer.latest_handshake.is_some())
            .map(|(key, peer)| ActivePeer {
                name: peer.name.clone(),
                public_key: key.clone(),
                latest_handshake: peer.latest_handshake.clone(),
                transfer: peer.transfer.clone(),
                endpoint: Some("198.51.100.9:40000".to_string()),
            })
            .collect())
    }

    async fn rename_peer(&self, public_key: &str, name: &PeerName) -> Result<(), RegistryError> {
        match self.peers.lock().unwrap().get_mut(public_key) {
            Some(peer) => {
                peer.name = name.to_string();
                Ok(())
            }
            None => Err(RegistryError::Parse(format!("unknown key {public_key}"))),
        }
    }

    async fn verify_environment(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}
