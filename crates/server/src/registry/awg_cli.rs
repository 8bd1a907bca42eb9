use async_trait::async_trait;
use awgbot_common::PeerName;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::clients_table::ClientsTable;
use super::wg_text::{self, InterfaceSettings};
use super::{ActivePeer, ConfiguredPeer, MaterializedPeer, PeerRegistry, RegistryError};
use crate::db::RemoveOutcome;
use crate::server::config::ServerConfig;

const DOCKER: &str = "docker";
const CLIENT_KEEPALIVE_SECS: u32 = 25;

// A killed writer leaves only the temp file behind; the target is swapped by
// `mv`, which is a rename on the same filesystem.
fn replace_file_script(path: &str) -> String {
    format!("cat > '{path}.tmp' && mv -f '{path}.tmp' '{path}'")
}

/// Drives an AmneziaWG interface running inside a docker container through
/// `docker exec ... wg`.
///
/// Every call is bounded by `command_timeout`; the child is killed when the
/// timeout drops it.
pub struct AwgCliRegistry {
    container: String,
    interface: String,
    wg_binary: String,
    wg_config_file: String,
    clients_table: String,
    endpoint: String,
    client_dns: String,
    command_timeout: Duration,
    // Serializes read-modify-write of the server config and clientsTable.
    write_lock: Mutex<()>,
}

impl AwgCliRegistry {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            container: config.docker_container.clone(),
            interface: config.interface_name(),
            wg_binary: config.wg_binary.clone(),
            wg_config_file: config.wg_config_file.clone(),
            clients_table: config.clients_table.clone(),
            endpoint: config.endpoint.clone(),
            client_dns: config.client_dns.clone(),
            command_timeout: config.command_timeout(),
            write_lock: Mutex::new(()),
        }
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String, RegistryError> {
        let command_line = format!("{DOCKER} {}", args.join(" "));
        let mut command = Command::new(DOCKER);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RegistryError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let io_error = |source: std::io::Error| RegistryError::Spawn {
            command: command_line.clone(),
            source,
        };
        let exchange = async {
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input).await.map_err(io_error)?;
                // Dropping the pipe sends EOF.
                drop(pipe);
            }
            child.wait_with_output().await.map_err(io_error)
        };

        let output = timeout(self.command_timeout, exchange)
            .await
            .map_err(|_| RegistryError::Timeout {
                command: command_line.clone(),
                seconds: self.command_timeout.as_secs(),
            })??;

        if !output.status.success() {
            return Err(RegistryError::CommandFailed {
                command: command_line,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(command = %command_line, "Control plane command succeeded.");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn exec(&self, args: &[&str]) -> Result<String, RegistryError> {
        let mut full = vec!["exec", self.container.as_str()];
        full.extend_from_slice(args);
        self.run(&full, None).await
    }

    async fn exec_with_input(&self, args: &[&str], input: &[u8]) -> Result<String, RegistryError> {
        let mut full = vec!["exec", "-i", self.container.as_str()];
        full.extend_from_slice(args);
        self.run(&full, Some(input)).await
    }

    async fn read_container_file(&self, path: &str) -> Result<String, RegistryError> {
        self.exec(&["cat", path]).await
    }

    async fn write_container_file(&self, path: &str, contents: &str) -> Result<(), RegistryError> {
        let script = replace_file_script(path);
        self.exec_with_input(&["sh", "-c", &script], contents.as_bytes())
            .await
            .map(|_| ())
    }

    async fn load_clients_table(&self) -> Result<ClientsTable, RegistryError> {
        // A fresh install has no table yet.
        let text = match self.read_container_file(&self.clients_table).await {
            Ok(text) => text,
            Err(RegistryError::CommandFailed { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        ClientsTable::parse(&text).map_err(|e| RegistryError::Parse(format!("clientsTable: {e}")))
    }

    async fn save_clients_table(&self, table: &ClientsTable) -> Result<(), RegistryError> {
        let json = table
            .to_json()
            .map_err(|e| RegistryError::Parse(format!("clientsTable: {e}")))?;
        self.write_container_file(&self.clients_table, &json).await
    }

    async fn wg(&self, args: &[&str]) -> Result<String, RegistryError> {
        let mut full = vec![self.wg_binary.as_str()];
        full.extend_from_slice(args);
        self.exec(&full).await
    }

    async fn generate_keys(&self) -> Result<(String, String, String), RegistryError> {
        let private_key = self.wg(&["genkey"]).await?.trim().to_string();
        let public_key = self
            .exec_with_input(&[self.wg_binary.as_str(), "pubkey"], private_key.as_bytes())
            .await?
            .trim()
            .to_string();
        let preshared_key = self.wg(&["genpsk"]).await?.trim().to_string();
        if private_key.is_empty() || public_key.is_empty() || preshared_key.is_empty() {
            return Err(RegistryError::Parse("key generation returned empty output".to_string()));
        }
        Ok((private_key, public_key, preshared_key))
    }

    fn allocate_addresses(
        &self,
        settings: &InterfaceSettings,
        server_config: &str,
        ipv6: bool,
    ) -> Result<String, RegistryError> {
        let (server_v4, v4_prefix) = wg_text::first_ipv4(&settings.addresses)
            .ok_or_else(|| RegistryError::Parse("interface has no IPv4 Address".to_string()))?;
        let used = wg_text::peer_allowed_ips(server_config);
        let host = wg_text::allocate_ipv4(server_v4, &used)
            .ok_or_else(|| RegistryError::Unavailable("no free IPv4 addresses left".to_string()))?;

        let mut allowed = format!("{host}/32");
        if ipv6 {
            let server_v6 = wg_text::first_ipv6(&settings.addresses).ok_or_else(|| {
                RegistryError::Unavailable("interface has no IPv6 address".to_string())
            })?;
            let host_v6 = wg_text::derive_ipv6(server_v6, host, v4_prefix).ok_or_else(|| {
                RegistryError::Parse(format!("cannot derive IPv6 address from {server_v6}"))
            })?;
            allowed.push_str(&format!(", {host_v6}/128"));
        }
        Ok(allowed)
    }

    fn client_config(
        &self,
        settings: &InterfaceSettings,
        private_key: &str,
        server_public_key: &str,
        preshared_key: &str,
        address: &str,
        ipv6: bool,
    ) -> String {
        let port = settings.listen_port.unwrap_or(51820);
        let mut text = format!(
            "[Interface]\nAddress = {address}\nDNS = {dns}\nPrivateKey = {private_key}\n",
            dns = self.client_dns
        );
        for (key, value) in &settings.obfuscation {
            text.push_str(&format!("{key} = {value}\n"));
        }
        let routes = if ipv6 { "0.0.0.0/0, ::/0" } else { "0.0.0.0/0" };
        text.push_str(&format!(
            "\n[Peer]\nPublicKey = {server_public_key}\nPresharedKey = {preshared_key}\n\
             AllowedIPs = {routes}\nEndpoint = {endpoint}:{port}\nPersistentKeepalive = {CLIENT_KEEPALIVE_SECS}\n",
            endpoint = self.endpoint
        ));
        text
    }

    async fn install_peer(
        &self,
        public_key: &str,
        preshared_key: &str,
        allowed_ips: &str,
        server_config: &str,
        name: &PeerName,
    ) -> Result<(), RegistryError> {
        let set_script = format!(
            "{wg} set {iface} peer {public_key} preshared-key /dev/stdin allowed-ips {ips}",
            wg = self.wg_binary,
            iface = self.interface,
            ips = allowed_ips.replace(' ', ""),
        );
        self.exec_with_input(&["sh", "-c", &set_script], preshared_key.as_bytes())
            .await?;

        let updated = format!(
            "{}{}",
            server_config.trim_end_matches('\n'),
            wg_text::peer_block(public_key, preshared_key, allowed_ips)
        );
        self.write_container_file(&self.wg_config_file, &format!("{}\n", updated.trim_end()))
            .await?;

        let mut table = self.load_clients_table().await?;
        table.upsert(public_key, name.as_str());
        self.save_clients_table(&table).await
    }

    async fn uninstall_key(&self, public_key: &str) -> Result<(), RegistryError> {
        self.wg(&["set", &self.interface, "peer", public_key, "remove"])
            .await?;
        let server_config = self.read_container_file(&self.wg_config_file).await?;
        let (updated, removed) = wg_text::remove_peer_block(&server_config, public_key);
        if removed {
            self.write_container_file(&self.wg_config_file, &updated).await?;
        }
        let mut table = self.load_clients_table().await?;
        if table.remove_key(public_key) {
            self.save_clients_table(&table).await?;
        }
        Ok(())
    }

    async fn shown_peers(&self) -> Result<Vec<(String, wg_text::ShownPeer)>, RegistryError> {
        let output = self.wg(&["show", &self.interface]).await?;
        let table = self.load_clients_table().await?;
        Ok(wg_text::parse_wg_show(&output)
            .into_iter()
            .map(|peer| {
                let name = table
                    .name_for(&peer.public_key)
                    .map(str::to_string)
                    .unwrap_or_else(|| peer.public_key.clone());
                (name, peer)
            })
            .collect())
    }
}

#[async_trait]
impl PeerRegistry for AwgCliRegistry {
    #[instrument(skip(self, name), fields(peer = %name))]
    async fn add_peer(&self, name: &PeerName, ipv6: bool) -> Result<MaterializedPeer, RegistryError> {
        let _guard = self.write_lock.lock().await;

        let server_config = self.read_container_file(&self.wg_config_file).await?;
        let settings = wg_text::parse_interface(&server_config);
        let allowed_ips = self.allocate_addresses(&settings, &server_config, ipv6)?;
        let server_public_key = self
            .wg(&["show", &self.interface, "public-key"])
            .await?
            .trim()
            .to_string();
        let (private_key, public_key, preshared_key) = self.generate_keys().await?;

        if let Err(e) = self
            .install_peer(&public_key, &preshared_key, &allowed_ips, &server_config, name)
            .await
        {
            // Leave nothing half-installed behind.
            warn!(error = %e, "Peer installation failed, rolling back.");
            if let Err(rollback) = self.uninstall_key(&public_key).await {
                error!(error = %rollback, "Rollback after failed installation also failed.");
            }
            return Err(e);
        }

        let config = self.client_config(
            &settings,
            &private_key,
            &server_public_key,
            &preshared_key,
            &allowed_ips,
            ipv6,
        );
        info!(allowed_ips = %allowed_ips, "Peer added to interface.");
        Ok(MaterializedPeer {
            public_key,
            allowed_ips,
            config,
        })
    }

    #[instrument(skip(self, name), fields(peer = %name))]
    async fn remove_peer(&self, name: &PeerName) -> Result<RemoveOutcome, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let table = self.load_clients_table().await?;
        let Some(public_key) = table.key_for(name.as_str()).map(str::to_string) else {
            return Ok(RemoveOutcome::Absent);
        };
        self.uninstall_key(&public_key).await?;
        info!("Peer removed from interface.");
        Ok(RemoveOutcome::Removed)
    }

    #[instrument(skip(self))]
    async fn remove_key(&self, public_key: &str) -> Result<RemoveOutcome, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let shown = wg_text::parse_wg_show(&self.wg(&["show", &self.interface]).await?);
        let table = self.load_clients_table().await?;
        if !shown.iter().any(|peer| peer.public_key == public_key) && table.name_for(public_key).is_none() {
            return Ok(RemoveOutcome::Absent);
        }
        self.uninstall_key(public_key).await?;
        info!("Key removed from interface.");
        Ok(RemoveOutcome::Removed)
    }

    async fn list_configured_peers(&self) -> Result<Vec<ConfiguredPeer>, RegistryError> {
        Ok(self
            .shown_peers()
            .await?
            .into_iter()
            .map(|(name, peer)| ConfiguredPeer {
                name,
                public_key: peer.public_key,
                allowed_ips: peer.allowed_ips,
            })
            .collect())
    }

    async fn list_active_peers(&self) -> Result<Vec<ActivePeer>, RegistryError> {
        Ok(self
            .shown_peers()
            .await?
            .into_iter()
            .filter(|(_, peer)| peer.latest_handshake.is_some())
            .map(|(name, peer)| ActivePeer {
                name,
                public_key: peer.public_key,
                latest_handshake: peer.latest_handshake,
                transfer: peer.transfer,
                endpoint: peer.endpoint,
            })
            .collect())
    }

    async fn rename_peer(&self, public_key: &str, name: &PeerName) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load_clients_table().await?;
        table.upsert(public_key, name.as_str());
        self.save_clients_table(&table).await?;
        info!(peer = %name, public_key = %public_key, "Named peer in clientsTable.");
        Ok(())
    }

    async fn verify_environment(&self) -> Result<(), RegistryError> {
        let filter = format!("name={}", self.container);
        let names = self
            .run(&["ps", "--filter", &filter, "--format", "{{.Names}}"], None)
            .await?;
        if !names.lines().any(|line| line.trim() == self.container) {
            return Err(RegistryError::Unavailable(format!(
                "docker container '{}' is not running",
                self.container
            )));
        }
        self.exec(&["test", "-f", &self.wg_config_file])
            .await
            .map_err(|_| {
                RegistryError::Unavailable(format!(
                    "config file '{}' not found in container '{}'",
                    self.wg_config_file, self.container
                ))
            })?;
        info!(container = %self.container, interface = %self.interface, "Control plane environment verified.");
        Ok(())
    }
}
