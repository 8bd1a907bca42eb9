//! Parsers for `wg show` output and `wg-quick` style config files.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

/// AmneziaWG obfuscation parameters copied from the server `[Interface]` into
/// client configs. Clients must match them exactly.
pub const OBFUSCATION_KEYS: [&str; 9] = ["Jc", "Jmin", "Jmax", "S1", "S2", "H1", "H2", "H3", "H4"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShownPeer {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: String,
    pub latest_handshake: Option<String>,
    pub transfer: Option<String>,
}

/// Parses the human-readable `wg show <iface>` output into its peer blocks.
pub fn parse_wg_show(output: &str) -> Vec<ShownPeer> {
    let mut peers = Vec::new();
    let mut current: Option<ShownPeer> = None;

    for line in output.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "peer" => {
                if let Some(done) = current.take() {
                    peers.push(done);
                }
                current = Some(ShownPeer {
                    public_key: value.to_string(),
                    ..Default::default()
                });
            }
            "interface" => {
                if let Some(done) = current.take() {
                    peers.push(done);
                }
            }
            field => {
                let Some(peer) = current.as_mut() else {
                    continue;
                };
                match field {
                    "endpoint" => peer.endpoint = Some(value.to_string()),
                    "allowed ips" => peer.allowed_ips = value.to_string(),
                    "latest handshake" => peer.latest_handshake = Some(value.to_string()),
                    "transfer" => peer.transfer = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }
    if let Some(done) = current {
        peers.push(done);
    }
    peers
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSettings {
    pub addresses: Vec<String>,
    pub listen_port: Option<u16>,
    /// Obfuscation parameters in `OBFUSCATION_KEYS` order, when present.
    pub obfuscation: Vec<(String, String)>,
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
}

/// Reads the `[Interface]` section of the server config.
pub fn parse_interface(config: &str) -> InterfaceSettings {
    let mut settings = InterfaceSettings::default();
    let mut in_interface = false;
    let mut found = Vec::new();

    for line in config.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_interface = trimmed.eq_ignore_ascii_case("[Interface]");
            continue;
        }
        if !in_interface {
            continue;
        }
        let Some((key, value)) = key_value(trimmed) else {
            continue;
        };
        match key {
            "Address" => settings
                .addresses
                .extend(value.split(',').map(|a| a.trim().to_string()).filter(|a| !a.is_empty())),
            "ListenPort" => settings.listen_port = value.parse().ok(),
            k if OBFUSCATION_KEYS.contains(&k) => found.push((k.to_string(), value.to_string())),
            _ => {}
        }
    }

    for key in OBFUSCATION_KEYS {
        if let Some(pair) = found.iter().find(|(k, _)| k == key) {
            settings.obfuscation.push(pair.clone());
        }
    }
    settings
}

/// All `AllowedIPs` entries of `[Peer]` sections.
pub fn peer_allowed_ips(config: &str) -> Vec<String> {
    let mut in_peer = false;
    let mut ips = Vec::new();
    for line in config.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_peer = trimmed.eq_ignore_ascii_case("[Peer]");
            continue;
        }
        if !in_peer {
            continue;
        }
        if let Some(("AllowedIPs", value)) = key_value(trimmed) {
            ips.extend(value.split(',').map(|ip| ip.trim().to_string()));
        }
    }
    ips
}

pub fn peer_block(public_key: &str, preshared_key: &str, allowed_ips: &str) -> String {
    format!("\n[Peer]\nPublicKey = {public_key}\nPresharedKey = {preshared_key}\nAllowedIPs = {allowed_ips}\n")
}

/// Drops the `[Peer]` section whose `PublicKey` matches. Returns the new text
/// and whether a section was removed.
pub fn remove_peer_block(config: &str, public_key: &str) -> (String, bool) {
    let mut sections: Vec<Vec<&str>> = vec![Vec::new()];
    for line in config.lines() {
        if line.trim().starts_with('[') {
            sections.push(Vec::new());
        }
        if let Some(section) = sections.last_mut() {
            section.push(line);
        }
    }

    let mut removed = false;
    let kept: Vec<&Vec<&str>> = sections
        .iter()
        .filter(|section| {
            let is_target = section
                .first()
                .is_some_and(|header| header.trim().eq_ignore_ascii_case("[Peer]"))
                && section
                    .iter()
                    .any(|line| key_value(line) == Some(("PublicKey", public_key)));
            removed |= is_target;
            !is_target
        })
        .collect();

    let mut text = String::with_capacity(config.len());
    for section in kept {
        for line in section {
            text.push_str(line);
            text.push('\n');
        }
    }
    // Collapse the blank line the removed block leaves behind.
    while text.ends_with("\n\n") {
        text.pop();
    }
    (text, removed)
}

fn ipv4_network(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr.split_once('/').unwrap_or((cidr, "32"));
    let prefix: u8 = prefix.trim().parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((addr.trim().parse().ok()?, prefix))
}

fn strip_prefix_len(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr).trim()
}

/// Lowest free host address in the subnet of `server_cidr` (e.g. `10.8.1.1/24`),
/// skipping the network, broadcast, server and `used` addresses.
pub fn allocate_ipv4(server_cidr: &str, used: &[String]) -> Option<Ipv4Addr> {
    let (server, prefix) = ipv4_network(server_cidr)?;
    if prefix >= 31 {
        return None;
    }
    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    let network = u32::from(server) & mask;
    let broadcast = network | !mask;

    let taken: HashSet<Ipv4Addr> = used
        .iter()
        .filter_map(|cidr| strip_prefix_len(cidr).parse().ok())
        .chain(std::iter::once(server))
        .collect();

    (network + 1..broadcast)
        .map(Ipv4Addr::from)
        .find(|candidate| !taken.contains(candidate))
}

/// Maps an IPv4 host into the interface's IPv6 prefix by reusing the host
/// part, e.g. `10.8.1.5` in `fd42:42:42::1/64` becomes `fd42:42:42::5`.
pub fn derive_ipv6(server_cidr: &str, host: Ipv4Addr, ipv4_prefix: u8) -> Option<Ipv6Addr> {
    let (addr, prefix) = server_cidr.split_once('/')?;
    let server: Ipv6Addr = addr.trim().parse().ok()?;
    let prefix: u8 = prefix.trim().parse().ok()?;
    if prefix > 96 {
        return None;
    }
    let host_mask = !u32::MAX
        .checked_shl(32 - u32::from(ipv4_prefix.min(32)))
        .unwrap_or(0);
    let host_part = u128::from(u32::from(host) & host_mask);
    let net_mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
    Some(Ipv6Addr::from((u128::from(server) & net_mask) | host_part))
}

/// Prefix length of the first IPv4 address in `addresses`.
pub fn first_ipv4(addresses: &[String]) -> Option<(&str, u8)> {
    addresses
        .iter()
        .find_map(|cidr| ipv4_network(cidr).map(|(_, prefix)| (cidr.as_str(), prefix)))
}

pub fn first_ipv6(addresses: &[String]) -> Option<&str> {
    addresses
        .iter()
        .map(String::as_str)
        .find(|cidr| strip_prefix_len(cidr).parse::<Ipv6Addr>().is_ok())
}
