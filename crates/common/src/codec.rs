//! Shareable `vpn://` encoding of a peer configuration.
//!
//! Wire format: `vpn://` + URL-safe base64 (no padding) of
//! `[u32 big-endian uncompressed length][zlib stream]`.

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, info};

pub const URI_SCHEME: &str = "vpn://";

const COMPRESSION_LEVEL: u32 = 8;
const LENGTH_PREFIX_LEN: usize = 4;
const INFLATE_CHUNK: usize = 4096;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*Endpoint\s*=\s*)([^\s:]+):(\d+)(.*)$").expect("static regex")
});

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),
    #[error("Could not resolve endpoint host '{host}': {reason}")]
    Resolution { host: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn corrupt(reason: impl Into<String>) -> CodecError {
    CodecError::CorruptPayload(reason.into())
}

/// Resolves a hostname to a literal address for the encoded endpoint.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, CodecError>;
}

/// Resolver backed by the system's `getaddrinfo`, preferring IPv4 like the
/// client apps do.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, CodecError> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| CodecError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .map(|addr| addr.ip())
            .collect();
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| CodecError::Resolution {
                host: host.to_string(),
                reason: "no addresses returned".to_string(),
            })
    }
}

/// Compresses and wraps configuration text into a `vpn://` URI.
pub fn encode(config_text: &str) -> Result<String, CodecError> {
    let bytes = config_text.as_bytes();
    let declared_len = u32::try_from(bytes.len())
        .map_err(|_| corrupt("configuration is larger than 4 GiB"))?;

    let mut payload = Vec::with_capacity(bytes.len() / 2 + LENGTH_PREFIX_LEN);
    payload.extend_from_slice(&declared_len.to_be_bytes());
    let mut encoder = ZlibEncoder::new(payload, Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(bytes)?;
    let payload = encoder.finish()?;

    Ok(format!("{URI_SCHEME}{}", URL_SAFE_LENIENT.encode(payload)))
}

/// Reverses [`encode`]. Any truncation, bit flip, or length mismatch is
/// reported as [`CodecError::CorruptPayload`]; partial text is never returned.
pub fn decode(uri: &str) -> Result<String, CodecError> {
    let trimmed = uri.trim();
    let body = trimmed.strip_prefix(URI_SCHEME).unwrap_or(trimmed);
    let body = body.trim_end_matches('=');
    if body.is_empty() {
        return Err(corrupt("empty payload"));
    }

    let raw = URL_SAFE_LENIENT
        .decode(body)
        .map_err(|e| corrupt(format!("invalid base64: {e}")))?;
    if raw.len() <= LENGTH_PREFIX_LEN {
        return Err(corrupt("payload shorter than its length prefix"));
    }

    let (prefix, compressed) = raw.split_at(LENGTH_PREFIX_LEN);
    let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
    len_bytes.copy_from_slice(prefix);
    let declared_len = u32::from_be_bytes(len_bytes) as usize;

    let inflated = inflate_exact(compressed, declared_len)?;
    String::from_utf8(inflated).map_err(|e| corrupt(format!("not valid UTF-8: {e}")))
}

/// Inflates a complete zlib stream, insisting on a clean stream end, no
/// trailing bytes, and exactly `expected_len` bytes of output.
fn inflate_exact(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(expected_len.min(1 << 20) + 1);

    loop {
        if out.len() > expected_len {
            return Err(corrupt("decompressed data exceeds the declared length"));
        }
        if out.len() == out.capacity() {
            out.reserve(INFLATE_CHUNK);
        }
        let consumed_before = inflater.total_in();
        let produced_before = inflater.total_out();
        let consumed = consumed_before as usize;

        let status = inflater
            .decompress_vec(&compressed[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| corrupt(format!("decompression failed: {e}")))?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled = inflater.total_in() == consumed_before
                    && inflater.total_out() == produced_before;
                if stalled {
                    return Err(corrupt("compressed stream is truncated"));
                }
            }
        }
    }

    if inflater.total_in() as usize != compressed.len() {
        return Err(corrupt("trailing bytes after the compressed stream"));
    }
    if out.len() != expected_len {
        return Err(corrupt(format!(
            "length mismatch: declared {expected_len}, got {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Replaces hostnames in `Endpoint = host:port` lines with a literal address.
/// Lines with an IP literal, and all other lines, are left untouched.
pub async fn resolve_endpoints(
    config_text: &str,
    resolver: &dyn HostResolver,
) -> Result<String, CodecError> {
    let mut resolved = String::with_capacity(config_text.len());
    for line in config_text.split_inclusive('\n') {
        let (content, ending) = match line.strip_suffix('\n') {
            Some(rest) => match rest.strip_suffix('\r') {
                Some(inner) => (inner, "\r\n"),
                None => (rest, "\n"),
            },
            None => (line, ""),
        };

        let Some(caps) = ENDPOINT_RE.captures(content) else {
            resolved.push_str(line);
            continue;
        };
        let host = &caps[2];
        if host.parse::<IpAddr>().is_ok() {
            resolved.push_str(line);
            continue;
        }

        let ip = resolver.resolve(host).await?;
        info!(host = %host, ip = %ip, "Resolved endpoint host.");
        resolved.push_str(&caps[1]);
        resolved.push_str(&ip.to_string());
        resolved.push(':');
        resolved.push_str(&caps[3]);
        resolved.push_str(&caps[4]);
        resolved.push_str(ending);
    }
    debug!(bytes = resolved.len(), "Endpoint resolution pass finished.");
    Ok(resolved)
}

/// Resolves endpoint hostnames, then encodes. A failed lookup aborts the whole
/// encode so an unresolved endpoint is never shared.
pub async fn encode_resolved(
    config_text: &str,
    resolver: &dyn HostResolver,
) -> Result<String, CodecError> {
    let resolved = resolve_endpoints(config_text, resolver).await?;
    encode(&resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE_CONFIG: &str = "[Interface]\n\
        PrivateKey = cGVlci1wcml2YXRlLWtleS1wbGFjZWhvbGRlcj0=\n\
        Address = 10.8.1.2/32\n\
        DNS = 1.1.1.1, 1.0.0.1\n\
        Jc = 4\n\
        Jmin = 40\n\
        Jmax = 70\n\
        \n\
        [Peer]\n\
        PublicKey = c2VydmVyLXB1YmxpYy1rZXktcGxhY2Vob2xkZXI9\n\
        Endpoint = vpn.example.com:51820\n\
        AllowedIPs = 0.0.0.0/0, ::/0\n\
        PersistentKeepalive = 25\n";

    struct StaticResolver(HashMap<&'static str, IpAddr>);

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, host: &str) -> Result<IpAddr, CodecError> {
            self.0
                .get(host)
                .copied()
                .ok_or_else(|| CodecError::Resolution {
                    host: host.to_string(),
                    reason: "unknown host".to_string(),
                })
        }
    }

    fn resolver() -> StaticResolver {
        StaticResolver(HashMap::from([(
            "vpn.example.com",
            "203.0.113.7".parse().unwrap(),
        )]))
    }

    fn raw_payload(uri: &str) -> Vec<u8> {
        URL_SAFE_LENIENT
            .decode(uri.strip_prefix(URI_SCHEME).unwrap())
            .unwrap()
    }

    fn wrap(payload: &[u8]) -> String {
        format!("{URI_SCHEME}{}", URL_SAFE_LENIENT.encode(payload))
    }

    #[test]
    fn test_round_trip_sample_config() {
        let uri = encode(SAMPLE_CONFIG).unwrap();
        assert!(uri.starts_with(URI_SCHEME));
        assert!(!uri.contains('='));
        assert_eq!(decode(&uri).unwrap(), SAMPLE_CONFIG);
    }

    #[test]
    fn test_round_trip_printable_and_unicode() {
        let mut text: String = (0x20u8..0x7f).map(char::from).collect();
        text.push_str("\nклиент-1 ✓\r\n\t");
        let uri = encode(&text).unwrap();
        assert_eq!(decode(&uri).unwrap(), text);
        assert_eq!(decode(&encode("").unwrap()).unwrap(), "");
    }

    #[test]
    fn test_length_prefix_is_uncompressed_length() {
        let uri = encode(SAMPLE_CONFIG).unwrap();
        let payload = raw_payload(&uri);
        let declared = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert_eq!(declared as usize, SAMPLE_CONFIG.len());
    }

    #[test]
    fn test_accepts_padded_input() {
        let uri = encode("Endpoint = 1.2.3.4:1").unwrap();
        let padded = format!("{uri}==");
        assert_eq!(decode(&padded).unwrap(), "Endpoint = 1.2.3.4:1");
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let uri = encode(SAMPLE_CONFIG).unwrap();
        let truncated = &uri[..uri.len() - 1];
        assert!(matches!(
            decode(truncated),
            Err(CodecError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_flipped_body_byte_is_corrupt() {
        let uri = encode(SAMPLE_CONFIG).unwrap();
        let mut payload = raw_payload(&uri);
        let middle = LENGTH_PREFIX_LEN + (payload.len() - LENGTH_PREFIX_LEN) / 2;
        payload[middle] ^= 0x01;
        assert!(matches!(
            decode(&wrap(&payload)),
            Err(CodecError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_wrong_length_prefix_is_corrupt() {
        let uri = encode(SAMPLE_CONFIG).unwrap();
        let mut payload = raw_payload(&uri);
        payload[3] = payload[3].wrapping_add(1);
        assert!(matches!(
            decode(&wrap(&payload)),
            Err(CodecError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(decode("vpn://"), Err(CodecError::CorruptPayload(_))));
        assert!(matches!(
            decode("vpn://!!!not-base64!!!"),
            Err(CodecError::CorruptPayload(_))
        ));
        assert!(matches!(decode("vpn://AAAA"), Err(CodecError::CorruptPayload(_))));
    }

    #[tokio::test]
    async fn test_resolve_endpoints_rewrites_hostname_only() {
        let resolved = resolve_endpoints(SAMPLE_CONFIG, &resolver()).await.unwrap();
        assert!(resolved.contains("Endpoint = 203.0.113.7:51820\n"));
        assert!(resolved.contains("DNS = 1.1.1.1, 1.0.0.1\n"));
        assert_eq!(resolved.lines().count(), SAMPLE_CONFIG.lines().count());
    }

    #[tokio::test]
    async fn test_literal_endpoint_is_untouched() {
        let text = "[Peer]\r\nEndpoint = 198.51.100.2:443\r\n";
        let resolved = resolve_endpoints(text, &resolver()).await.unwrap();
        assert_eq!(resolved, text);
    }

    #[tokio::test]
    async fn test_resolution_failure_aborts_encode() {
        let text = "Endpoint = unknown.invalid:51820\n";
        let result = encode_resolved(text, &resolver()).await;
        assert!(matches!(result, Err(CodecError::Resolution { .. })));
    }

    #[tokio::test]
    async fn test_encode_resolved_round_trips_resolved_text() {
        let uri = encode_resolved(SAMPLE_CONFIG, &resolver()).await.unwrap();
        let decoded = decode(&uri).unwrap();
        assert!(decoded.contains("Endpoint = 203.0.113.7:51820"));
        assert!(!decoded.contains("vpn.example.com"));
    }
}
