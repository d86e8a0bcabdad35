//! Client tunnel configuration
//!
//! Renders the blob the client imports into its local tunnel engine.
//! The client generated its own keypair; only its public key ever
//! reaches the plane, so the private key stays a placeholder.

use base64::Engine;
use std::net::Ipv4Addr;
use tunnel_common::{CoreError, CoreResult};
use tunnel_registry::Server;

/// Curve25519 key length
const KEY_LEN: usize = 32;

/// Keepalive the rendered config asks the client to hold
const PERSISTENT_KEEPALIVE_SECS: u32 = 25;

/// Validate a client tunnel public key: base64 of 32 bytes
pub fn validate_client_key(key: &str) -> CoreResult<()> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(key.trim())
        .map_err(|_| CoreError::InvalidInput("client public key is not valid base64".into()))?;
    if decoded.len() != KEY_LEN {
        return Err(CoreError::InvalidInput(format!(
            "client public key must decode to {KEY_LEN} bytes"
        )));
    }
    Ok(())
}

/// Render the tunnel configuration for a leased address on a server
pub fn render_config(server: &Server, client_address: Ipv4Addr, dns_servers: &[String]) -> String {
    let allowed: Vec<String> = server
        .allowed_prefixes
        .iter()
        .map(|p| p.to_string())
        .collect();
    format!(
        "[Interface]\n\
         PrivateKey = <client_private_key>\n\
         Address = {client_address}/32\n\
         DNS = {dns}\n\
         \n\
         [Peer]\n\
         PublicKey = {peer_key}\n\
         Endpoint = {endpoint}\n\
         AllowedIPs = {allowed}\n\
         PersistentKeepalive = {keepalive}\n",
        dns = dns_servers.join(", "),
        peer_key = server.public_key,
        endpoint = server.endpoint(),
        allowed = allowed.join(", "),
        keepalive = PERSISTENT_KEEPALIVE_SECS,
    )
}
