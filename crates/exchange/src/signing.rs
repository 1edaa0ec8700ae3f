//! HMAC-SHA256 request signatures.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tradewatch_core::FetchError;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &str) -> Result<Vec<u8>, FetchError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| FetchError::Authentication(format!("failed to create signing key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Bybit v5: hex HMAC of `timestamp + api_key + recv_window + query`.
pub(crate) fn bybit_signature(
    secret: &str,
    timestamp: i64,
    api_key: &str,
    recv_window: u64,
    query: &str,
) -> Result<String, FetchError> {
    let payload = format!("{timestamp}{api_key}{recv_window}{query}");
    Ok(hex::encode(mac(secret, &payload)?))
}

/// Bitget v2: base64 HMAC of `timestamp + METHOD + path[?query] + body`.
pub(crate) fn bitget_signature(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    query: &str,
    body: &str,
) -> Result<String, FetchError> {
    let request_path = if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    };
    let prehash = format!("{timestamp}{}{request_path}{body}", method.to_uppercase());
    Ok(STANDARD.encode(mac(secret, &prehash)?))
}
