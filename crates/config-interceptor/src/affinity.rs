//! Resolving the player's geographic chat shard via the Player Affinity
//! Service. Failure anywhere in this module is swallowed by the caller
//! — the candidate host simply falls back to its pre-existing value.

use base64::Engine as _;
use serde_json::{Map, Value};
use tracing::debug;

/// Bound on the PAS round trip.
pub const PAS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Performs `GET pas_url` with the given `Authorization` header, decodes
/// the dot-separated JWT response body, and looks the resulting
/// `affinity` claim up in `affinities`. Returns `None` on any failure —
/// transport error, timeout, malformed JWT, unparseable payload, or a
/// missing/unknown affinity key — so the caller can fall back silently.
pub async fn resolve(http: &reqwest::Client, pas_url: &str, authorization: &str, affinities: &Map<String, Value>) -> Option<String> {
    let response = http
        .get(pas_url)
        .header(reqwest::header::AUTHORIZATION, authorization)
        .timeout(PAS_TIMEOUT)
        .send()
        .await
        .inspect_err(|e| debug!(error = %e, "PAS affinity request failed"))
        .ok()?;

    let jwt = response
        .text()
        .await
        .inspect_err(|e| debug!(error = %e, "PAS affinity response body unreadable"))
        .ok()?;

    let affinity = decode_affinity_claim(&jwt)?;
    debug!(%affinity, "resolved PAS affinity");
    affinities.get(&affinity).and_then(Value::as_str).map(str::to_string)
}

/// Extracts the `affinity` claim from a `h.p.s` JWT's base64url-encoded
/// payload segment.
fn decode_affinity_claim(jwt: &str) -> Option<String> {
    let payload_segment = jwt.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_segment)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(payload_segment))
        .ok()?;
    let payload: Value = serde_json::from_slice(&decoded).ok()?;
    payload.get("affinity")?.as_str().map(str::to_string)
}
