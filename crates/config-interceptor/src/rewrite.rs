//! The bootstrap-config JSON mutation steps applied to the client's
//! config document. Pure and synchronous so it's testable without
//! spinning up the HTTP server or a mock upstream.

use serde_json::{Map, Value, json};

/// Host/port recovered from the pre-mutation body, before they're
/// overwritten with loopback / the Chat Interceptor's port. `None` when
/// the corresponding field was absent or of the wrong JSON type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Applies the host/port/cert rewrites to `body` in place, returning the
/// candidate host/port recovered from the original values. PAS affinity
/// resolution is handled separately since it requires network I/O;
/// callers should overwrite `candidate.host` with its result before
/// calling [`blank_affinities`].
pub fn apply_basic_rewrites(body: &mut Value, chat_port: u16) -> Candidate {
    let Some(obj) = body.as_object_mut() else {
        return Candidate::default();
    };

    let mut candidate = Candidate::default();

    if let Some(host) = obj.get("chat.host").and_then(Value::as_str) {
        candidate.host = Some(host.to_string());
        obj.insert("chat.host".to_string(), json!("127.0.0.1"));
    }

    if let Some(port) = obj.get("chat.port").and_then(Value::as_u64) {
        if let Ok(port) = u16::try_from(port) {
            candidate.port = Some(port);
        }
        obj.insert("chat.port".to_string(), json!(chat_port));
    }

    if obj.contains_key("chat.allow_bad_cert.enabled") {
        obj.insert("chat.allow_bad_cert.enabled".to_string(), json!(true));
    }

    candidate
}

/// Unconditionally replaces every value in `chat.affinities` with
/// `"127.0.0.1"`, regardless of whether the PAS lookup ran or succeeded.
pub fn blank_affinities(body: &mut Value) {
    let Some(Value::Object(affinities)) = body.get_mut("chat.affinities") else {
        return;
    };
    for value in affinities.values_mut() {
        *value = json!("127.0.0.1");
    }
}

/// Returns the `chat.affinities` object, if present, for the PAS lookup
/// in step 4 to search by region key.
pub fn affinities(body: &Value) -> Option<&Map<String, Value>> {
    body.get("chat.affinities").and_then(Value::as_object)
}

/// `true` when the body both has an object `chat.affinities` and
/// `chat.affinity.enabled === true` — the guard for whether a PAS
/// lookup should be attempted at all.
#[must_use]
pub fn affinity_lookup_enabled(body: &Value) -> bool {
    affinities(body).is_some() && body.get("chat.affinity.enabled") == Some(&Value::Bool(true))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_host_and_port_and_records_candidates() {
        let mut body = json!({"chat.host": "chat.na.lol.riotgames.com", "chat.port": 5223});
        let candidate = apply_basic_rewrites(&mut body, 54321);
        assert_eq!(candidate.host.as_deref(), Some("chat.na.lol.riotgames.com"));
        assert_eq!(candidate.port, Some(5223));
        assert_eq!(body["chat.host"], "127.0.0.1");
        assert_eq!(body["chat.port"], 54321);
    }

    #[test]
    fn allow_bad_cert_forced_true_only_when_present() {
        let mut present = json!({"chat.allow_bad_cert.enabled": false});
        apply_basic_rewrites(&mut present, 1);
        assert_eq!(present["chat.allow_bad_cert.enabled"], true);

        let mut absent = json!({});
        apply_basic_rewrites(&mut absent, 1);
        assert!(absent.get("chat.allow_bad_cert.enabled").is_none());
    }

    #[test]
    fn blank_affinities_replaces_every_value() {
        let mut body = json!({"chat.affinities": {"na1": "a", "eu1": "b"}});
        blank_affinities(&mut body);
        assert_eq!(body["chat.affinities"]["na1"], "127.0.0.1");
        assert_eq!(body["chat.affinities"]["eu1"], "127.0.0.1");
    }

    #[test]
    fn affinity_lookup_enabled_requires_both_object_and_flag() {
        assert!(affinity_lookup_enabled(
            &json!({"chat.affinities": {}, "chat.affinity.enabled": true})
        ));
        assert!(!affinity_lookup_enabled(
            &json!({"chat.affinities": {}, "chat.affinity.enabled": false})
        ));
        assert!(!affinity_lookup_enabled(&json!({"chat.affinity.enabled": true})));
    }
}
