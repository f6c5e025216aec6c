//! The regex-over-stream transform that hides League/Valorant/LoR
//! rich-presence data from the client's outbound `<presence>` stanzas.
//!
//! Deliberately not a real XML parser — the upstream stream is
//! XMPP-over-TLS whose stanzas arrive one-per-chunk, with unpredictable
//! whitespace. A proper parser would be the wrong tool for a
//! best-effort, fail-open rewrite.

use std::sync::LazyLock;

use base64::Engine as _;
use deceive_common::PresenceMode;
use regex::{Captures, Regex};

// These patterns are fixed string literals checked at review time, not
// user input — `expect` here can never fire outside a broken build.
#[allow(clippy::expect_used)]
static SHOW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<show>.*?</show>").expect("static regex"));

#[allow(clippy::expect_used)]
static LEAGUE_ST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(<games>.*?<league_of_legends>.*?)<st>[^<]*</st>").expect("static regex"));

#[allow(clippy::expect_used)]
static VALORANT_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<valorant>.*?<p>([^<]+)</p>").expect("static regex"));

#[allow(clippy::expect_used)]
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<status>.*?</status>").expect("static regex"));

#[allow(clippy::expect_used)]
static LEAGUE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<league_of_legends>(.*?)</league_of_legends>").expect("static regex"));

#[allow(clippy::expect_used)]
static VALORANT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<valorant>.*?</valorant>").expect("static regex"));

#[allow(clippy::expect_used)]
static BACON_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<bacon>.*?</bacon>").expect("static regex"));

#[allow(clippy::expect_used)]
static LION_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<lion>.*?</lion>").expect("static regex"));

#[allow(clippy::expect_used)]
static KEYSTONE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<keystone>.*?</keystone>").expect("static regex"));

#[allow(clippy::expect_used)]
static RIOT_CLIENT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<riot_client>.*?</riot_client>").expect("static regex"));

#[allow(clippy::expect_used)]
static FIRST_P_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<p>.*?</p>").expect("static regex"));

#[allow(clippy::expect_used)]
static FIRST_M_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<m>.*?</m>").expect("static regex"));

/// Rewrites a single chunk of outbound XMPP presence text for `mode`.
///
/// `cached_valorant_version` is per-connection state: once a Valorant
/// rich-presence blob has been observed, its `partyClientVersion` is
/// cached here and reused for the synthetic presence stanza, since the
/// value disappears from the stream the moment this function strips it.
///
/// Never panics (anything that would is caught and the original chunk
/// returned), mirroring the source's fail-open exception handling.
#[must_use]
pub fn rewrite_presence(
    chunk: &str,
    mode: PresenceMode,
    connect_to_muc: bool,
    cached_valorant_version: &mut Option<String>,
) -> String {
    let mut working = cached_valorant_version.clone();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        apply(chunk, mode, connect_to_muc, &mut working)
    }));
    match outcome {
        Ok(rewritten) => {
            *cached_valorant_version = working;
            rewritten
        },
        Err(_) => {
            tracing::error!("exception in RewritePresence, forwarding original chunk unchanged");
            chunk.to_string()
        },
    }
}

fn apply(chunk: &str, mode: PresenceMode, connect_to_muc: bool, cached_valorant_version: &mut Option<String>) -> String {
    if connect_to_muc && chunk.contains(" to=") {
        return chunk.to_string();
    }

    let token = mode.wire_token();
    let mut text = SHOW_RE
        .replace_all(chunk, |_: &Captures<'_>| format!("<show>{token}</show>"))
        .into_owned();

    text = LEAGUE_ST_RE
        .replace_all(&text, |caps: &Captures<'_>| format!("{}<st>{token}</st>", &caps[1]))
        .into_owned();

    if mode != PresenceMode::Online {
        text = STATUS_RE.replace_all(&text, "").into_owned();

        text = if mode == PresenceMode::Mobile {
            strip_first_presence_payload(&text)
        } else {
            LEAGUE_BLOCK_RE.replace_all(&text, "").into_owned()
        };

        // Captured before the block is stripped below — the version
        // disappears from the stream the moment that happens.
        if cached_valorant_version.is_none() {
            if let Some(caps) = VALORANT_VERSION_RE.captures(&text) {
                if let Some(version) = extract_valorant_version(&caps[1]) {
                    *cached_valorant_version = Some(version);
                }
            }
        }

        text = VALORANT_BLOCK_RE.replace_all(&text, "").into_owned();
        text = BACON_BLOCK_RE.replace_all(&text, "").into_owned();
        text = LION_BLOCK_RE.replace_all(&text, "").into_owned();
        text = KEYSTONE_BLOCK_RE.replace_all(&text, "").into_owned();
        text = RIOT_CLIENT_BLOCK_RE.replace_all(&text, "").into_owned();
    }

    text
}

/// Strips the first `<p>…</p>` and first `<m>…</m>` from each
/// `<league_of_legends>…</league_of_legends>` block, leaving the rest
/// of the block (including the already-rewritten `<st>`) intact.
fn strip_first_presence_payload(text: &str) -> String {
    LEAGUE_BLOCK_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let inner = remove_first_match(&caps[1], &FIRST_P_TAG_RE);
            let inner = remove_first_match(&inner, &FIRST_M_TAG_RE);
            format!("<league_of_legends>{inner}</league_of_legends>")
        })
        .into_owned()
}

fn remove_first_match(text: &str, re: &Regex) -> String {
    match re.find(text) {
        Some(m) => format!("{}{}", &text[..m.start()], &text[m.end()..]),
        None => text.to_string(),
    }
}

/// Base64-decodes a captured Valorant `<p>` payload and extracts
/// `partyPresenceData.partyClientVersion`. Parse failures are silently
/// ignored — a missing version is no worse than one never having been
/// observed.
fn extract_valorant_version(encoded: &str) -> Option<String> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    json.get("partyPresenceData")?
        .get("partyClientVersion")?
        .as_str()
        .map(ToString::to_string)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_strips_everything_but_show_and_empty_games() {
        let input = "<presence><show>chat</show><status>hi</status><games><league_of_legends><st>chat</st><p>x</p></league_of_legends><valorant><st>chat</st></valorant></games></presence>";
        let mut cache = None;
        let out = rewrite_presence(input, PresenceMode::Offline, true, &mut cache);
        assert_eq!(out, "<presence><show>offline</show><games></games></presence>");
    }

    #[test]
    fn mobile_keeps_league_block_without_rich_presence_payload() {
        let input = "<presence><show>chat</show><status>hi</status><games><league_of_legends><st>chat</st><p>x</p></league_of_legends><valorant><st>chat</st></valorant></games></presence>";
        let mut cache = None;
        let out = rewrite_presence(input, PresenceMode::Mobile, true, &mut cache);
        assert_eq!(
            out,
            "<presence><show>mobile</show><games><league_of_legends><st>mobile</st></league_of_legends></games></presence>"
        );
    }

    #[test]
    fn online_mode_is_effectively_identity_on_already_chat_tokens() {
        let input = "<presence><show>chat</show><games><league_of_legends><st>chat</st></league_of_legends></games></presence>";
        let mut cache = None;
        let out = rewrite_presence(input, PresenceMode::Online, true, &mut cache);
        assert_eq!(out, input);
    }

    #[test]
    fn muc_passthrough_is_identity_regardless_of_mode() {
        let input = "<presence to='room@muc.pvp.net'><show>chat</show></presence>";
        let mut cache = None;
        let out = rewrite_presence(input, PresenceMode::Offline, true, &mut cache);
        assert_eq!(out, input);
    }

    #[test]
    fn muc_passthrough_disabled_still_rewrites() {
        let input = "<presence to='room@muc.pvp.net'><show>chat</show></presence>";
        let mut cache = None;
        let out = rewrite_presence(input, PresenceMode::Offline, false, &mut cache);
        assert_eq!(out, "<presence to='room@muc.pvp.net'><show>offline</show></presence>");
    }

    #[test]
    fn caches_valorant_version_before_stripping_block() {
        let payload = serde_json::json!({
            "partyPresenceData": { "partyClientVersion": "9.8.7.654321" }
        });
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload.to_string());
        let input = format!("<presence><show>chat</show><games><valorant><st>chat</st><p>{encoded}</p></valorant></games></presence>");
        let mut cache = None;
        let out = rewrite_presence(&input, PresenceMode::Offline, true, &mut cache);
        assert_eq!(cache.as_deref(), Some("9.8.7.654321"));
        assert!(!out.contains("<valorant>"));
    }

    #[test]
    fn split_fragment_without_closing_tag_is_forwarded_unchanged() {
        // A chunk boundary landing mid-stanza never contains a matching
        // pair, so every substitution is a no-op and the fragment passes
        // through byte-for-byte.
        let input = "<presence><show>ch";
        let mut cache = None;
        let out = rewrite_presence(input, PresenceMode::Offline, true, &mut cache);
        assert_eq!(out, input);
    }
}
