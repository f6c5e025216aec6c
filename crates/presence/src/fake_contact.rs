//! The synthetic "Deceive Active!" contact: roster entry, initial
//! presence push, and the chat-message builder used for command echoes
//! and the intro sequence.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use chrono::Utc;
use uuid::Uuid;

/// Bare JID of the fake contact.
pub const FAKE_JID: &str = "41c322a1-b328-495b-a004-5ccd3e45eae8@eu1.pvp.net";

/// UUID portion of [`FAKE_JID`], used as the roster entry's `puuid`.
pub const FAKE_PUUID: &str = "41c322a1-b328-495b-a004-5ccd3e45eae8";

/// XMPP resource the fake contact's stanzas carry.
pub const FAKE_RESOURCE: &str = "RC-Deceive";

/// Display name. The leading tab is intentional — it sorts the fake
/// contact above real friends in the client's roster UI.
pub const FAKE_DISPLAY_NAME: &str = "\tDeceive Active!";

/// Full `from` JID (bare JID + resource) used on every stanza the fake
/// contact emits.
fn fake_from() -> String {
    format!("{FAKE_JID}/{FAKE_RESOURCE}")
}

/// Builds the `<item/>` spliced into the outbound roster query
/// immediately after its opening tag.
#[must_use]
pub fn roster_item() -> String {
    format!(
        "<item jid='{FAKE_JID}' name='{FAKE_DISPLAY_NAME}' subscription='both' puuid='{FAKE_PUUID}'>\
<group priority='9999'>Deceive</group>\
<state>online</state>\
<id name='{FAKE_DISPLAY_NAME}' tagline='...'/>\
<lol name='{FAKE_DISPLAY_NAME}'/>\
<platforms><riot name='Deceive Active' tagline='...'/></platforms>\
</item>"
    )
}

/// Builds the one-shot synthetic presence pushed to the client once the
/// roster has been patched.
///
/// `cached_valorant_version` is the version captured by
/// [`crate::rewrite::rewrite_presence`], if any.
#[must_use]
pub fn synthetic_presence(cached_valorant_version: Option<&str>) -> String {
    let party_client_version = cached_valorant_version.unwrap_or("unknown");
    let valorant_payload = serde_json::json!({
        "isValid": true,
        "partyId": "00000000-0000-0000-0000-000000000000",
        "partyClientVersion": party_client_version,
        "accountLevel": 1000,
    });
    let valorant_presence = base64::engine::general_purpose::STANDARD.encode(valorant_payload.to_string());

    let random_id = Uuid::new_v4();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    format!(
        "<presence from='{from}' id='b-{random_id}'>\
<games>\
<keystone><st>chat</st><s.t>{ts}</s.t><s.p>keystone</s.p></keystone>\
<league_of_legends><st>chat</st><s.t>{ts}</s.t><s.p>league_of_legends</s.p><s.c>live</s.c><p>{{\"pty\":true}}</p></league_of_legends>\
<valorant><st>chat</st><s.t>{ts}</s.t><s.p>valorant</s.p><s.r>PC</s.r><p>{valorant_presence}</p></valorant>\
<bacon><st>chat</st><s.t>{ts}</s.t><s.p>bacon</s.p><s.l>bacon_availability_online</s.l></bacon>\
</games>\
<show>chat</show><platform>riot</platform><status/>\
</presence>",
        from = fake_from(),
    )
}

/// Builds a synthetic chat message from the fake contact, used for
/// command echoes and the intro sequence.
///
/// Only meaningful to send once the roster has been patched and the
/// connection is still alive — callers are responsible for that check.
#[must_use]
pub fn synthetic_message(text: &str) -> String {
    let stamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true).replace('T', " ");
    let stamp = stamp.trim_end_matches('Z');
    let body = escape_xml(text);
    format!("<message from='{from}' stamp='{stamp}' id='fake-{stamp}' type='chat'><body>{body}</body></message>", from = fake_from())
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
