//! The three-valued presence mode shared by the rewriter, the supervisor,
//! and the CLI's `--status` flag.

use serde::{Deserialize, Serialize};

/// A player's chosen visibility. `Online` means "pass through untouched".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    Offline,
    Mobile,
    Online,
}

impl PresenceMode {
    /// The token written into `<show>` / `<st>` tags on the wire.
    #[must_use]
    pub fn wire_token(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Mobile => "mobile",
            Self::Online => "chat",
        }
    }

    /// The human-facing label used in status messages sent by the fake
    /// contact (`"You are now appearing <label>."`). Distinct from
    /// [`wire_token`](Self::wire_token): `Online`'s wire token is `"chat"`
    /// but its label is `"online"`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Mobile => "mobile",
            Self::Online => "online",
        }
    }
}

impl std::fmt::Display for PresenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_are_stable() {
        assert_eq!(PresenceMode::Offline.wire_token(), "offline");
        assert_eq!(PresenceMode::Mobile.wire_token(), "mobile");
        assert_eq!(PresenceMode::Online.wire_token(), "chat");
    }

    #[test]
    fn online_label_differs_from_wire_token() {
        assert_eq!(PresenceMode::Online.label(), "online");
        assert_ne!(PresenceMode::Online.label(), PresenceMode::Online.wire_token());
    }
}
