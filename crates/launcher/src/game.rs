//! The game/product selector used to build the client launch line.

/// Which product to launch, as named on the CLI surface
/// (`lol|valorant|lor|lion|riot-client|prompt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum Game {
    /// League of Legends.
    Lol,
    /// VALORANT.
    Valorant,
    /// Legends of Runeterra.
    Lor,
    /// League of Legends: Wild Rift.
    Lion,
    /// Riot Client with no product argument.
    RiotClient,
    /// Let the client itself prompt for a product.
    Prompt,
}

impl Game {
    /// The `--launch-product` value for this game, or `None` for the
    /// games that omit both product flags (`RiotClient` / `Prompt` omit
    /// both).
    #[must_use]
    pub fn product_code(self) -> Option<&'static str> {
        match self {
            Self::Lol => Some("league_of_legends"),
            Self::Valorant => Some("valorant"),
            Self::Lor => Some("bacon"),
            Self::Lion => Some("lion"),
            Self::RiotClient | Self::Prompt => None,
        }
    }

    /// The config-file string form (`defaultGame`).
    #[must_use]
    pub fn as_config_str(self) -> &'static str {
        match self {
            Self::Lol => "lol",
            Self::Valorant => "valorant",
            Self::Lor => "lor",
            Self::Lion => "lion",
            Self::RiotClient => "riot-client",
            Self::Prompt => "prompt",
        }
    }

    /// Parses the config-file string form back into a [`Game`], falling
    /// back to [`Game::Prompt`] for anything unrecognized.
    #[must_use]
    pub fn from_config_str(value: &str) -> Self {
        match value {
            "lol" => Self::Lol,
            "valorant" => Self::Valorant,
            "lor" => Self::Lor,
            "lion" => Self::Lion,
            "riot-client" => Self::RiotClient,
            _ => Self::Prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_codes_match_known_clients() {
        assert_eq!(Game::Lol.product_code(), Some("league_of_legends"));
        assert_eq!(Game::Valorant.product_code(), Some("valorant"));
        assert_eq!(Game::Lor.product_code(), Some("bacon"));
        assert_eq!(Game::Lion.product_code(), Some("lion"));
        assert_eq!(Game::RiotClient.product_code(), None);
        assert_eq!(Game::Prompt.product_code(), None);
    }

    #[test]
    fn config_str_round_trips() {
        for game in [Game::Lol, Game::Valorant, Game::Lor, Game::Lion, Game::RiotClient, Game::Prompt] {
            assert_eq!(Game::from_config_str(game.as_config_str()), game);
        }
    }

    #[test]
    fn unrecognized_config_str_falls_back_to_prompt() {
        assert_eq!(Game::from_config_str("garbage"), Game::Prompt);
    }
}
