//! String id → player factory.

use std::collections::BTreeMap;

use tk_core::Config;

use crate::mcts_player::MctsPlayer;
use crate::player::{Player, PlayerError};
use crate::random_player::RandomPlayer;

pub type PlayerFactory = fn(&Config) -> Result<Box<dyn Player>, PlayerError>;

/// Built once at startup and handed to whoever creates players.
#[derive(Clone)]
pub struct PlayerRegistry {
    factories: BTreeMap<String, PlayerFactory>,
}

impl PlayerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// `"mcts"` and `"random"`.
    pub fn with_builtin() -> Self {
        let mut reg = Self::empty();
        reg.register("mcts", create_mcts);
        reg.register("random", create_random);
        reg
    }

    /// Add or replace the factory for `name`.
    pub fn register(&mut self, name: &str, factory: PlayerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, config: &Config) -> Result<Box<dyn Player>, PlayerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PlayerError::UnknownPlayer(name.to_string()))?;
        factory(config)
    }
}

fn create_mcts(config: &Config) -> Result<Box<dyn Player>, PlayerError> {
    Ok(Box::new(MctsPlayer::new(config)?))
}

fn create_random(config: &Config) -> Result<Box<dyn Player>, PlayerError> {
    Ok(Box::new(RandomPlayer::new(config)))
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
