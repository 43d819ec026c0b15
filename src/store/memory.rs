use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::PlayerStateStore;
use crate::core::{BridgeError, InventoryEntry, PlayerId, PlayerProfile};

/// In-memory player-state store.
///
/// Backs tests and single-process embeddings. Every read hands out clones,
/// so values returned across the bridge never alias the stored state.
#[derive(Default)]
pub struct InMemoryPlayerStore {
    players: RwLock<HashMap<PlayerId, PlayerRecord>>,
}

#[derive(Debug, Clone, Default)]
struct PlayerRecord {
    display_name: String,
    level: u32,
    experience: u64,
    custom_data: Value,
    statistics: BTreeMap<String, i64>,
    currencies: HashMap<String, i64>,
    inventory: Vec<InventoryEntry>,
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player. Existing state for the id is replaced.
    pub async fn add_player(&self, player_id: impl Into<PlayerId>, display_name: impl Into<String>) {
        let record = PlayerRecord {
            display_name: display_name.into(),
            custom_data: Value::Object(Default::default()),
            ..Default::default()
        };
        self.players.write().await.insert(player_id.into(), record);
    }

    /// Set a currency balance directly (test seeding).
    pub async fn set_balance(&self, player_id: &PlayerId, currency: &str, amount: i64) {
        if let Some(record) = self.players.write().await.get_mut(player_id) {
            record.currencies.insert(currency.to_string(), amount);
        }
    }

    /// Current balance, if the player and currency exist.
    pub async fn balance(&self, player_id: &PlayerId, currency: &str) -> Option<i64> {
        self.players
            .read()
            .await
            .get(player_id)
            .and_then(|record| record.currencies.get(currency).copied())
    }

    /// Current value of one statistic, if present.
    pub async fn statistic(&self, player_id: &PlayerId, name: &str) -> Option<i64> {
        self.players
            .read()
            .await
            .get(player_id)
            .and_then(|record| record.statistics.get(name).copied())
    }

    /// Snapshot of the player's stored inventory.
    pub async fn stored_inventory(&self, player_id: &PlayerId) -> Vec<InventoryEntry> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|record| record.inventory.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the player's custom data.
    pub async fn custom_data(&self, player_id: &PlayerId) -> Option<Value> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|record| record.custom_data.clone())
    }
}

#[async_trait]
impl PlayerStateStore for InMemoryPlayerStore {
    async fn get_profile(&self, player_id: &PlayerId) -> Result<PlayerProfile, BridgeError> {
        let players = self.players.read().await;
        let record = players
            .get(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        Ok(PlayerProfile {
            player_id: player_id.clone(),
            display_name: record.display_name.clone(),
            level: record.level,
            experience: record.experience,
            custom_data: record.custom_data.clone(),
            statistics: record.statistics.clone(),
        })
    }

    async fn set_custom_data(&self, player_id: &PlayerId, data: Value) -> Result<(), BridgeError> {
        let mut players = self.players.write().await;
        let record = players
            .get_mut(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        record.custom_data = data;
        Ok(())
    }

    async fn get_inventory(&self, player_id: &PlayerId) -> Result<Vec<InventoryEntry>, BridgeError> {
        let players = self.players.read().await;
        let record = players
            .get(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        Ok(record.inventory.clone())
    }

    async fn grant_item(
        &self,
        player_id: &PlayerId,
        item_id: &str,
        catalog_version: Option<u32>,
    ) -> Result<InventoryEntry, BridgeError> {
        let mut players = self.players.write().await;
        let record = players
            .get_mut(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        let entry = InventoryEntry {
            item_id: item_id.to_string(),
            instance_id: Uuid::new_v4(),
            catalog_version,
            granted_at: Utc::now(),
        };
        record.inventory.push(entry.clone());
        Ok(entry)
    }

    async fn add_currency(
        &self,
        player_id: &PlayerId,
        currency: &str,
        amount: i64,
    ) -> Result<i64, BridgeError> {
        let mut players = self.players.write().await;
        let record = players
            .get_mut(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        let balance = record.currencies.entry(currency.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }

    async fn subtract_currency(
        &self,
        player_id: &PlayerId,
        currency: &str,
        amount: i64,
    ) -> Result<i64, BridgeError> {
        let mut players = self.players.write().await;
        let record = players
            .get_mut(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        // Check and decrement under the same write lock: this is the atomic
        // conditional debit the trait contract requires.
        let balance = record.currencies.entry(currency.to_string()).or_insert(0);
        if *balance < amount {
            return Err(BridgeError::InsufficientFunds {
                currency: currency.to_string(),
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    async fn update_statistics(
        &self,
        player_id: &PlayerId,
        deltas: BTreeMap<String, i64>,
    ) -> Result<BTreeMap<String, i64>, BridgeError> {
        let mut players = self.players.write().await;
        let record = players
            .get_mut(player_id)
            .ok_or_else(|| BridgeError::PlayerNotFound(player_id.clone()))?;

        let mut updated = BTreeMap::new();
        for (name, delta) in deltas {
            let value = record.statistics.entry(name.clone()).or_insert(0);
            *value = value.saturating_add(delta);
            updated.insert(name, *value);
        }
        Ok(updated)
    }
}
