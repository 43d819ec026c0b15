pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::{BridgeError, InventoryEntry, PlayerId, PlayerProfile};

pub use memory::InMemoryPlayerStore;

/// Backing player-state collaborator the capability bridge calls into.
///
/// Implementations hold the durable stores for profiles, inventory,
/// currency and statistics; sandboxed code never sees them directly.
/// Reads are idempotent. Writes are best-effort atomic at the store layer:
/// in particular, `subtract_currency` must make the balance check and the
/// decrement one atomic step, because concurrent invocations against the
/// same player are not serialized by the engine.
#[async_trait]
pub trait PlayerStateStore: Send + Sync {
    /// Read-only projection of the player's profile.
    async fn get_profile(&self, player_id: &PlayerId) -> Result<PlayerProfile, BridgeError>;

    /// Overwrite the player's custom-data projection.
    async fn set_custom_data(&self, player_id: &PlayerId, data: Value) -> Result<(), BridgeError>;

    /// List the player's inventory.
    async fn get_inventory(&self, player_id: &PlayerId) -> Result<Vec<InventoryEntry>, BridgeError>;

    /// Grant one item instance with a freshly generated instance id.
    async fn grant_item(
        &self,
        player_id: &PlayerId,
        item_id: &str,
        catalog_version: Option<u32>,
    ) -> Result<InventoryEntry, BridgeError>;

    /// Credit a currency balance; returns the new balance.
    async fn add_currency(
        &self,
        player_id: &PlayerId,
        currency: &str,
        amount: i64,
    ) -> Result<i64, BridgeError>;

    /// Atomically debit a currency balance; returns the new balance.
    ///
    /// Fails with [`BridgeError::InsufficientFunds`] and performs no
    /// mutation when the balance is below `amount`.
    async fn subtract_currency(
        &self,
        player_id: &PlayerId,
        currency: &str,
        amount: i64,
    ) -> Result<i64, BridgeError>;

    /// Apply per-key deltas to the player's statistics; returns the new
    /// values of the touched keys. Additive, not a replace.
    async fn update_statistics(
        &self,
        player_id: &PlayerId,
        deltas: BTreeMap<String, i64>,
    ) -> Result<BTreeMap<String, i64>, BridgeError>;
}
