use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::{BridgeError, InvocationContext, LogEntry, LogLevel, PlayerId};
use crate::limits::LimitPolicy;
use crate::store::PlayerStateStore;

/// The only way guest code touches platform state.
///
/// A closed set of operations dispatched by name, each accepting an
/// omissible target player that defaults to the invocation's identity.
/// All values cross the boundary as JSON, so neither side ever holds a
/// live reference into the other.
pub struct CapabilityBridge {
    store: Arc<dyn PlayerStateStore>,
    default_player: Option<PlayerId>,
    calls_made: AtomicUsize,
    max_calls: usize,
    logs: Mutex<LogBuffer>,
}

struct LogBuffer {
    entries: Vec<LogEntry>,
    dropped: usize,
    max_entries: usize,
    max_message_bytes: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetPlayer {
    #[serde(default)]
    player_id: Option<PlayerId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPlayerData {
    data: Value,
    #[serde(default)]
    player_id: Option<PlayerId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantItem {
    item_id: String,
    #[serde(default)]
    catalog_version: Option<u32>,
    #[serde(default)]
    player_id: Option<PlayerId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyChange {
    currency_code: String,
    amount: i64,
    #[serde(default)]
    player_id: Option<PlayerId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsUpdate {
    statistics: BTreeMap<String, i64>,
    #[serde(default)]
    player_id: Option<PlayerId>,
}

impl CapabilityBridge {
    pub fn new(
        store: Arc<dyn PlayerStateStore>,
        context: &InvocationContext,
        policy: &LimitPolicy,
    ) -> Self {
        Self {
            store,
            default_player: context.player_id.clone(),
            calls_made: AtomicUsize::new(0),
            max_calls: policy.max_bridge_calls,
            logs: Mutex::new(LogBuffer {
                entries: Vec::new(),
                dropped: 0,
                max_entries: policy.max_log_entries,
                max_message_bytes: policy.max_log_message_bytes,
            }),
        }
    }

    /// Dispatch one marshaled capability call.
    ///
    /// `payload` is the JSON argument object built by the sandbox-side
    /// wrapper; the result is returned as a JSON value and serialized back
    /// across the boundary by the caller.
    pub async fn invoke(&self, op: &str, payload: &str) -> Result<Value, BridgeError> {
        self.charge_call()?;

        match op {
            "getPlayerData" => {
                let req: TargetPlayer = parse(op, payload)?;
                let player = self.target(req.player_id)?;
                let profile = self.store.get_profile(&player).await?;
                to_value(profile)
            }
            "setPlayerData" => {
                let req: SetPlayerData = parse(op, payload)?;
                let player = self.target(req.player_id)?;
                self.store.set_custom_data(&player, req.data).await?;
                Ok(Value::Null)
            }
            "getPlayerInventory" => {
                let req: TargetPlayer = parse(op, payload)?;
                let player = self.target(req.player_id)?;
                let inventory = self.store.get_inventory(&player).await?;
                to_value(inventory)
            }
            "grantItem" => {
                let req: GrantItem = parse(op, payload)?;
                let player = self.target(req.player_id)?;
                let entry = self
                    .store
                    .grant_item(&player, &req.item_id, req.catalog_version)
                    .await?;
                to_value(entry)
            }
            "addVirtualCurrency" => {
                let req: CurrencyChange = parse(op, payload)?;
                require_positive(op, req.amount)?;
                let player = self.target(req.player_id)?;
                let balance = self
                    .store
                    .add_currency(&player, &req.currency_code, req.amount)
                    .await?;
                Ok(serde_json::json!({ "currencyCode": req.currency_code, "balance": balance }))
            }
            "subtractVirtualCurrency" => {
                let req: CurrencyChange = parse(op, payload)?;
                require_positive(op, req.amount)?;
                let player = self.target(req.player_id)?;
                let balance = self
                    .store
                    .subtract_currency(&player, &req.currency_code, req.amount)
                    .await?;
                Ok(serde_json::json!({ "currencyCode": req.currency_code, "balance": balance }))
            }
            "updatePlayerStatistics" => {
                let req: StatisticsUpdate = parse(op, payload)?;
                let player = self.target(req.player_id)?;
                let updated = self.store.update_statistics(&player, req.statistics).await?;
                to_value(updated)
            }
            other => Err(BridgeError::UnknownOperation(other.to_string())),
        }
    }

    /// Append a guest log line. Never fails and never blocks guest
    /// execution beyond the buffer lock.
    pub fn append_log(&self, level: u32, message: &str) {
        let level = match level {
            1 => LogLevel::Warn,
            2 => LogLevel::Error,
            _ => LogLevel::Info,
        };

        let mut buffer = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.entries.len() >= buffer.max_entries {
            buffer.dropped += 1;
            return;
        }
        let message = truncated(message, buffer.max_message_bytes);
        buffer.entries.push(LogEntry::new(level, message));
    }

    /// Drain the log buffer after the session reached a terminal state.
    pub fn take_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = std::mem::take(&mut buffer.entries);
        if buffer.dropped > 0 {
            entries.push(LogEntry::new(
                LogLevel::Warn,
                format!(
                    "{} log entries dropped (buffer limit {})",
                    buffer.dropped, buffer.max_entries
                ),
            ));
            buffer.dropped = 0;
        }
        entries
    }

    /// Data-operation calls made so far.
    pub fn calls_made(&self) -> usize {
        self.calls_made.load(Ordering::SeqCst)
    }

    fn charge_call(&self) -> Result<(), BridgeError> {
        let made = self.calls_made.fetch_add(1, Ordering::SeqCst);
        if made >= self.max_calls {
            return Err(BridgeError::CallBudgetExhausted(self.max_calls));
        }
        Ok(())
    }

    fn target(&self, explicit: Option<PlayerId>) -> Result<PlayerId, BridgeError> {
        explicit
            .or_else(|| self.default_player.clone())
            .ok_or(BridgeError::NoTargetPlayer)
    }
}

fn parse<'a, T: Deserialize<'a>>(op: &str, payload: &'a str) -> Result<T, BridgeError> {
    serde_json::from_str(payload).map_err(|err| BridgeError::InvalidArguments {
        op: op.to_string(),
        message: err.to_string(),
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, BridgeError> {
    serde_json::to_value(value).map_err(|err| BridgeError::Store(err.to_string()))
}

fn require_positive(op: &str, amount: i64) -> Result<(), BridgeError> {
    if amount <= 0 {
        return Err(BridgeError::InvalidArguments {
            op: op.to_string(),
            message: format!("amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

fn truncated(message: &str, max_bytes: usize) -> String {
    if message.len() <= max_bytes {
        return message.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
