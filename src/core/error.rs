use thiserror::Error;

use super::types::PlayerId;

/// Errors the engine itself can raise to a caller.
///
/// Guest-code failures (thrown errors, bridge failures, timeouts) are never
/// surfaced through this type; they are folded into an `ExecutionResult` so
/// callers can treat every invocation as either "ran and produced a result
/// object" or "the engine could not run it".
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Function '{1}' not found for title '{0}'")]
    FunctionNotFound(String, String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Sandbox setup failed: {0}")]
    Setup(String),

    #[error("Script source exceeds {max} bytes (got {actual})")]
    SourceTooLarge { max: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures of individual capability calls.
///
/// These propagate into the sandbox as thrown errors carrying the display
/// message, where guest code may catch them; uncaught they fail the
/// invocation.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No target player: the call omitted a player id and the invocation has none")]
    NoTargetPlayer,

    #[error("Player '{0}' not found")]
    PlayerNotFound(PlayerId),

    #[error("Insufficient funds: balance {balance} {currency}, requested {requested}")]
    InsufficientFunds {
        currency: String,
        balance: i64,
        requested: i64,
    },

    #[error("Unknown bridge operation '{0}'")]
    UnknownOperation(String),

    #[error("Invalid arguments for '{op}': {message}")]
    InvalidArguments { op: String, message: String },

    #[error("Bridge call budget exhausted ({0} calls per invocation)")]
    CallBudgetExhausted(usize),

    #[error("Store error: {0}")]
    Store(String),
}
