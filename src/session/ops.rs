//! The host operations mounted into every sandbox.
//!
//! Guest code never calls these directly; the bootstrap script wraps them
//! into the frozen `server`/`log` surface before the engine's ambient
//! global is stripped.

use deno_core::error::AnyError;
use deno_core::{OpState, op2};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::bridge::CapabilityBridge;

/// Result envelope reported by the invocation wrapper script.
pub(crate) struct ResultSlot(pub String);

/// Dispatch one capability call to the bridge.
#[op2(async)]
#[string]
pub async fn op_bridge_call(
    state: Rc<RefCell<OpState>>,
    #[string] op: String,
    #[string] payload: String,
) -> Result<String, AnyError> {
    let bridge = {
        let state = state.borrow();
        state.borrow::<Arc<CapabilityBridge>>().clone()
    };
    let value = bridge.invoke(&op, &payload).await?;
    Ok(serde_json::to_string(&value)?)
}

/// Append one guest log line to the invocation's buffer.
#[op2(fast)]
pub fn op_bridge_log(state: &mut OpState, #[smi] level: u32, #[string] message: &str) {
    if let Some(bridge) = state.try_borrow::<Arc<CapabilityBridge>>() {
        bridge.append_log(level, message);
    }
}

/// Store the invocation's result envelope for the host to collect.
#[op2(fast)]
pub fn op_session_result(state: &mut OpState, #[string] envelope: &str) {
    state.put(ResultSlot(envelope.to_string()));
}

deno_core::extension!(
    scriptbox_runtime,
    ops = [op_bridge_call, op_bridge_log, op_session_result],
);
