mod ops;

use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions, v8};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use crate::bridge::CapabilityBridge;
use crate::core::{EngineError, InvocationContext, LogEntry, ScriptDefinition};
use crate::limits::SessionLimits;

/// Lifecycle of one disposable sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Bridged,
    Running,
    Completed,
    Failed,
    TimedOut,
    Disposed,
}

impl SessionState {
    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Bridged)
                | (Bridged, Running)
                | (Bridged, Failed | TimedOut)
                | (Running, Completed | Failed | TimedOut)
                | (Completed | Failed | TimedOut, Disposed)
        )
    }
}

struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: SessionState::Created,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }
}

/// Terminal outcome of a session, before the recorder shapes it into an
/// [`crate::core::ExecutionResult`].
#[derive(Debug)]
pub enum SessionOutcome {
    /// The handler returned a value before the deadline.
    Completed(Value),
    /// The handler threw, a bridge call failed uncaught, or the sandbox hit
    /// its memory limit; the message is what guest code observed.
    Failed(String),
    /// The wall-clock budget elapsed first; no partial value is trusted.
    TimedOut,
}

impl SessionOutcome {
    fn terminal_state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed(_) => SessionState::Completed,
            SessionOutcome::Failed(_) => SessionState::Failed,
            SessionOutcome::TimedOut => SessionState::TimedOut,
        }
    }
}

/// Everything the recorder needs from a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub execution_time: Duration,
    pub logs: Vec<LogEntry>,
}

/// One disposable sandboxed execution.
///
/// Owns the lifecycle of a single `deno_core` isolate. V8 isolates are
/// `!Send`, so the sandbox lives on a dedicated OS thread with its own
/// current-thread tokio runtime; the session hands the terminal outcome
/// back over a oneshot channel. The isolate is built fresh here and dropped
/// in the same scope on every path, so disposal needs no cooperation from
/// guest code.
pub struct IsolateSession {
    definition: ScriptDefinition,
    context: InvocationContext,
    limits: SessionLimits,
    bridge: Arc<CapabilityBridge>,
}

impl IsolateSession {
    pub fn new(
        definition: ScriptDefinition,
        context: InvocationContext,
        limits: SessionLimits,
        bridge: Arc<CapabilityBridge>,
    ) -> Self {
        Self {
            definition,
            context,
            limits,
            bridge,
        }
    }

    /// Run the session to a terminal state.
    ///
    /// Errors only for engine-level setup failures; guest failures and
    /// timeouts are reported inside the [`SessionReport`].
    pub async fn run(self) -> Result<SessionReport, EngineError> {
        let Self {
            definition,
            context,
            limits,
            bridge,
        } = self;
        let thread_bridge = Arc::clone(&bridge);

        let (tx, rx) = tokio::sync::oneshot::channel();
        // The thread is detached; it hands its outcome back over the channel.
        let _ = std::thread::Builder::new()
            .name("scriptbox-isolate".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = tx.send(Err(EngineError::Setup(format!(
                            "failed to build sandbox runtime: {err}"
                        ))));
                        return;
                    }
                };
                let outcome = rt.block_on(drive(definition, context, limits, thread_bridge));
                if tx.send(outcome).is_err() {
                    tracing::warn!("session result receiver dropped before completion");
                }
            })
            .map_err(|err| EngineError::Setup(format!("failed to spawn sandbox thread: {err}")))?;

        let (outcome, execution_time) = rx.await.map_err(|_| {
            EngineError::Setup("sandbox thread terminated before reporting".to_string())
        })??;

        Ok(SessionReport {
            outcome,
            execution_time,
            logs: bridge.take_logs(),
        })
    }
}

/// Session body, on the dedicated sandbox thread.
async fn drive(
    definition: ScriptDefinition,
    context: InvocationContext,
    limits: SessionLimits,
    bridge: Arc<CapabilityBridge>,
) -> Result<(SessionOutcome, Duration), EngineError> {
    let started = Instant::now();
    let invoke = build_invoke_script(&definition.function_name, &context)?;

    let create_params = v8::CreateParams::default().heap_limits(0, limits.memory_limit_bytes);
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![ops::scriptbox_runtime::init_ops()],
        create_params: Some(create_params),
        ..Default::default()
    });
    runtime.op_state().borrow_mut().put(Arc::clone(&bridge));
    let mut lifecycle = Lifecycle::new();

    // Terminate instead of letting V8 abort the process when the heap
    // budget runs out.
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    runtime
        .execute_script("[scriptbox:bootstrap]", BOOTSTRAP)
        .map_err(|err| EngineError::Setup(format!("bootstrap failed: {err}")))?;
    lifecycle.advance(SessionState::Bridged);

    // Top-level source code is guest code too; the watchdog covers it.
    let watchdog = Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), limits.timeout);

    let mut guest_error: Option<String> = None;
    let mut event_loop_timed_out = false;

    if let Err(err) = runtime.execute_script("[scriptbox:source]", definition.source_code.clone()) {
        guest_error = Some(err.to_string());
    }

    if guest_error.is_none() {
        lifecycle.advance(SessionState::Running);
        match runtime.execute_script("[scriptbox:invoke]", invoke) {
            Ok(_) => {
                // The watchdog interrupts running JS; the timeout here covers
                // a guest parked on bridge I/O, where no JS is executing.
                let driven = tokio::time::timeout(
                    limits.timeout,
                    runtime.run_event_loop(PollEventLoopOptions::default()),
                )
                .await;
                match driven {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => guest_error = Some(err.to_string()),
                    Err(_) => event_loop_timed_out = true,
                }
            }
            Err(err) => guest_error = Some(err.to_string()),
        }
    }

    let watchdog_fired = watchdog.disarm();

    let outcome = if heap_state.triggered.load(Ordering::SeqCst) {
        SessionOutcome::Failed("memory limit exceeded".to_string())
    } else if watchdog_fired || event_loop_timed_out {
        SessionOutcome::TimedOut
    } else if let Some(message) = guest_error {
        SessionOutcome::Failed(message)
    } else {
        collect_envelope(&mut runtime, limits.max_result_bytes)
    };
    let execution_time = started.elapsed();
    lifecycle.advance(outcome.terminal_state());

    // Dropping the runtime cancels any bridge call still in flight.
    drop(runtime);
    lifecycle.advance(SessionState::Disposed);
    tracing::debug!(elapsed_ms = execution_time.as_millis() as u64, "session disposed");

    Ok((outcome, execution_time))
}

/// Read the `{ok}`/`{error}` envelope the wrapper script reported.
fn collect_envelope(runtime: &mut JsRuntime, max_result_bytes: usize) -> SessionOutcome {
    let envelope = {
        let state = runtime.op_state();
        let state = state.borrow();
        state
            .try_borrow::<ops::ResultSlot>()
            .map(|slot| slot.0.clone())
    };

    let Some(raw) = envelope else {
        return SessionOutcome::Failed("script produced no result".to_string());
    };
    if raw.len() > max_result_bytes {
        return SessionOutcome::Failed(format!(
            "script result exceeds {max_result_bytes} bytes"
        ));
    }
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(mut envelope)) => match envelope.remove("error") {
            Some(Value::String(message)) => SessionOutcome::Failed(message),
            Some(other) => SessionOutcome::Failed(other.to_string()),
            None => SessionOutcome::Completed(envelope.remove("ok").unwrap_or(Value::Null)),
        },
        _ => SessionOutcome::Failed("malformed result envelope".to_string()),
    }
}

/// Mounts the capability surface, then strips the ambient engine global and
/// the code-generation primitives so guest code keeps only what the bridge
/// exposes.
const BOOTSTRAP: &str = r#"
((core) => {
    const call = (op, payload) =>
        core.ops.op_bridge_call(op, JSON.stringify(payload)).then((raw) => JSON.parse(raw));
    const emit = (level, message) => {
        try {
            core.ops.op_bridge_log(level, String(message));
        } catch (_) {
            // logging never throws into guest code
        }
    };
    const finish = (envelope) => core.ops.op_session_result(envelope);

    const server = Object.freeze({
        getPlayerData: (playerId) => call("getPlayerData", { playerId }),
        setPlayerData: (data, playerId) => call("setPlayerData", { data, playerId }),
        getPlayerInventory: (playerId) => call("getPlayerInventory", { playerId }),
        grantItem: (itemId, catalogVersion, playerId) =>
            call("grantItem", { itemId, catalogVersion, playerId }),
        addVirtualCurrency: (currencyCode, amount, playerId) =>
            call("addVirtualCurrency", { currencyCode, amount, playerId }),
        subtractVirtualCurrency: (currencyCode, amount, playerId) =>
            call("subtractVirtualCurrency", { currencyCode, amount, playerId }),
        updatePlayerStatistics: (statistics, playerId) =>
            call("updatePlayerStatistics", { statistics, playerId }),
    });
    const log = Object.freeze({
        info: (message) => emit(0, message),
        warn: (message) => emit(1, message),
        error: (message) => emit(2, message),
    });

    Object.defineProperty(globalThis, "__scriptbox", {
        value: Object.freeze({ server, log, finish }),
        writable: false,
        configurable: false,
        enumerable: false,
    });
    globalThis.server = server;
    globalThis.log = log;
    globalThis.handlers = {};

    delete globalThis.Deno;
    delete globalThis.eval;
    const AsyncFunction = (async function () {}).constructor;
    const GeneratorFunction = (function* () {}).constructor;
    for (const proto of [Function.prototype, AsyncFunction.prototype, GeneratorFunction.prototype]) {
        Object.defineProperty(proto, "constructor", {
            value: undefined,
            configurable: false,
            writable: false,
        });
    }
})(Deno.core);
"#;

/// Build the wrapper that invokes the target handler with `(args, context)`
/// and reports the result envelope. Arguments and context cross into the
/// sandbox as JSON text, never as live objects.
fn build_invoke_script(
    function_name: &str,
    context: &InvocationContext,
) -> Result<String, EngineError> {
    // The name is used directly as a property key, so it is encoded once;
    // args and context go through JSON.parse and are encoded twice.
    let name = serde_json::to_string(function_name)
        .map_err(|err| EngineError::Setup(format!("failed to encode invocation data: {err}")))?;
    let args = json_literal(&context.args)?;
    let meta = json_literal(&serde_json::json!({
        "titleId": context.title_id,
        "currentPlayerId": context.player_id,
    }))?;

    Ok(format!(
        r#"((rt) => {{
    (async () => {{
        try {{
            const handlers = globalThis.handlers;
            const handler = handlers ? handlers[{name}] : undefined;
            if (typeof handler !== "function") {{
                throw new Error("handler " + {name} + " is not defined");
            }}
            const args = JSON.parse({args});
            const context = JSON.parse({meta});
            context.server = rt.server;
            context.log = rt.log;
            const result = await handler(args, context);
            rt.finish(JSON.stringify({{ ok: result === undefined ? null : result }}));
        }} catch (e) {{
            rt.finish(JSON.stringify({{ error: (e && e.message) ? String(e.message) : String(e) }}));
        }}
    }})();
}})(globalThis.__scriptbox);"#
    ))
}

/// Serialize a value twice over: the result is a JS string literal whose
/// contents are the JSON text, safe to embed in a script and `JSON.parse`.
fn json_literal(value: &Value) -> Result<String, EngineError> {
    let text = serde_json::to_string(value)
        .map_err(|err| EngineError::Setup(format!("failed to encode invocation data: {err}")))?;
    serde_json::to_string(&text)
        .map_err(|err| EngineError::Setup(format!("failed to encode invocation data: {err}")))
}

struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback: terminate the guest and grant a little
/// grace so the termination can propagate instead of aborting the process.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the `HeapLimitState` boxed in `drive`, which
    // outlives the isolate: V8 only invokes this callback while guest code
    // runs, and the runtime is dropped before the box. `triggered` is
    // atomic, so a shared reference suffices.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Wall-clock watchdog for one session.
///
/// Terminates V8 execution when the budget elapses, which interrupts
/// CPU-bound guest code that would never yield to the event loop.
struct Watchdog {
    cancel: std::sync::mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Watchdog {
    fn arm(handle: v8::IsolateHandle, timeout: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let (cancel, cancelled) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });

        Self {
            cancel,
            fired,
            thread: Some(thread),
        }
    }

    /// Cancel and join the watchdog; returns whether it fired. Joining
    /// before the isolate is dropped keeps the handle valid for the whole
    /// watchdog lifetime.
    fn disarm(mut self) -> bool {
        let _ = self.cancel.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.fired.load(Ordering::SeqCst)
    }
}
