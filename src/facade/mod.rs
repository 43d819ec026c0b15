pub mod engine;

pub use engine::{EngineStatsSnapshot, ScriptEngine};
