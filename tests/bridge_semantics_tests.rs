use scriptbox::{
    InMemoryAuditSink, InMemoryPlayerStore, InMemoryScriptRegistry, InvocationContext,
    LimitPolicy, PlayerStateStore, ScriptDefinition, ScriptEngine,
};
use serde_json::json;
use std::sync::Arc;

async fn engine_and_store() -> (ScriptEngine, Arc<InMemoryPlayerStore>) {
    let registry = Arc::new(InMemoryScriptRegistry::new());
    let store = Arc::new(InMemoryPlayerStore::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let engine = ScriptEngine::new(registry, store.clone(), audit);
    store.add_player("P1", "Alice").await;
    store.add_player("P2", "Bob").await;
    (engine, store)
}

fn definition(name: &str, source: &str) -> ScriptDefinition {
    ScriptDefinition::new("T1", name, source)
}

fn context(name: &str) -> InvocationContext {
    InvocationContext::new("T1", name).player("P1")
}

#[tokio::test]
async fn test_subtract_with_insufficient_funds_fails_without_mutation() {
    let (engine, store) = engine_and_store().await;
    store.set_balance(&"P1".to_string(), "GOLD", 50).await;

    let result = engine
        .execute(
            definition(
                "spend",
                "handlers.spend = async (args, { server }) => \
                     server.subtractVirtualCurrency('GOLD', 100);",
            ),
            context("spend"),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(
        result
            .error
            .as_deref()
            .unwrap_or("")
            .contains("Insufficient funds")
    );
    assert_eq!(store.balance(&"P1".to_string(), "GOLD").await, Some(50));
}

#[tokio::test]
async fn test_bridge_errors_are_catchable_by_guest_code() {
    let (engine, store) = engine_and_store().await;
    store.set_balance(&"P1".to_string(), "GOLD", 50).await;

    let result = engine
        .execute(
            definition(
                "careful",
                "handlers.careful = async (args, { server }) => { \
                     try { \
                         await server.subtractVirtualCurrency('GOLD', 100); \
                         return 'paid'; \
                     } catch (e) { \
                         return { declined: String(e.message) }; \
                     } \
                 };",
            ),
            context("careful"),
        )
        .await
        .unwrap();

    assert!(result.success);
    let declined = result.result.unwrap();
    assert!(declined["declined"].as_str().unwrap().contains("Insufficient funds"));
}

#[tokio::test]
async fn test_statistics_updates_are_additive_across_invocations() {
    let (engine, store) = engine_and_store().await;
    let source = "handlers.win = async (args, { server }) => \
                      server.updatePlayerStatistics({ wins: 1 });";

    let first = engine
        .execute(definition("win", source), context("win"))
        .await
        .unwrap();
    let second = engine
        .execute(definition("win", source), context("win"))
        .await
        .unwrap();

    assert_eq!(first.result, Some(json!({"wins": 1})));
    assert_eq!(second.result, Some(json!({"wins": 2})));
    assert_eq!(store.statistic(&"P1".to_string(), "wins").await, Some(2));
}

#[tokio::test]
async fn test_omitted_player_defaults_and_explicit_player_overrides() {
    let (engine, store) = engine_and_store().await;

    let result = engine
        .execute(
            definition(
                "pay",
                "handlers.pay = async (args, { server }) => { \
                     await server.addVirtualCurrency('GOLD', 5); \
                     await server.addVirtualCurrency('GOLD', 7, 'P2'); \
                     return true; \
                 };",
            ),
            context("pay"),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(store.balance(&"P1".to_string(), "GOLD").await, Some(5));
    assert_eq!(store.balance(&"P2".to_string(), "GOLD").await, Some(7));
}

#[tokio::test]
async fn test_no_player_identity_anywhere_fails_the_call() {
    let (engine, _) = engine_and_store().await;

    // Developer test call without a player, and the script names none.
    let result = engine
        .execute(
            definition(
                "orphan",
                "handlers.orphan = async (args, { server }) => server.getPlayerData();",
            ),
            InvocationContext::new("T1", "orphan"),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("No target player"));
}

#[tokio::test]
async fn test_inventory_mutation_does_not_leak_across_the_boundary() {
    let (engine, store) = engine_and_store().await;
    store
        .grant_item(&"P1".to_string(), "sword", None)
        .await
        .unwrap();

    let result = engine
        .execute(
            definition(
                "tamper",
                "handlers.tamper = async (args, { server }) => { \
                     const inv = await server.getPlayerInventory(); \
                     inv.push({ itemId: 'forged' }); \
                     inv[0].itemId = 'tampered'; \
                     const again = await server.getPlayerInventory(); \
                     return { seen: again.length, first: again[0].itemId }; \
                 };",
            ),
            context("tamper"),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.result, Some(json!({"seen": 1, "first": "sword"})));

    let stored = store.stored_inventory(&"P1".to_string()).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].item_id, "sword");
}

#[tokio::test]
async fn test_grant_item_returns_fresh_instance_ids() {
    let (engine, store) = engine_and_store().await;

    let result = engine
        .execute(
            definition(
                "loot",
                "handlers.loot = async (args, { server }) => { \
                     const a = await server.grantItem('potion'); \
                     const b = await server.grantItem('potion', 2); \
                     return { distinct: a.instanceId !== b.instanceId, version: b.catalogVersion }; \
                 };",
            ),
            context("loot"),
        )
        .await
        .unwrap();

    assert_eq!(result.result, Some(json!({"distinct": true, "version": 2})));
    assert_eq!(store.stored_inventory(&"P1".to_string()).await.len(), 2);
}

#[tokio::test]
async fn test_set_player_data_overwrites_custom_projection() {
    let (engine, store) = engine_and_store().await;

    let result = engine
        .execute(
            definition(
                "save",
                "handlers.save = async (args, { server }) => { \
                     await server.setPlayerData({ quest: 'dragon', step: 3 }); \
                     const profile = await server.getPlayerData(); \
                     return profile.customData; \
                 };",
            ),
            context("save"),
        )
        .await
        .unwrap();

    assert_eq!(result.result, Some(json!({"quest": "dragon", "step": 3})));
    assert_eq!(
        store.custom_data(&"P1".to_string()).await,
        Some(json!({"quest": "dragon", "step": 3}))
    );
}

#[tokio::test]
async fn test_bridge_call_budget_is_enforced() {
    let registry = Arc::new(InMemoryScriptRegistry::new());
    let store = Arc::new(InMemoryPlayerStore::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let engine = ScriptEngine::new(registry, store.clone(), audit)
        .with_policy(LimitPolicy::new().max_bridge_calls(2));
    store.add_player("P1", "Alice").await;

    let result = engine
        .execute(
            definition(
                "greedy",
                "handlers.greedy = async (args, { server }) => { \
                     await server.getPlayerData(); \
                     await server.getPlayerData(); \
                     await server.getPlayerData(); \
                     return 'unreachable'; \
                 };",
            ),
            context("greedy"),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("budget exhausted"));
}

#[tokio::test]
async fn test_sandbox_has_no_ambient_capabilities() {
    let (engine, _) = engine_and_store().await;

    let result = engine
        .execute(
            definition(
                "probe",
                "handlers.probe = async () => ({ \
                     deno: typeof globalThis.Deno, \
                     evalFn: typeof globalThis.eval, \
                     ctor: String(globalThis.server.getPlayerData.constructor), \
                 });",
            ),
            context("probe"),
        )
        .await
        .unwrap();

    assert_eq!(
        result.result,
        Some(json!({"deno": "undefined", "evalFn": "undefined", "ctor": "undefined"}))
    );
}

#[tokio::test]
async fn test_server_surface_is_frozen() {
    let (engine, store) = engine_and_store().await;

    let result = engine
        .execute(
            definition(
                "freeze",
                "handlers.freeze = async (args, { server }) => { \
                     try { server.grantItem = () => 'hijacked'; } catch (_) {} \
                     return Object.isFrozen(server); \
                 };",
            ),
            context("freeze"),
        )
        .await
        .unwrap();

    assert_eq!(result.result, Some(json!(true)));
    assert!(store.stored_inventory(&"P1".to_string()).await.is_empty());
}
