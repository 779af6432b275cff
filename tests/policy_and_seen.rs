// tests/policy_and_seen.rs
//
// Polityka per czat, whitelist (w tym ścieżka /unban), bramka recheck
// i higiena seen_users.

use sqlx::sqlite::SqlitePoolOptions;

use cas_guard::{
    db::{self, Db},
    policy::{ChatMode, PolicyStore},
    seen::SeenTracker,
};

const CHAT: i64 = -1_009_876;
const USER: u64 = 1_337;
const RECHECK: i64 = 900;

async fn test_db() -> Db {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn fresh_chat_defaults_to_notify() {
    let pool = test_db().await;
    let store = PolicyStore::new(pool, RECHECK);

    let policy = store.policy(CHAT).await.unwrap();
    assert_eq!(policy.mode, ChatMode::Notify);
    assert_eq!(policy.recheck_secs, RECHECK);
}

#[tokio::test]
async fn set_mode_persists_and_invalidates_cache() {
    let pool = test_db().await;
    let store = PolicyStore::new(pool.clone(), RECHECK);

    // najpierw zapełnij cache domyślną polityką
    assert_eq!(store.policy(CHAT).await.unwrap().mode, ChatMode::Notify);

    store.set_mode(CHAT, ChatMode::Quickban).await.unwrap();
    assert_eq!(store.policy(CHAT).await.unwrap().mode, ChatMode::Quickban);

    // świeży store nad tą samą bazą widzi to samo (stan jest w sqlite)
    let store2 = PolicyStore::new(pool, RECHECK);
    assert_eq!(store2.policy(CHAT).await.unwrap().mode, ChatMode::Quickban);
}

#[tokio::test]
async fn per_chat_recheck_override() {
    let pool = test_db().await;
    let store = PolicyStore::new(pool, RECHECK);

    store.set_recheck(CHAT, 120).await.unwrap();
    let policy = store.policy(CHAT).await.unwrap();
    assert_eq!(policy.recheck_secs, 120);
    // wiersz założony przez set_recheck dostaje domyślny tryb
    assert_eq!(policy.mode, ChatMode::Notify);
}

#[tokio::test]
async fn unban_whitelists_immediately_and_unconditionally() {
    let pool = test_db().await;
    let store = PolicyStore::new(pool, RECHECK);

    // /unban: wpis whitelisty jest trwały zanim (i niezależnie od tego czy)
    // platformowy unban się powiedzie
    store.whitelist_add(CHAT, 12_345, 1_000_000).await.unwrap();
    assert!(store.is_whitelisted(CHAT, 12_345).await.unwrap());

    // idempotentnie
    store.whitelist_add(CHAT, 12_345, 1_000_100).await.unwrap();
    assert!(store.is_whitelisted(CHAT, 12_345).await.unwrap());

    // i tylko w tym czacie
    assert!(!store.is_whitelisted(CHAT + 1, 12_345).await.unwrap());
}

#[tokio::test]
async fn recheck_gate_opens_after_interval() {
    let pool = test_db().await;
    let seen = SeenTracker::new(pool);
    let t0 = 1_000_000;

    // nieznana para: zawsze oceniamy
    assert!(seen.should_evaluate(CHAT, USER, RECHECK, t0).await.unwrap());

    // touch nie jest oceną – bramka dalej otwarta
    seen.touch(CHAT, USER, t0).await.unwrap();
    assert!(seen.should_evaluate(CHAT, USER, RECHECK, t0).await.unwrap());

    // po ocenie zamknięta aż do upływu interwału
    seen.record_check(CHAT, USER, "clean", t0).await.unwrap();
    assert!(
        !seen
            .should_evaluate(CHAT, USER, RECHECK, t0 + RECHECK - 1)
            .await
            .unwrap()
    );
    assert!(
        seen.should_evaluate(CHAT, USER, RECHECK, t0 + RECHECK)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn due_list_respects_per_chat_interval() {
    let pool = test_db().await;
    let store = PolicyStore::new(pool.clone(), RECHECK);
    let seen = SeenTracker::new(pool);
    let t0 = 1_000_000;
    let chat_fast = CHAT - 1;

    store.set_recheck(chat_fast, 100).await.unwrap();

    seen.touch(CHAT, USER, t0).await.unwrap();
    seen.record_check(CHAT, USER, "clean", t0).await.unwrap();
    seen.touch(chat_fast, USER, t0).await.unwrap();
    seen.record_check(chat_fast, USER, "clean", t0).await.unwrap();

    // 500 s później: tylko czat z krótszym interwałem jest zaległy
    let due = seen.due(t0 + 500, 0, RECHECK).await.unwrap();
    assert_eq!(due, vec![(chat_fast, USER)]);

    // po pełnym interwale domyślnym zaległe są obie pary
    let due = seen.due(t0 + RECHECK, 0, RECHECK).await.unwrap();
    assert_eq!(due.len(), 2);
}

#[tokio::test]
async fn prune_drops_stale_pairs_and_old_audit_entries() {
    let pool = test_db().await;
    let seen = SeenTracker::new(pool.clone());
    let t0 = 1_000_000;

    seen.touch(CHAT, USER, t0).await.unwrap();
    db::record_action(
        &pool, CHAT, USER as i64, "notify", "notify", "r", "local", false, t0,
    )
    .await
    .unwrap();

    seen.prune(t0 + 1, t0 + 1).await.unwrap();

    assert!(seen.get(CHAT, USER).await.unwrap().is_none());
    assert_eq!(db::action_stats(&pool, CHAT, 0).await.unwrap().total, 0);
}

#[tokio::test]
async fn connect_creates_database_file_and_migrates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("casg.sqlite3");
    let pool = db::connect(path.to_str().unwrap(), Some(1)).await.unwrap();
    db::migrate(&pool).await.unwrap();

    db::touch_seen(&pool, CHAT, USER as i64, 1_000).await.unwrap();
    assert!(db::get_seen(&pool, CHAT, USER as i64).await.unwrap().is_some());
    assert!(path.exists());
}
