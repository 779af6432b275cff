// tests/dispatch_flow.rs
//
// Maszyna stanów dispatchera na atrapie transportu i sqlite w pamięci:
// dedup w oknie recheck, whitelist, powtórka akcji po interwale,
// flaga failed przy braku uprawnień.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;

use cas_guard::{
    db::{self, Db},
    detect::{Source, Verdict},
    dispatch::{Dispatcher, Outcome},
    policy::{ChatMode, PolicyStore},
    seen::SeenTracker,
    transport::Transport,
};

const CHAT: i64 = -1_001_234;
const USER: u64 = 4_242;
const RECHECK: i64 = 900;

#[derive(Default)]
struct MockTransport {
    calls: Mutex<Vec<String>>,
    fail_send: bool,
    fail_ban: bool,
}

impl MockTransport {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, s: String) {
        self.calls.lock().unwrap().push(s);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_message(&self, chat_id: i64, _text: &str) -> Result<()> {
        self.push(format!("send:{chat_id}"));
        if self.fail_send {
            anyhow::bail!("bot can't post here");
        }
        Ok(())
    }

    async fn ban(&self, chat_id: i64, user_id: u64) -> Result<()> {
        self.push(format!("ban:{chat_id}:{user_id}"));
        if self.fail_ban {
            anyhow::bail!("not enough rights");
        }
        Ok(())
    }

    async fn unban(&self, chat_id: i64, user_id: u64) -> Result<()> {
        self.push(format!("unban:{chat_id}:{user_id}"));
        Ok(())
    }

    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()> {
        self.push(format!("del:{chat_id}:{}", message_ids.len()));
        Ok(())
    }

    async fn is_chat_admin(&self, _chat_id: i64, _user_id: u64) -> Result<bool> {
        Ok(true)
    }

    async fn bot_has_required_rights(&self, _chat_id: i64) -> Result<bool> {
        Ok(true)
    }

    async fn display_name(&self, _chat_id: i64, _user_id: u64) -> Option<String> {
        None
    }
}

async fn test_db() -> Db {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

struct Harness {
    db: Db,
    policy: Arc<PolicyStore>,
    seen: Arc<SeenTracker>,
    dispatcher: Arc<Dispatcher>,
}

async fn harness() -> Harness {
    let pool = test_db().await;
    let policy = PolicyStore::new(pool.clone(), RECHECK);
    let seen = SeenTracker::new(pool.clone());
    let dispatcher = Dispatcher::new(pool.clone(), policy.clone(), seen.clone());
    Harness {
        db: pool,
        policy,
        seen,
        dispatcher,
    }
}

fn flagged_local() -> Verdict {
    Verdict {
        flagged: true,
        evidence: "local blacklist (cas-export)".into(),
        source: Source::Local,
    }
}

fn flagged_remote() -> Verdict {
    Verdict {
        flagged: true,
        evidence: "CAS record found".into(),
        source: Source::Remote,
    }
}

fn clean_remote() -> Verdict {
    Verdict {
        flagged: false,
        evidence: "no CAS record".into(),
        source: Source::Remote,
    }
}

#[tokio::test]
async fn notify_mode_acts_exactly_once_within_interval() {
    let h = harness().await;
    let t = MockTransport::default();
    let t0 = 1_000_000;

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_remote(), t0)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Notified);

    // druga wiadomość 30 s później: zero nowych akcji i zero nowych wpisów
    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_remote(), t0 + 30)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Deduped);

    let stats = db::action_stats(&h.db, CHAT, 0).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.notify, 1);
    assert_eq!(t.calls().len(), 1);

    let row = h.seen.get(CHAT, USER).await.unwrap().unwrap();
    assert_eq!(row.last_verdict.as_deref(), Some("flagged"));
    assert_eq!(row.last_action.as_deref(), Some("notify"));
}

#[tokio::test]
async fn quickban_bans_and_purges_cached_messages() {
    let h = harness().await;
    let t = MockTransport::default();
    let t0 = 1_000_000;

    h.policy.set_mode(CHAT, ChatMode::Quickban).await.unwrap();
    db::add_message_id(&h.db, CHAT, USER as i64, 501, 50, t0 - 5)
        .await
        .unwrap();
    db::add_message_id(&h.db, CHAT, USER as i64, 502, 50, t0 - 3)
        .await
        .unwrap();

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_local(), t0)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Banned);

    let calls = t.calls();
    assert!(calls.contains(&format!("ban:{CHAT}:{USER}")));
    assert!(calls.contains(&format!("del:{CHAT}:2")));

    // cache wiadomości wyczyszczony, akcja w logu z flagą quickban
    assert!(db::cached_messages(&h.db, CHAT, USER as i64)
        .await
        .unwrap()
        .is_empty());
    let stats = db::action_stats(&h.db, CHAT, 0).await.unwrap();
    assert_eq!(stats.quickban, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn whitelist_overrides_even_local_blacklist() {
    let h = harness().await;
    let t = MockTransport::default();

    h.policy.whitelist_add(CHAT, USER, 999_000).await.unwrap();

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Trusted", &flagged_local(), 1_000_000)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Whitelisted);
    assert!(t.calls().is_empty());

    let stats = db::action_stats(&h.db, CHAT, 0).await.unwrap();
    assert_eq!(stats.total, 0);
    let row = h.seen.get(CHAT, USER).await.unwrap().unwrap();
    assert_eq!(row.last_verdict.as_deref(), Some("clean"));
}

#[tokio::test]
async fn whitelist_is_scoped_per_chat() {
    let h = harness().await;
    let t = MockTransport::default();
    let other_chat = CHAT - 1;

    h.policy.whitelist_add(CHAT, USER, 999_000).await.unwrap();

    // ten sam user w innym czacie dalej podlega detekcji
    let out = h
        .dispatcher
        .dispatch(&t, other_chat, USER, "Spam Bot", &flagged_local(), 1_000_000)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Notified);
}

#[tokio::test]
async fn still_flagged_after_interval_gets_a_fresh_action() {
    let h = harness().await;
    let t = MockTransport::default();
    let t0 = 1_000_000;

    h.policy.set_mode(CHAT, ChatMode::Quickban).await.unwrap();

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_local(), t0)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Banned);

    // po upływie interwału re-ban (ochrona przed odbanowaniem z zewnątrz)
    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_local(), t0 + RECHECK + 1)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Banned);

    let stats = db::action_stats(&h.db, CHAT, 0).await.unwrap();
    assert_eq!(stats.quickban, 2);
}

#[tokio::test]
async fn mode_change_is_a_different_action_and_not_deduped() {
    let h = harness().await;
    let t = MockTransport::default();
    let t0 = 1_000_000;

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_remote(), t0)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Notified);

    h.policy.set_mode(CHAT, ChatMode::Quickban).await.unwrap();

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_remote(), t0 + 30)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Banned);

    let stats = db::action_stats(&h.db, CHAT, 0).await.unwrap();
    assert_eq!(stats.notify, 1);
    assert_eq!(stats.quickban, 1);
}

#[tokio::test]
async fn transport_failure_is_logged_and_seen_still_advances() {
    let h = harness().await;
    let t = MockTransport {
        fail_send: true,
        ..Default::default()
    };
    let t0 = 1_000_000;

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_remote(), t0)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Notified);

    let stats = db::action_stats(&h.db, CHAT, 0).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.failed, 1);

    // rekord poszedł do przodu: kolejna ocena w oknie nie młóci transportu
    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Spam Bot", &flagged_remote(), t0 + 10)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Deduped);
    assert_eq!(t.calls().len(), 1);
}

#[tokio::test]
async fn clean_verdict_records_check_without_action() {
    let h = harness().await;
    let t = MockTransport::default();

    let out = h
        .dispatcher
        .dispatch(&t, CHAT, USER, "Someone", &clean_remote(), 1_000_000)
        .await
        .unwrap();
    assert_eq!(out, Outcome::Clean);
    assert!(t.calls().is_empty());

    let row = h.seen.get(CHAT, USER).await.unwrap().unwrap();
    assert_eq!(row.last_verdict.as_deref(), Some("clean"));
    assert_eq!(row.last_action, None);
}
