//! Dispatcher akcji: werdykt + polityka czatu -> konkretna akcja
//! (powiadomienie / ban z czyszczeniem / nic), z deduplikacją per para
//! i nadpisaniem przez whitelistę.
//!
//! Aktualizacje tej samej pary (chat, user) są serializowane kluczowanym
//! mutexem – dwie równoległe oceny nie zdublują akcji. Różne pary nie
//! rywalizują o nic wspólnego.

use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    db::{self, Db},
    detect::Verdict,
    policy::{ChatMode, PolicyStore},
    seen::SeenTracker,
    texts,
    transport::Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Whitelist wygrywa z każdym werdyktem, także z lokalną blacklistą.
    Whitelisted,
    Clean,
    Notified,
    Banned,
    /// Ta sama akcja już wykonana w oknie recheck – nic nie powtarzamy.
    Deduped,
}

pub struct Dispatcher {
    db: Db,
    policy: Arc<PolicyStore>,
    seen: Arc<SeenTracker>,
    locks: DashMap<(i64, u64), Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(db: Db, policy: Arc<PolicyStore>, seen: Arc<SeenTracker>) -> Arc<Self> {
        Arc::new(Self {
            db,
            policy,
            seen,
            locks: DashMap::new(),
        })
    }

    /// Przetwórz werdykt dla pary. Błąd bazy = ocena NIE jest zaliczona
    /// (rekord seen nie idzie do przodu, kolejna bramka powtórzy próbę).
    /// Błąd transportu (brak uprawnień itp.) jest odnotowany flagą failed,
    /// ale rekord idzie do przodu – nie młócimy API przy każdej wiadomości.
    pub async fn dispatch(
        &self,
        transport: &dyn Transport,
        chat_id: i64,
        user_id: u64,
        display_name: &str,
        verdict: &Verdict,
        now: i64,
    ) -> Result<Outcome> {
        let lock = self
            .locks
            .entry((chat_id, user_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if self.policy.is_whitelisted(chat_id, user_id).await? {
            self.seen
                .record_check(chat_id, user_id, "clean", now)
                .await?;
            return Ok(Outcome::Whitelisted);
        }

        if !verdict.flagged {
            self.seen
                .record_check(chat_id, user_id, "clean", now)
                .await?;
            return Ok(Outcome::Clean);
        }

        let policy = self.policy.policy(chat_id).await?;
        let action = match policy.mode {
            ChatMode::Notify => "notify",
            ChatMode::Quickban => "quickban",
        };

        // Dedup: ta sama akcja w oknie recheck -> no-op. Po upływie okna
        // akcja powtarza się celowo (ochrona przed odbanowaniem z zewnątrz).
        if let Some(row) = self.seen.get(chat_id, user_id).await? {
            if row.last_action.as_deref() == Some(action) {
                if let Some(ts) = row.last_action_ts {
                    if now - ts < policy.recheck_secs {
                        self.seen
                            .record_check(chat_id, user_id, "flagged", now)
                            .await?;
                        return Ok(Outcome::Deduped);
                    }
                }
            }
        }

        let mut failed = false;
        let outcome = match policy.mode {
            ChatMode::Notify => {
                let text = texts::notify(display_name, user_id, &verdict.evidence);
                if let Err(e) = transport.send_message(chat_id, &text).await {
                    warn!(chat_id, user_id, err = ?e, "notify delivery failed");
                    failed = true;
                }
                Outcome::Notified
            }
            ChatMode::Quickban => {
                if let Err(e) = transport.ban(chat_id, user_id).await {
                    warn!(chat_id, user_id, err = ?e, "ban failed");
                    failed = true;
                }

                // wyczyść ostatnie wiadomości delikwenta z tego czatu
                let ids = db::cached_messages(&self.db, chat_id, user_id as i64).await?;
                if !ids.is_empty() {
                    let ids: Vec<i32> = ids.iter().map(|&m| m as i32).collect();
                    if let Err(e) = transport.delete_messages(chat_id, &ids).await {
                        warn!(chat_id, user_id, err = ?e, "message purge failed");
                        failed = true;
                    }
                    db::clear_cached_messages(&self.db, chat_id, user_id as i64).await?;
                }

                let text = texts::banned(display_name, user_id, &verdict.evidence);
                if let Err(e) = transport.send_message(chat_id, &text).await {
                    // samo ogłoszenie jest best-effort, ban już się liczy
                    warn!(chat_id, user_id, err = ?e, "ban notice failed");
                }
                Outcome::Banned
            }
        };

        db::record_action(
            &self.db,
            chat_id,
            user_id as i64,
            action,
            policy.mode.as_str(),
            &verdict.evidence,
            verdict.source.as_str(),
            failed,
            now,
        )
        .await?;

        info!(
            chat_id,
            user_id,
            action,
            source = verdict.source.as_str(),
            failed,
            "action dispatched"
        );
        Ok(outcome)
    }
}
