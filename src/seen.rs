//! Ewidencja par (chat, user): kiedy ostatnio widziana, kiedy ostatnio
//! oceniona. Bramka recheck trzyma koszt detekcji na poziomie "raz na
//! interwał na aktywną parę", niezależnie od wolumenu wiadomości.
//!
//! Wszystkie znaczniki czasu podaje wołający – testy symulują upływ
//! interwału bez spania.

use anyhow::Result;
use std::sync::Arc;

use crate::db::{self, Db, SeenRow};

pub struct SeenTracker {
    db: Db,
}

impl SeenTracker {
    pub fn new(db: Db) -> Arc<Self> {
        Arc::new(Self { db })
    }

    /// Odnotuj aktywność pary (tworzy wiersz przy pierwszym kontakcie).
    pub async fn touch(&self, chat_id: i64, user_id: u64, now: i64) -> Result<()> {
        db::touch_seen(&self.db, chat_id, user_id as i64, now).await
    }

    pub async fn get(&self, chat_id: i64, user_id: u64) -> Result<Option<SeenRow>> {
        db::get_seen(&self.db, chat_id, user_id as i64).await
    }

    /// Czy para kwalifikuje się do oceny: brak rekordu, nigdy nie sprawdzana,
    /// albo minął interwał recheck. Wymuszone sprawdzenia omijają bramkę
    /// po stronie wołającego.
    pub async fn should_evaluate(
        &self,
        chat_id: i64,
        user_id: u64,
        recheck_secs: i64,
        now: i64,
    ) -> Result<bool> {
        let row = self.get(chat_id, user_id).await?;
        Ok(match row.and_then(|r| r.last_checked_ts) {
            None => true,
            Some(ts) => now - ts >= recheck_secs,
        })
    }

    /// Zapisz ocenę bez akcji (czysty werdykt / whitelist / dedup).
    pub async fn record_check(
        &self,
        chat_id: i64,
        user_id: u64,
        verdict: &str,
        now: i64,
    ) -> Result<()> {
        db::record_check(&self.db, chat_id, user_id as i64, verdict, now).await
    }

    /// Pary, którym minął interwał ich czatu (do okresowego sweepa).
    pub async fn due(
        &self,
        now: i64,
        min_seen_ts: i64,
        default_recheck_secs: i64,
    ) -> Result<Vec<(i64, u64)>> {
        let rows = db::due_rechecks(&self.db, now, min_seen_ts, default_recheck_secs).await?;
        Ok(rows
            .into_iter()
            .map(|(chat, user)| (chat, user as u64))
            .collect())
    }

    pub async fn prune(&self, min_seen_ts: i64, min_action_ts: i64) -> Result<()> {
        db::prune_expired(&self.db, min_seen_ts, min_action_ts).await
    }
}
