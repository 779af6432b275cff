//! Polityka per czat: tryb reakcji, interwał ponownych sprawdzeń, whitelist.
//!
//! Whitelist jest PER CZAT – odblokowanie kogoś w czacie A nie przenosi
//! zaufania do czatu B. Wpis whitelisty jest trwały: najpierw baza, potem
//! reszta; nieudany unban po stronie Telegrama niczego nie cofa.

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{self, Db};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Tylko powiadomienie na czacie.
    Notify,
    /// Ban + czyszczenie ostatnich wiadomości.
    Quickban,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Notify => "notify",
            ChatMode::Quickban => "quickban",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notify" => Some(ChatMode::Notify),
            "quickban" => Some(ChatMode::Quickban),
            _ => None,
        }
    }
}

/// Nowy czat startuje w trybie notify.
pub const DEFAULT_MODE: ChatMode = ChatMode::Notify;

#[derive(Debug, Clone)]
pub struct ChatPolicy {
    pub chat_id: i64,
    pub mode: ChatMode,
    pub recheck_secs: i64,
}

pub struct PolicyStore {
    db: Db,
    default_recheck_secs: i64,
    cache: DashMap<i64, ChatPolicy>,
}

impl PolicyStore {
    pub fn new(db: Db, default_recheck_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            db,
            default_recheck_secs,
            cache: DashMap::new(),
        })
    }

    /// Polityka czatu; brak wiersza = domyślna (wiersz powstaje dopiero
    /// przy pierwszym zapisie).
    pub async fn policy(&self, chat_id: i64) -> Result<ChatPolicy> {
        if let Some(p) = self.cache.get(&chat_id) {
            return Ok(p.clone());
        }
        let row = db::get_chat_policy(&self.db, chat_id).await?;
        let policy = match row {
            Some((mode, recheck)) => ChatPolicy {
                chat_id,
                mode: ChatMode::parse(&mode).unwrap_or(DEFAULT_MODE),
                recheck_secs: recheck.unwrap_or(self.default_recheck_secs),
            },
            None => ChatPolicy {
                chat_id,
                mode: DEFAULT_MODE,
                recheck_secs: self.default_recheck_secs,
            },
        };
        self.cache.insert(chat_id, policy.clone());
        Ok(policy)
    }

    pub async fn set_mode(&self, chat_id: i64, mode: ChatMode) -> Result<()> {
        db::set_chat_mode(&self.db, chat_id, mode.as_str()).await?;
        self.cache.remove(&chat_id);
        Ok(())
    }

    pub async fn set_recheck(&self, chat_id: i64, recheck_secs: i64) -> Result<()> {
        db::set_chat_recheck(&self.db, chat_id, recheck_secs, DEFAULT_MODE.as_str()).await?;
        self.cache.remove(&chat_id);
        Ok(())
    }

    /// Trwały, bezwarunkowy wpis whitelisty.
    pub async fn whitelist_add(&self, chat_id: i64, user_id: u64, now: i64) -> Result<()> {
        db::whitelist_add(&self.db, chat_id, user_id as i64, now).await
    }

    pub async fn is_whitelisted(&self, chat_id: i64, user_id: u64) -> Result<bool> {
        db::is_whitelisted(&self.db, chat_id, user_id as i64).await
    }
}
