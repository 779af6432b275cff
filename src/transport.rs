//! Szew między silnikiem a platformą czatu. Silnik widzi tylko ten trait;
//! realna implementacja (teloxide) siedzi w telegram/, testy podstawiają
//! atrapę. Każde wywołanie ma po drugiej stronie ograniczony timeout.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn ban(&self, chat_id: i64, user_id: u64) -> Result<()>;

    /// Best-effort; wołane przy /unban po dopisaniu do whitelisty.
    async fn unban(&self, chat_id: i64, user_id: u64) -> Result<()>;

    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()>;

    async fn is_chat_admin(&self, chat_id: i64, user_id: u64) -> Result<bool>;

    /// Czy bot ma w tym czacie uprawnienia potrzebne do banów i kasowania.
    async fn bot_has_required_rights(&self, chat_id: i64) -> Result<bool>;

    /// Czytelna nazwa użytkownika do komunikatów; None gdy nie da się pobrać.
    async fn display_name(&self, chat_id: i64, user_id: u64) -> Option<String>;
}
