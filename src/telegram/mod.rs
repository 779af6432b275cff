// src/telegram/mod.rs
//
// Warstwa Telegrama: long polling (teloxide), komendy administracyjne
// i implementacja traitu Transport dla silnika. Joiny łapiemy przez
// service message new_chat_members; każda wiadomość grupowa dotyka
// rekordu seen i zasila msg_cache pod ewentualny purge.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::{
    dispatching::UpdateHandler,
    dptree,
    prelude::*,
    types::{ChatId, ChatMemberKind, MessageId, ParseMode, User, UserId},
    utils::command::BotCommands,
};
use tracing::{debug, info, warn};

use crate::{
    AppContext, db,
    detect::Source,
    now_ts,
    policy::ChatMode,
    scheduler, texts,
    transport::Transport,
};

/* ===========================
   Transport (teloxide)
   =========================== */

pub struct TgTransport {
    bot: Bot,
}

impl TgTransport {
    pub fn new(bot: Bot) -> Arc<Self> {
        Arc::new(Self { bot })
    }
}

#[async_trait]
impl Transport for TgTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn ban(&self, chat_id: i64, user_id: u64) -> Result<()> {
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(user_id))
            .await?;
        Ok(())
    }

    async fn unban(&self, chat_id: i64, user_id: u64) -> Result<()> {
        self.bot
            .unban_chat_member(ChatId(chat_id), UserId(user_id))
            .only_if_banned(true)
            .await?;
        Ok(())
    }

    async fn delete_messages(&self, chat_id: i64, message_ids: &[i32]) -> Result<()> {
        // pojedyncze "message to delete not found" ignorujemy; błąd zgłaszamy
        // dopiero, gdy nie udało się usunąć niczego
        let mut deleted = 0usize;
        let mut last_err: Option<teloxide::RequestError> = None;
        for &mid in message_ids {
            match self
                .bot
                .delete_message(ChatId(chat_id), MessageId(mid))
                .await
            {
                Ok(_) => deleted += 1,
                Err(e) => last_err = Some(e),
            }
        }
        if deleted == 0 {
            if let Some(e) = last_err {
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn is_chat_admin(&self, chat_id: i64, user_id: u64) -> Result<bool> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(user_id))
            .await?;
        Ok(member.is_privileged())
    }

    async fn bot_has_required_rights(&self, chat_id: i64) -> Result<bool> {
        let me = self.bot.get_me().await?;
        let member = self.bot.get_chat_member(ChatId(chat_id), me.id).await?;
        Ok(match &member.kind {
            ChatMemberKind::Owner(_) => true,
            ChatMemberKind::Administrator(a) => a.can_restrict_members && a.can_delete_messages,
            _ => false,
        })
    }

    async fn display_name(&self, chat_id: i64, user_id: u64) -> Option<String> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .ok()?;
        let name = member.user.full_name();
        if name.is_empty() { None } else { Some(name) }
    }
}

/* ===========================
   Komendy
   =========================== */

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Cmd {
    #[command(description = "report-only mode (admins)")]
    Notify,
    #[command(description = "ban flagged users on sight (admins)")]
    Quickban,
    #[command(description = "whitelist a user id (admins)")]
    Unban(String),
    #[command(description = "bot status")]
    Status,
    #[command(description = "action stats (24h/7d/30d)")]
    Stats,
    #[command(description = "force a blacklist refresh (admins)")]
    Refresh,
}

fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Cmd>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message))
}

async fn reply_html(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = bot
        .send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .await
    {
        warn!(chat_id = chat_id.0, err = ?e, "reply failed");
    }
}

async fn handle_command(
    bot: Bot,
    app: Arc<AppContext>,
    transport: Arc<TgTransport>,
    msg: Message,
    cmd: Cmd,
) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    // komendy zmieniające stan są tylko dla adminów czatu
    let admin_only = matches!(cmd, Cmd::Notify | Cmd::Quickban | Cmd::Unban(_) | Cmd::Refresh);
    if admin_only {
        let is_admin = transport
            .is_chat_admin(chat_id, from.id.0)
            .await
            .unwrap_or(false);
        if !is_admin {
            reply_html(&bot, msg.chat.id, texts::not_admin()).await;
            return Ok(());
        }
    }

    match cmd {
        Cmd::Notify => {
            app.policy().set_mode(chat_id, ChatMode::Notify).await?;
            reply_html(&bot, msg.chat.id, &texts::mode_set(ChatMode::Notify.as_str())).await;
        }
        Cmd::Quickban => {
            app.policy().set_mode(chat_id, ChatMode::Quickban).await?;
            reply_html(
                &bot,
                msg.chat.id,
                &texts::mode_set(ChatMode::Quickban.as_str()),
            )
            .await;
        }
        Cmd::Unban(arg) => {
            let Ok(target) = arg.trim().parse::<u64>() else {
                reply_html(&bot, msg.chat.id, texts::usage_unban()).await;
                return Ok(());
            };
            // whitelist jest trwała niezależnie od wyniku unbana na platformie
            app.policy().whitelist_add(chat_id, target, now_ts()).await?;
            if let Err(e) = transport.unban(chat_id, target).await {
                debug!(chat_id, user_id = target, err = ?e, "platform unban failed (whitelist kept)");
            }
            reply_html(&bot, msg.chat.id, &texts::unban_ok(target)).await;
        }
        Cmd::Status => {
            let policy = app.policy().policy(chat_id).await?;
            let scamlist = app.scamlist();
            let day = db::action_stats(&app.db, chat_id, now_ts() - 86_400).await?;
            let rights = transport.bot_has_required_rights(chat_id).await.ok();
            let text = texts::status(
                policy.mode.as_str(),
                scamlist.size().await,
                scamlist.last_refresh(),
                policy.recheck_secs,
                app.settings.sources.refresh_interval as i64,
                app.settings.detection.seen_ttl as i64,
                day.failed,
                rights,
            );
            reply_html(&bot, msg.chat.id, &text).await;
        }
        Cmd::Stats => {
            let now = now_ts();
            let day = db::action_stats(&app.db, chat_id, now - 86_400).await?;
            let week = db::action_stats(&app.db, chat_id, now - 7 * 86_400).await?;
            let month = db::action_stats(&app.db, chat_id, now - 30 * 86_400).await?;
            reply_html(&bot, msg.chat.id, &texts::stats(&day, &week, &month)).await;
        }
        Cmd::Refresh => {
            let report = scheduler::refresh_sources(&app).await;
            let text = if report.swapped {
                let failed = report.sources.iter().filter(|s| s.error.is_some()).count();
                texts::refresh_done(report.total, failed)
            } else {
                texts::refresh_kept_previous().to_string()
            };
            reply_html(&bot, msg.chat.id, &text).await;
        }
    }
    Ok(())
}

/* ===========================
   Wiadomości i joiny
   =========================== */

async fn handle_message(
    app: Arc<AppContext>,
    transport: Arc<TgTransport>,
    msg: Message,
) -> Result<()> {
    if msg.chat.is_private() {
        return Ok(());
    }
    let chat_id = msg.chat.id.0;

    // service message o dołączeniu – sprawdzamy od razu, bez bramki
    if let Some(members) = msg.new_chat_members() {
        for user in members {
            if user.is_bot {
                continue;
            }
            if let Err(e) = process_user(&app, transport.as_ref(), chat_id, user, None, true).await
            {
                warn!(chat_id, user_id = user.id.0, err = ?e, "join check failed");
            }
        }
        return Ok(());
    }

    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }
    process_user(&app, transport.as_ref(), chat_id, user, Some(msg.id.0), false).await
}

/// Wspólna ścieżka oceny dla wiadomości i joinów.
async fn process_user(
    app: &AppContext,
    transport: &dyn Transport,
    chat_id: i64,
    user: &User,
    message_id: Option<i32>,
    force: bool,
) -> Result<()> {
    let now = now_ts();
    let user_id = user.id.0;

    app.seen().touch(chat_id, user_id, now).await?;
    if let Some(mid) = message_id {
        db::add_message_id(
            &app.db,
            chat_id,
            user_id as i64,
            mid as i64,
            app.settings.detection.message_cache_limit as i64,
            now,
        )
        .await?;
    }

    if app.policy().is_whitelisted(chat_id, user_id).await? {
        return Ok(());
    }

    let policy = app.policy().policy(chat_id).await?;
    if !force
        && !app
            .seen()
            .should_evaluate(chat_id, user_id, policy.recheck_secs, now)
            .await?
    {
        // między bramkami wiadomości przechodzą bez detekcji
        return Ok(());
    }

    let verdict = app.detector().evaluate(user_id).await;
    if verdict.source == Source::RemoteFailed {
        let _ = db::add_error_log(
            &app.db,
            "cas",
            Some(chat_id),
            Some(user_id as i64),
            &verdict.evidence,
            now,
        )
        .await;
    }

    let name = {
        let n = user.full_name();
        if n.is_empty() { user_id.to_string() } else { n }
    };
    app.dispatcher()
        .dispatch(transport, chat_id, user_id, &name, &verdict, now)
        .await?;
    Ok(())
}

/* ===========================
   Start pollingu
   =========================== */

pub async fn run_bot(bot: Bot, app: Arc<AppContext>, transport: Arc<TgTransport>) {
    info!("Starting bot polling...");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![app, transport])
        .default_handler(|upd| async move {
            let _ = upd;
        })
        .error_handler(LoggingErrorHandler::with_custom_text("update handler error"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
