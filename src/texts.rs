//! Szablony komunikatów na czat (HTML). Treści użytkownika escapujemy,
//! identyfikatory wstawiamy w <code>.

use crate::db::ActionStats;
use teloxide::utils::html::escape;

pub fn cas_link(user_id: u64) -> String {
    format!("https://api.cas.chat/check?user_id={user_id}")
}

pub fn notify(full_name: &str, user_id: u64, reason: &str) -> String {
    format!(
        "⚠️ Suspicious account detected: <b>{}</b> (ID: <code>{}</code>). \
         Reason: <b>{}</b>. Details: <a href=\"{}\">CAS check</a>.",
        escape(full_name),
        user_id,
        escape(reason),
        cas_link(user_id)
    )
}

pub fn banned(full_name: &str, user_id: u64, reason: &str) -> String {
    format!(
        "🛡 Removed <b>{}</b> (ID: <code>{}</code>). \
         Reason: <b>{}</b>. Details: <a href=\"{}\">CAS check</a>.",
        escape(full_name),
        user_id,
        escape(reason),
        cas_link(user_id)
    )
}

pub fn mode_set(mode: &str) -> String {
    format!("✅ Mode set to: <b>{mode}</b>")
}

pub fn unban_ok(user_id: u64) -> String {
    format!("✅ User <code>{user_id}</code> added to whitelist for this chat (bot will ignore).")
}

pub fn not_admin() -> &'static str {
    "⛔ This command is available only for chat administrators."
}

pub fn usage_unban() -> &'static str {
    "Usage: /unban <userid>"
}

pub fn refresh_done(total: usize, failed_sources: usize) -> String {
    if failed_sources == 0 {
        format!("🔄 Blacklist refreshed: <b>{total}</b> ids.")
    } else {
        format!("🔄 Blacklist refreshed: <b>{total}</b> ids ({failed_sources} source(s) failed).")
    }
}

pub fn refresh_kept_previous() -> &'static str {
    "⚠️ All sources failed; previous blacklist kept."
}

pub fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3_600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3_600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

fn format_ts(ts: Option<i64>) -> String {
    match ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0)) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn status(
    mode: &str,
    scamlist_size: usize,
    last_refresh: Option<i64>,
    recheck_secs: i64,
    refresh_secs: i64,
    seen_ttl_secs: i64,
    failed_24h: i64,
    bot_rights_ok: Option<bool>,
) -> String {
    let rights = match bot_rights_ok {
        Some(true) => "ok",
        Some(false) => "MISSING",
        None => "unknown",
    };
    let mut out = format!(
        "🟢 Bot status: online\n\
         Mode: <b>{mode}</b>\n\
         Local blacklist size: <b>{scamlist_size}</b> (refreshed {})\n\
         Recheck interval: <b>{}</b>\n\
         Source update interval: <b>{}</b>\n\
         Seen TTL: <b>{}</b>\n\
         Bot rights (ban/delete): <b>{rights}</b>",
        format_ts(last_refresh),
        format_duration(recheck_secs),
        format_duration(refresh_secs),
        format_duration(seen_ttl_secs),
    );
    if failed_24h > 0 {
        // operator ma zauważyć, że bot stracił uprawnienia
        out.push_str(&format!(
            "\n⚠️ Failed actions (24h): <b>{failed_24h}</b> — check bot admin rights."
        ));
    }
    out
}

pub fn stats_line(s: &ActionStats) -> String {
    format!(
        "total={}, notify={}, quickban={}, failed={}, unique_users={}",
        s.total, s.notify, s.quickban, s.failed, s.unique_users
    )
}

pub fn stats(day: &ActionStats, week: &ActionStats, month: &ActionStats) -> String {
    format!(
        "📊 Action stats\n\
         Last 24h: <b>{}</b>\n\
         Last 7d: <b>{}</b>\n\
         Last 30d: <b>{}</b>",
        stats_line(day),
        stats_line(week),
        stats_line(month)
    )
}
