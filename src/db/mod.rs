use std::time::Duration;

use anyhow::Result;
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

pub type Db = Pool<Sqlite>;

pub async fn connect(path: &str, max: Option<u32>) -> Result<Db> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max.unwrap_or(5))
        .connect_with(opts)
        .await?;

    Ok(pool)
}

pub async fn migrate(pool: &Db) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/* ==============================
   chat_policy / whitelist
   ============================== */

/// Fetch chat policy row (mode, recheck override) if present.
pub async fn get_chat_policy(db: &Db, chat_id: i64) -> Result<Option<(String, Option<i64>)>> {
    let row = sqlx::query_as::<_, (String, Option<i64>)>(
        "SELECT mode, recheck_secs FROM chat_policy WHERE chat_id = ?",
    )
    .bind(chat_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Upsert chat mode, keeping any recheck override.
pub async fn set_chat_mode(db: &Db, chat_id: i64, mode: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO chat_policy (chat_id, mode) VALUES (?, ?) \
         ON CONFLICT(chat_id) DO UPDATE SET mode = excluded.mode",
    )
    .bind(chat_id)
    .bind(mode)
    .execute(db)
    .await?;
    Ok(())
}

/// Upsert per-chat recheck interval; a fresh row gets the given default mode.
pub async fn set_chat_recheck(
    db: &Db,
    chat_id: i64,
    recheck_secs: i64,
    default_mode: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO chat_policy (chat_id, mode, recheck_secs) VALUES (?, ?, ?) \
         ON CONFLICT(chat_id) DO UPDATE SET recheck_secs = excluded.recheck_secs",
    )
    .bind(chat_id)
    .bind(default_mode)
    .bind(recheck_secs)
    .execute(db)
    .await?;
    Ok(())
}

/// Add user to the per-chat whitelist (idempotent).
pub async fn whitelist_add(db: &Db, chat_id: i64, user_id: i64, now: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO whitelist (chat_id, user_id, added_ts) VALUES (?, ?, ?)")
        .bind(chat_id)
        .bind(user_id)
        .bind(now)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn is_whitelisted(db: &Db, chat_id: i64, user_id: i64) -> Result<bool> {
    let row = sqlx::query_as::<_, (i64,)>(
        "SELECT 1 FROM whitelist WHERE chat_id = ? AND user_id = ?",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row.is_some())
}

/* ==============================
   seen_users
   ============================== */

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeenRow {
    pub chat_id: i64,
    pub user_id: i64,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
    pub last_checked_ts: Option<i64>,
    pub last_verdict: Option<String>,
    pub last_action: Option<String>,
    pub last_action_ts: Option<i64>,
    pub action_failed: bool,
}

/// Mark the pair as recently active (creates the row on first sight).
pub async fn touch_seen(db: &Db, chat_id: i64, user_id: i64, now: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO seen_users (chat_id, user_id, first_seen_ts, last_seen_ts) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(chat_id, user_id) DO UPDATE SET last_seen_ts = excluded.last_seen_ts",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn get_seen(db: &Db, chat_id: i64, user_id: i64) -> Result<Option<SeenRow>> {
    let row = sqlx::query_as::<_, SeenRow>(
        "SELECT chat_id, user_id, first_seen_ts, last_seen_ts, last_checked_ts, \
                last_verdict, last_action, last_action_ts, action_failed \
         FROM seen_users WHERE chat_id = ? AND user_id = ?",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Record an evaluation that produced no action (clean / whitelisted / dedup).
pub async fn record_check(
    db: &Db,
    chat_id: i64,
    user_id: i64,
    verdict: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO seen_users (chat_id, user_id, first_seen_ts, last_seen_ts, last_checked_ts, last_verdict) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(chat_id, user_id) DO UPDATE SET \
            last_checked_ts = excluded.last_checked_ts, \
            last_verdict = excluded.last_verdict",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(verdict)
    .execute(db)
    .await?;
    Ok(())
}

/// Append an audit entry and advance the seen record in one transaction.
/// If this fails, the evaluation counts as not completed and will be retried.
#[allow(clippy::too_many_arguments)]
pub async fn record_action(
    db: &Db,
    chat_id: i64,
    user_id: i64,
    action: &str,
    mode: &str,
    reason: &str,
    source: &str,
    failed: bool,
    now: i64,
) -> Result<()> {
    let mut tx = db.begin().await?;
    sqlx::query(
        "INSERT INTO action_log (chat_id, user_id, action, mode, reason, source, failed, ts) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(action)
    .bind(mode)
    .bind(reason)
    .bind(source)
    .bind(failed)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO seen_users (chat_id, user_id, first_seen_ts, last_seen_ts, last_checked_ts, \
                                 last_verdict, last_action, last_action_ts, action_failed) \
         VALUES (?, ?, ?, ?, ?, 'flagged', ?, ?, ?) \
         ON CONFLICT(chat_id, user_id) DO UPDATE SET \
            last_checked_ts = excluded.last_checked_ts, \
            last_verdict = excluded.last_verdict, \
            last_action = excluded.last_action, \
            last_action_ts = excluded.last_action_ts, \
            action_failed = excluded.action_failed",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(action)
    .bind(now)
    .bind(failed)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Pairs whose last check is older than their chat's recheck interval.
/// Never-checked pairs are always due.
pub async fn due_rechecks(
    db: &Db,
    now: i64,
    min_seen_ts: i64,
    default_recheck_secs: i64,
) -> Result<Vec<(i64, i64)>> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT s.chat_id, s.user_id \
         FROM seen_users s \
         LEFT JOIN chat_policy p ON p.chat_id = s.chat_id \
         WHERE s.last_seen_ts >= ? \
           AND (s.last_checked_ts IS NULL \
                OR s.last_checked_ts <= ? - COALESCE(p.recheck_secs, ?))",
    )
    .bind(min_seen_ts)
    .bind(now)
    .bind(default_recheck_secs)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Drop pairs not seen since `min_seen_ts` and audit entries older than
/// `min_action_ts` (the 30-day stats horizon).
pub async fn prune_expired(db: &Db, min_seen_ts: i64, min_action_ts: i64) -> Result<()> {
    sqlx::query("DELETE FROM seen_users WHERE last_seen_ts < ?")
        .bind(min_seen_ts)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM msg_cache WHERE ts < ?")
        .bind(min_seen_ts)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM action_log WHERE ts < ?")
        .bind(min_action_ts)
        .execute(db)
        .await?;
    Ok(())
}

/* ==============================
   msg_cache
   ============================== */

/// Remember a message id for later purge; keeps at most `limit` newest per pair.
pub async fn add_message_id(
    db: &Db,
    chat_id: i64,
    user_id: i64,
    message_id: i64,
    limit: i64,
    now: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO msg_cache (chat_id, user_id, message_id, ts) VALUES (?, ?, ?, ?)")
        .bind(chat_id)
        .bind(user_id)
        .bind(message_id)
        .bind(now)
        .execute(db)
        .await?;
    // utnij nadmiar ponad limit (najstarsze wypadają)
    sqlx::query(
        "DELETE FROM msg_cache WHERE rowid IN ( \
            SELECT rowid FROM msg_cache \
            WHERE chat_id = ? AND user_id = ? \
            ORDER BY ts DESC, rowid DESC \
            LIMIT -1 OFFSET ? \
         )",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(limit)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn cached_messages(db: &Db, chat_id: i64, user_id: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT message_id FROM msg_cache WHERE chat_id = ? AND user_id = ? ORDER BY ts DESC",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn clear_cached_messages(db: &Db, chat_id: i64, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM msg_cache WHERE chat_id = ? AND user_id = ?")
        .bind(chat_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

/* ==============================
   action_log / statystyki
   ============================== */

#[derive(Debug, Clone, Default, sqlx::FromRow, serde::Serialize)]
pub struct ActionStats {
    pub total: i64,
    pub notify: i64,
    pub quickban: i64,
    pub failed: i64,
    pub unique_users: i64,
}

const STATS_SELECT: &str = "SELECT \
      COUNT(*) AS total, \
      COALESCE(SUM(CASE WHEN action = 'notify' THEN 1 ELSE 0 END), 0) AS notify, \
      COALESCE(SUM(CASE WHEN action = 'quickban' THEN 1 ELSE 0 END), 0) AS quickban, \
      COALESCE(SUM(CASE WHEN failed THEN 1 ELSE 0 END), 0) AS failed, \
      COUNT(DISTINCT user_id) AS unique_users \
    FROM action_log";

/// Per-chat action counts since `since_ts`.
pub async fn action_stats(db: &Db, chat_id: i64, since_ts: i64) -> Result<ActionStats> {
    let stats = sqlx::query_as::<_, ActionStats>(&format!(
        "{STATS_SELECT} WHERE chat_id = ? AND ts >= ?"
    ))
    .bind(chat_id)
    .bind(since_ts)
    .fetch_one(db)
    .await?;
    Ok(stats)
}

/// Global action counts since `since_ts` (admin overview).
pub async fn global_action_stats(db: &Db, since_ts: i64) -> Result<ActionStats> {
    let stats = sqlx::query_as::<_, ActionStats>(&format!("{STATS_SELECT} WHERE ts >= ?"))
        .bind(since_ts)
        .fetch_one(db)
        .await?;
    Ok(stats)
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ActionRow {
    pub chat_id: i64,
    pub user_id: i64,
    pub action: String,
    pub mode: String,
    pub reason: String,
    pub source: String,
    pub failed: bool,
    pub ts: i64,
}

pub async fn recent_actions(db: &Db, limit: i64) -> Result<Vec<ActionRow>> {
    let rows = sqlx::query_as::<_, ActionRow>(
        "SELECT chat_id, user_id, action, mode, reason, source, failed, ts \
         FROM action_log ORDER BY ts DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/* ==============================
   source_updates / error_log
   ============================== */

/// Record a successful source refresh (name -> last_ts, id count).
pub async fn upsert_source_update(db: &Db, name: &str, count: i64, now: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO source_updates (name, last_ts, count) VALUES (?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET last_ts = excluded.last_ts, count = excluded.count",
    )
    .bind(name)
    .bind(now)
    .bind(count)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn list_source_updates(db: &Db) -> Result<Vec<(String, i64, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64, i64)>(
        "SELECT name, last_ts, count FROM source_updates ORDER BY name",
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Absorbed-failure audit (lookup errors, transport errors) with context.
pub async fn add_error_log(
    db: &Db,
    source: &str,
    chat_id: Option<i64>,
    user_id: Option<i64>,
    message: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO error_log (source, chat_id, user_id, message, ts) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(source)
    .bind(chat_id)
    .bind(user_id)
    .bind(message)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}
