//! Zadania okresowe: odświeżanie zrzutów blacklisty i sweep zaległych
//! ponownych sprawdzeń. Obie pętle przerywamy na granicy zadania
//! (sygnał shutdown), nigdy w środku obsługi pojedynczej pary.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    AppContext, db,
    detect::Source,
    now_ts,
    scamlist::RefreshReport,
    transport::Transport,
};

/// Pełne odświeżenie źródeł + księgowość w source_updates (best-effort).
/// Wołane z tickera i z komendy /refresh.
pub async fn refresh_sources(app: &AppContext) -> RefreshReport {
    let now = now_ts();
    let timeout = Duration::from_secs(app.settings.detection.http_timeout);
    let report = app
        .scamlist()
        .refresh(&app.http, &app.settings.sources.entries, timeout, now)
        .await;

    if report.swapped {
        for src in report.sources.iter().filter(|s| s.error.is_none()) {
            if let Err(e) = db::upsert_source_update(&app.db, &src.name, src.ids as i64, now).await
            {
                debug!(source = %src.name, err = ?e, "source bookkeeping failed");
            }
        }
        if let Err(e) = db::upsert_source_update(&app.db, "total", report.total as i64, now).await {
            debug!(err = ?e, "source bookkeeping failed");
        }
    }

    let failed = report.sources.iter().filter(|s| s.error.is_some()).count();
    info!(
        total = report.total,
        swapped = report.swapped,
        failed_sources = failed,
        "sources refreshed"
    );
    report
}

/// Jedno przejście sweepa: przytnij horyzonty, potem oceń zaległe pary.
/// Awaria jednej pary nie przerywa sweepa dla pozostałych.
pub async fn run_recheck_sweep(app: &AppContext, transport: &dyn Transport) -> Result<()> {
    let det = &app.settings.detection;
    let now = now_ts();
    let min_seen = now - det.seen_ttl as i64;
    let min_action = now - 30 * 86_400;

    app.seen().prune(min_seen, min_action).await?;

    let due = app.seen().due(now, min_seen, det.recheck_interval as i64).await?;
    if !due.is_empty() {
        info!(pairs = due.len(), "recheck sweep");
    }

    for (chat_id, user_id) in due {
        let whitelisted = match app.policy().is_whitelisted(chat_id, user_id).await {
            Ok(w) => w,
            Err(e) => {
                warn!(chat_id, user_id, err = ?e, "whitelist check failed, skipping pair");
                continue;
            }
        };
        if whitelisted {
            continue;
        }

        let verdict = app.detector().evaluate(user_id).await;
        if verdict.source == Source::RemoteFailed {
            // nie zaliczamy sprawdzenia – następny sweep spróbuje ponownie
            let _ = db::add_error_log(
                &app.db,
                "cas",
                Some(chat_id),
                Some(user_id as i64),
                &verdict.evidence,
                now,
            )
            .await;
            continue;
        }

        let name = transport
            .display_name(chat_id, user_id)
            .await
            .unwrap_or_else(|| user_id.to_string());
        if let Err(e) = app
            .dispatcher()
            .dispatch(transport, chat_id, user_id, &name, &verdict, now)
            .await
        {
            warn!(chat_id, user_id, err = ?e, "recheck dispatch failed");
        }
    }
    Ok(())
}

/// Pętla odświeżania źródeł. Pierwszy (natychmiastowy) tick pomijamy –
/// refresh startowy robi main przed startem pollingu.
pub async fn run_refresh_task(app: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(app.settings.sources.refresh_interval.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let _ = refresh_sources(&app).await;
            }
        }
    }
    info!("refresh task stopped");
}

/// Pętla sweepa zaległych sprawdzeń.
pub async fn run_recheck_task(
    app: Arc<AppContext>,
    transport: Arc<dyn Transport>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        app.settings.detection.recheck_interval.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_recheck_sweep(&app, transport.as_ref()).await {
                    warn!(err = ?e, "recheck sweep failed");
                }
            }
        }
    }
    info!("recheck task stopped");
}
