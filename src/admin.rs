//! Read-only panel operatora (JSON po HTTP). Statyczny token Bearer,
//! porównywany w stałym czasie; bez tokena panel nie startuje.
//! /healthz jest bez autoryzacji (sonda żywotności).

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{AppContext, db, now_ts};

#[derive(Clone)]
struct AdminState {
    app: Arc<AppContext>,
}

pub async fn serve(app: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let bind = app.settings.admin.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "admin dashboard listening");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

pub fn router(app: Arc<AppContext>) -> Router {
    let state = AdminState { app };
    Router::new()
        .route("/api/overview", get(overview))
        .route("/api/chats/{chat_id}/stats", get(chat_stats))
        .route("/api/actions", get(actions))
        .route("/api/sources", get(sources))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .route("/healthz", get(healthz))
        .with_state(state)
}

fn token_matches(given: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(given.as_bytes().ct_eq(expected.as_bytes()))
}

async fn require_token(State(state): State<AdminState>, req: Request, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|tok| token_matches(tok.trim(), &state.app.settings.admin.token))
        .unwrap_or(false);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(req).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn overview(State(state): State<AdminState>) -> Response {
    let app = &state.app;
    let now = now_ts();
    let stats = async {
        anyhow::Ok((
            db::global_action_stats(&app.db, now - 86_400).await?,
            db::global_action_stats(&app.db, now - 7 * 86_400).await?,
            db::global_action_stats(&app.db, now - 30 * 86_400).await?,
        ))
    }
    .await;
    match stats {
        Ok((day, week, month)) => Json(json!({
            "app": app.settings.app.name,
            "env": app.settings.env,
            "scamlist": {
                "size": app.scamlist().size().await,
                "last_refresh": app.scamlist().last_refresh(),
            },
            "cache_entries": app.reputation().entry_count(),
            "actions": { "day": day, "week": week, "month": month },
        }))
        .into_response(),
        Err(e) => {
            warn!(err = ?e, "admin overview failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn chat_stats(State(state): State<AdminState>, Path(chat_id): Path<i64>) -> Response {
    let app = &state.app;
    let now = now_ts();
    let result = async {
        let policy = app.policy().policy(chat_id).await?;
        anyhow::Ok(json!({
            "chat_id": chat_id,
            "mode": policy.mode.as_str(),
            "recheck_secs": policy.recheck_secs,
            "actions": {
                "day": db::action_stats(&app.db, chat_id, now - 86_400).await?,
                "week": db::action_stats(&app.db, chat_id, now - 7 * 86_400).await?,
                "month": db::action_stats(&app.db, chat_id, now - 30 * 86_400).await?,
            },
        }))
    }
    .await;
    match result {
        Ok(v) => Json(v).into_response(),
        Err(e) => {
            warn!(chat_id, err = ?e, "admin chat stats failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct ActionsQuery {
    limit: Option<i64>,
}

async fn actions(State(state): State<AdminState>, Query(q): Query<ActionsQuery>) -> Response {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    match db::recent_actions(&state.app.db, limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(err = ?e, "admin actions failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn sources(State(state): State<AdminState>) -> Response {
    match db::list_source_updates(&state.app.db).await {
        Ok(rows) => {
            let rows: Vec<_> = rows
                .into_iter()
                .map(|(name, last_ts, count)| json!({ "name": name, "last_ts": last_ts, "count": count }))
                .collect();
            Json(rows).into_response()
        }
        Err(e) => {
            warn!(err = ?e, "admin sources failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
