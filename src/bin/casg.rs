use anyhow::Result;
use std::sync::Arc;
use teloxide::Bot;
use tokio::sync::broadcast;

use cas_guard::{
    AppContext, admin,
    config::Settings,
    scheduler,
    telegram::{self, TgTransport},
    transport::Transport,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    if settings.telegram.token.trim().is_empty() {
        anyhow::bail!("telegram.token is empty (set CASG_TELEGRAM_TOKEN)");
    }
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;

    // refresh startowy – bot nie rusza bez świeżej blacklisty
    let _ = scheduler::refresh_sources(&ctx).await;

    let bot = Bot::new(ctx.settings.telegram.token.clone());
    let transport = TgTransport::new(bot.clone());
    let transport_dyn: Arc<dyn Transport> = transport.clone();

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let h_refresh = tokio::spawn(scheduler::run_refresh_task(
        ctx.clone(),
        shutdown_tx.subscribe(),
    ));
    let h_recheck = tokio::spawn(scheduler::run_recheck_task(
        ctx.clone(),
        transport_dyn,
        shutdown_tx.subscribe(),
    ));
    let h_admin = if ctx.settings.admin.enabled {
        let ctx_admin = ctx.clone();
        let rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = admin::serve(ctx_admin, rx).await {
                tracing::error!(err = ?e, "admin server failed");
            }
        }))
    } else {
        None
    };

    // blokuje do ctrl-c (enable_ctrlc_handler w dispatcherze)
    telegram::run_bot(bot, ctx.clone(), transport).await;

    // zadania okresowe kończą się na granicy ticka
    let _ = shutdown_tx.send(());
    let _ = h_refresh.await;
    let _ = h_recheck.await;
    if let Some(h) = h_admin {
        let _ = h.await;
    }
    Ok(())
}
