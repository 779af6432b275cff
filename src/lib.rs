// src/lib.rs

pub mod admin;
pub mod cas;
pub mod config;
pub mod db;
pub mod detect;
pub mod dispatch;
pub mod logging;
pub mod policy;
pub mod scamlist;
pub mod scheduler;
pub mod seen;
pub mod telegram;
pub mod texts;
pub mod transport;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use once_cell::sync::OnceCell;

use cas::{CasClient, Reputation};
use config::Settings;
use db::Db;
use detect::Detector;
use dispatch::Dispatcher;
use policy::PolicyStore;
use scamlist::ScamList;
use seen::SeenTracker;

/// Globalny kontekst aplikacji.
/// Uchwyt do DB, konfiguracja i gotowe serwisy silnika detekcji.
pub struct AppContext {
    pub settings: Settings,
    pub db: Db,
    /// Wspólny klient HTTP do pobierania zrzutów źródeł.
    pub http: reqwest::Client,
    scamlist: OnceCell<Arc<ScamList>>,
    reputation: OnceCell<Arc<Reputation>>,
    detector: OnceCell<Arc<Detector>>,
    policy: OnceCell<Arc<PolicyStore>>,
    seen: OnceCell<Arc<SeenTracker>>,
    dispatcher: OnceCell<Arc<Dispatcher>>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - połączenie z DB + migracje
    /// - konstrukcja i wstrzyknięcie serwisów do OnceCell
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) DB
        let db = db::connect(&settings.database.path, settings.database.max_connections).await?;
        db::migrate(&db).await?;

        // 3) HTTP (zrzuty źródeł)
        let http = reqwest::Client::builder()
            .user_agent("cas-guard/0.1")
            .connect_timeout(Duration::from_millis(1_500))
            .build()?;

        // 4) kontekst (na razie z pustymi OnceCell)
        let ctx = Arc::new(Self {
            settings,
            db,
            http,
            scamlist: OnceCell::new(),
            reputation: OnceCell::new(),
            detector: OnceCell::new(),
            policy: OnceCell::new(),
            seen: OnceCell::new(),
            dispatcher: OnceCell::new(),
        });

        // 5) serwisy silnika
        let det = &ctx.settings.detection;
        let scamlist = Arc::new(ScamList::new());
        let cas_client = CasClient::new(
            &det.cas_base_url,
            Duration::from_secs(det.http_timeout),
            det.cas_rate_per_min,
        )?;
        let reputation = Arc::new(Reputation::new(
            Arc::new(cas_client),
            Duration::from_secs(det.cas_cache_ttl),
            100_000,
        ));
        let detector = Arc::new(Detector::new(scamlist.clone(), reputation.clone()));
        let policy = PolicyStore::new(ctx.db.clone(), det.recheck_interval as i64);
        let seen = SeenTracker::new(ctx.db.clone());
        let dispatcher = Dispatcher::new(ctx.db.clone(), policy.clone(), seen.clone());

        let _ = ctx.scamlist.set(scamlist); // set() można wołać tylko raz
        let _ = ctx.reputation.set(reputation);
        let _ = ctx.detector.set(detector);
        let _ = ctx.policy.set(policy);
        let _ = ctx.seen.set(seen);
        let _ = ctx.dispatcher.set(dispatcher);

        Ok(ctx)
    }

    pub fn scamlist(&self) -> Arc<ScamList> {
        self.scamlist
            .get()
            .expect("ScamList not initialized")
            .clone()
    }

    pub fn reputation(&self) -> Arc<Reputation> {
        self.reputation
            .get()
            .expect("Reputation not initialized")
            .clone()
    }

    pub fn detector(&self) -> Arc<Detector> {
        self.detector
            .get()
            .expect("Detector not initialized")
            .clone()
    }

    pub fn policy(&self) -> Arc<PolicyStore> {
        self.policy.get().expect("PolicyStore not initialized").clone()
    }

    pub fn seen(&self) -> Arc<SeenTracker> {
        self.seen.get().expect("SeenTracker not initialized").clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher
            .get()
            .expect("Dispatcher not initialized")
            .clone()
    }
}

/// Bieżący czas w sekundach uniksowych (wstrzykiwany dalej jawnie,
/// żeby logika interwałów była testowalna bez spania).
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
