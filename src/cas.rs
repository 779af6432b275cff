//! Klient CAS (Combot Anti-Spam) + cache werdyktów.
//!
//! Cache ma dwa zadania: ograniczyć ruch do CAS (wyniki "czyste" też
//! cache'ujemy, żeby nie powtarzać negatywnych zapytań) i skleić
//! równoległe miss-y tego samego id w jeden lot (singleflight przez
//! `try_get_with`). Błędów lookupu nigdy nie cache'ujemy – następna ocena
//! ma spróbować jeszcze raz.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("cas request failed: {0}")]
    Http(reqwest::Error),
    #[error("cas request timed out")]
    Timeout,
    #[error("cas responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("local cas rate limit exceeded")]
    Throttled,
}

#[derive(Debug, Clone)]
pub struct CasLookup {
    pub flagged: bool,
    pub evidence: String,
}

/// Zewnętrzny lookup reputacji. Trait, żeby testy wstrzykiwały atrapę
/// zamiast prawdziwego HTTP.
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    async fn is_flagged(&self, user_id: u64) -> Result<CasLookup, LookupError>;
}

pub struct CasClient {
    http: reqwest::Client,
    base: String,
    limiter: DefaultDirectRateLimiter,
}

impl CasClient {
    pub fn new(base_url: &str, timeout: Duration, rate_per_min: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("cas-guard/0.1")
            .connect_timeout(Duration::from_millis(1_500))
            .timeout(timeout)
            .build()?;
        let per_min = NonZeroU32::new(rate_per_min).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_minute(per_min)),
        })
    }
}

#[async_trait]
impl ReputationLookup for CasClient {
    async fn is_flagged(&self, user_id: u64) -> Result<CasLookup, LookupError> {
        self.limiter.check().map_err(|_| LookupError::Throttled)?;

        let url = format!("{}/check?user_id={}", self.base, user_id);
        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Http(e)
            }
        })?;
        if !resp.status().is_success() {
            return Err(LookupError::Status(resp.status()));
        }
        let payload: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Http(e)
            }
        })?;

        // CAS: ok==true + niepusty result => rekord istnieje (konto notowane)
        let flagged = payload.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
            && payload.get("result").is_some_and(|r| !r.is_null());
        let evidence = if flagged {
            match payload.pointer("/result/offenses").and_then(|v| v.as_u64()) {
                Some(n) => format!("CAS record found (offenses={n})"),
                None => "CAS record found".to_string(),
            }
        } else {
            "no CAS record".to_string()
        };
        Ok(CasLookup { flagged, evidence })
    }
}

/// Werdykt trzymany w cache'u; wpis starszy niż TTL nigdy nie jest
/// serwowany (moka egzekwuje to przy odczycie).
#[derive(Debug, Clone)]
pub struct CachedVerdict {
    pub flagged: bool,
    pub evidence: String,
    pub fetched_at: i64,
}

pub struct Reputation {
    cache: Cache<u64, CachedVerdict>,
    lookup: Arc<dyn ReputationLookup>,
}

impl Reputation {
    pub fn new(lookup: Arc<dyn ReputationLookup>, ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache, lookup }
    }

    /// Zwraca (werdykt, czy_z_cache). Równoległe miss-y tego samego id
    /// wykonują dokładnie jeden lookup; błąd nie zostawia wpisu.
    pub async fn resolve(&self, user_id: u64) -> Result<(CachedVerdict, bool), Arc<LookupError>> {
        if let Some(hit) = self.cache.get(&user_id).await {
            return Ok((hit, true));
        }
        let lookup = self.lookup.clone();
        let fresh = self
            .cache
            .try_get_with(user_id, async move {
                let looked = lookup.is_flagged(user_id).await?;
                Ok::<_, LookupError>(CachedVerdict {
                    flagged: looked.flagged,
                    evidence: looked.evidence,
                    fetched_at: chrono::Utc::now().timestamp(),
                })
            })
            .await?;
        Ok((fresh, false))
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
