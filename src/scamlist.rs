//! ScamList – lokalny indeks znanych kont spamerskich, budowany ze zrzutów
//! zewnętrznych źródeł (CAS export.csv, lols.bot). Zrzut jest odświeżany
//! okresowo i podmieniany w całości – czytelnicy widzą zawsze albo stary,
//! albo nowy zestaw, nigdy stan pośredni.
//!
//! Awaria pojedynczego źródła nie blokuje pozostałych; gdy padną wszystkie,
//! zostaje poprzedni zestaw (lepsza nieświeża ochrona niż żadna).

use std::{
    collections::HashSet,
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{SourceEntry, SourceFormat};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("source responded with status {0}")]
    Status(reqwest::StatusCode),
}

/// Surowy wynik pobrania jednego źródła (fetch oddzielony od parsowania,
/// żeby dało się testować refresh bez sieci).
pub struct FetchedSource {
    pub name: String,
    pub format: SourceFormat,
    pub body: Result<String, SourceError>,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub ids: usize,
    /// Linie pominięte przy parsowaniu (uszkodzone wpisy nie psują refreshu).
    pub skipped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    /// false = wszystkie źródła padły, zostaje poprzedni zestaw.
    pub swapped: bool,
    /// Liczba unikalnych id aktualnie serwowanego zestawu.
    pub total: usize,
    pub sources: Vec<SourceReport>,
}

#[derive(Default)]
struct IndexState {
    sets: Vec<(String, HashSet<u64>)>,
    distinct: usize,
}

pub struct ScamList {
    state: RwLock<IndexState>,
    last_refresh: AtomicI64, // unix ts; 0 = nigdy
}

impl Default for ScamList {
    fn default() -> Self {
        Self::new()
    }
}

impl ScamList {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            last_refresh: AtomicI64::new(0),
        }
    }

    pub async fn contains(&self, user_id: u64) -> bool {
        let state = self.state.read().await;
        state.sets.iter().any(|(_, set)| set.contains(&user_id))
    }

    /// Tag pierwszego źródła, które zawiera dane id (dowód dla werdyktu).
    pub async fn source_tag(&self, user_id: u64) -> Option<String> {
        let state = self.state.read().await;
        state
            .sets
            .iter()
            .find(|(_, set)| set.contains(&user_id))
            .map(|(name, _)| name.clone())
    }

    pub async fn size(&self) -> usize {
        self.state.read().await.distinct
    }

    pub fn last_refresh(&self) -> Option<i64> {
        match self.last_refresh.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Pobierz wszystkie źródła i podmień zestaw. `now` podaje wołający
    /// (deterministyczne testy).
    pub async fn refresh(
        &self,
        client: &reqwest::Client,
        entries: &[SourceEntry],
        timeout: Duration,
        now: i64,
    ) -> RefreshReport {
        let fetched = fetch_all(client, entries, timeout).await;
        self.apply(fetched, now).await
    }

    /// Zbuduj nowy zestaw z pobranych zrzutów i podmień atomowo.
    pub async fn apply(&self, fetched: Vec<FetchedSource>, now: i64) -> RefreshReport {
        let mut reports = Vec::with_capacity(fetched.len());
        let mut ok_sets: Vec<(String, HashSet<u64>)> = Vec::new();

        for src in fetched {
            match src.body {
                Ok(text) => {
                    let (ids, skipped) = match src.format {
                        SourceFormat::Csv => parse_csv_first_column(&text),
                        SourceFormat::Lines => parse_line_delimited(&text),
                    };
                    reports.push(SourceReport {
                        name: src.name.clone(),
                        ids: ids.len(),
                        skipped,
                        error: None,
                    });
                    ok_sets.push((src.name, ids));
                }
                Err(e) => {
                    warn!(source = %src.name, err = %e, "source fetch failed, skipping");
                    reports.push(SourceReport {
                        name: src.name,
                        ids: 0,
                        skipped: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if ok_sets.is_empty() {
            // fail-safe: nic nie ruszamy
            let total = self.size().await;
            return RefreshReport {
                swapped: false,
                total,
                sources: reports,
            };
        }

        let distinct = {
            let mut union: HashSet<u64> = HashSet::new();
            for (_, set) in &ok_sets {
                union.extend(set.iter().copied());
            }
            union.len()
        };

        {
            let mut state = self.state.write().await;
            *state = IndexState {
                sets: ok_sets,
                distinct,
            };
        }
        self.last_refresh.store(now, Ordering::Relaxed);

        RefreshReport {
            swapped: true,
            total: distinct,
            sources: reports,
        }
    }
}

pub async fn fetch_all(
    client: &reqwest::Client,
    entries: &[SourceEntry],
    timeout: Duration,
) -> Vec<FetchedSource> {
    let futs = entries.iter().map(|entry| {
        let client = client.clone();
        async move {
            let body = fetch_source(&client, &entry.url, timeout).await;
            FetchedSource {
                name: entry.name.clone(),
                format: entry.format,
                body,
            }
        }
    });
    futures_util::future::join_all(futs).await
}

async fn fetch_source(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, SourceError> {
    let resp = client.get(url).timeout(timeout).send().await?;
    if !resp.status().is_success() {
        return Err(SourceError::Status(resp.status()));
    }
    Ok(resp.text().await?)
}

/// export.csv bywa z nagłówkiem i wieloma kolumnami – bierzemy int
/// z pierwszej kolumny, resztę linii ignorujemy.
pub fn parse_csv_first_column(text: &str) -> (HashSet<u64>, usize) {
    let mut out = HashSet::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("user") && lower.contains("id") {
            // nagłówek
            continue;
        }
        let first = line.split(',').next().unwrap_or("").trim();
        match first.parse::<u64>() {
            Ok(id) => {
                out.insert(id);
            }
            Err(_) => skipped += 1,
        }
    }
    (out, skipped)
}

/// Jedno id na linię; puste linie pomijamy bez liczenia.
pub fn parse_line_delimited(text: &str) -> (HashSet<u64>, usize) {
    let mut out = HashSet::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<u64>() {
            Ok(id) => {
                out.insert(id);
            }
            Err(_) => skipped += 1,
        }
    }
    (out, skipped)
}
