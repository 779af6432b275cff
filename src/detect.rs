//! Silnik detekcji: lokalny indeks -> cache -> zapytanie CAS.
//! Sygnały lokalne i z cache'u są tanie i zawsze mają pierwszeństwo przed
//! rundą po sieci; do CAS trafia tylko prawdziwy miss.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::{cas::Reputation, scamlist::ScamList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Local,
    Cache,
    Remote,
    /// Lookup padł – werdykt "czysty" tylko na ten przebieg, bez cache'owania.
    RemoteFailed,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::Cache => "cache",
            Source::Remote => "remote",
            Source::RemoteFailed => "remote-failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub flagged: bool,
    pub evidence: String,
    pub source: Source,
}

pub struct Detector {
    scamlist: Arc<ScamList>,
    reputation: Arc<Reputation>,
}

impl Detector {
    pub fn new(scamlist: Arc<ScamList>, reputation: Arc<Reputation>) -> Self {
        Self {
            scamlist,
            reputation,
        }
    }

    pub async fn evaluate(&self, user_id: u64) -> Verdict {
        // 1) lokalny indeks – bez wychodzenia w sieć
        if let Some(tag) = self.scamlist.source_tag(user_id).await {
            return Verdict {
                flagged: true,
                evidence: format!("local blacklist ({tag})"),
                source: Source::Local,
            };
        }

        // 2) cache / 3) lookup CAS (singleflight w środku)
        match self.reputation.resolve(user_id).await {
            Ok((cached, from_cache)) => Verdict {
                flagged: cached.flagged,
                evidence: cached.evidence,
                source: if from_cache {
                    Source::Cache
                } else {
                    Source::Remote
                },
            },
            Err(e) => {
                debug!(user_id, err = %e, "cas lookup failed; clean for this pass only");
                Verdict {
                    flagged: false,
                    evidence: format!("lookup failed: {e}"),
                    source: Source::RemoteFailed,
                }
            }
        }
    }
}
