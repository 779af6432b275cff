use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub telegram: Telegram,
    pub database: Database,
    pub logging: Logging,
    pub sources: Sources,
    pub detection: Detection,
    pub admin: Admin,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Telegram {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    pub path: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: Option<String>,
}

/// Jedno źródło snapshotów blacklisty (format parsowania patrz scamlist.rs).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    pub format: SourceFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// CSV – id w pierwszej kolumnie, nagłówek pomijamy.
    Csv,
    /// Jedno id na linię.
    Lines,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sources {
    /// Co ile odświeżamy pełny zrzut źródeł ("30m", "1h", albo gołe sekundy).
    #[serde(deserialize_with = "de_duration_secs")]
    pub refresh_interval: u64,
    pub entries: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Detection {
    pub cas_base_url: String,
    /// Minimalny odstęp między kolejnymi ocenami tej samej pary (chat, user).
    #[serde(deserialize_with = "de_duration_secs")]
    pub recheck_interval: u64,
    /// TTL cache'u werdyktów CAS.
    #[serde(deserialize_with = "de_duration_secs")]
    pub cas_cache_ttl: u64,
    #[serde(deserialize_with = "de_duration_secs")]
    pub http_timeout: u64,
    /// Po jakim czasie nieaktywna para (chat, user) wypada z seen_users.
    #[serde(deserialize_with = "de_duration_secs")]
    pub seen_ttl: u64,
    pub message_cache_limit: u32,
    /// Lokalny limit zapytań do CAS (courtesy, na minutę).
    pub cas_rate_per_min: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Admin {
    pub enabled: bool,
    pub bind: String,
    pub token: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Które środowisko?
        let env = std::env::var("CASG_ENV").unwrap_or_else(|_| "development".to_string());

        // Załaduj .env.<env> i .env (jeśli są)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        // Domyślne wartości
        #[derive(Deserialize, Serialize)]
        struct Defaults {
            env: String,
            app: App,
            telegram: Telegram,
            database: Database,
            logging: Logging,
            sources: Sources,
            detection: Detection,
            admin: Admin,
        }

        let defaults = Defaults {
            env: env.clone(),
            app: App {
                name: "CAS Guard".into(),
            },
            telegram: Telegram { token: "".into() },
            database: Database {
                path: "data/casg.sqlite3".into(),
                max_connections: Some(5),
            },
            logging: Logging {
                level: Some("info".into()),
            },
            sources: Sources {
                refresh_interval: 30 * 60,
                entries: vec![
                    SourceEntry {
                        name: "cas-export".into(),
                        url: "https://api.cas.chat/export.csv".into(),
                        format: SourceFormat::Csv,
                    },
                    SourceEntry {
                        name: "lols-bot".into(),
                        url: "https://lols.bot/scammers.txt".into(),
                        format: SourceFormat::Lines,
                    },
                ],
            },
            detection: Detection {
                cas_base_url: "https://api.cas.chat".into(),
                recheck_interval: 15 * 60,
                cas_cache_ttl: 10 * 60,
                http_timeout: 7,
                seen_ttl: 7 * 86_400,
                message_cache_limit: 50,
                cas_rate_per_min: 60,
            },
            admin: Admin {
                enabled: false,
                bind: "127.0.0.1:9005".into(),
                token: "".into(),
            },
        };

        // Warstwy: domyślne -> plik TOML -> zmienne środowiskowe CASG_*
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            // CASG_TELEGRAM_TOKEN => telegram.token itd.
            .merge(Env::prefixed("CASG_").split("_"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        // Uzupełnij brakujące domyślne
        if s.database.max_connections.is_none() {
            s.database.max_connections = Some(5);
        }

        s.validate()?;
        Ok(s)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.detection.cas_base_url).with_context(|| {
            format!(
                "invalid detection.cas_base_url: {}",
                self.detection.cas_base_url
            )
        })?;
        for src in &self.sources.entries {
            Url::parse(&src.url)
                .with_context(|| format!("invalid source url for {}: {}", src.name, src.url))?;
        }
        if self.admin.enabled && self.admin.token.trim().is_empty() {
            anyhow::bail!("admin.enabled=true requires a non-empty admin.token");
        }
        Ok(())
    }
}

static DURATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*([smhd])$").unwrap());

/// "45s" -> 45, "15m" -> 900, "2h" -> 7200, "7d" -> 604800.
pub fn parse_duration_secs(s: &str) -> Option<u64> {
    let lower = s.trim().to_ascii_lowercase();
    let caps = DURATION_RE.captures(&lower)?;
    let n: u64 = caps[1].parse().ok()?;
    let mult = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return None,
    };
    n.checked_mul(mult)
}

/// Akceptujemy i "15m" (TOML/env), i gołe sekundy (warstwa defaults).
fn de_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a duration like \"15m\" or a number of seconds")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("negative duration"))
        }

        fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<u64, E> {
            if let Ok(n) = s.parse::<u64>() {
                return Ok(n);
            }
            parse_duration_secs(s).ok_or_else(|| E::custom(format!("invalid duration: {s}")))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
