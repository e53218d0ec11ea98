use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::{BTreeMap, HashMap},
    ffi::OsString,
    fmt, fs,
    path::Path,
    str::FromStr,
    time::Duration,
};
use url::Url;

use crate::video::VideoServerConfig;

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Upstream metadata API settings. The key never shows up in `Debug` output.
#[derive(Clone)]
pub struct TmdbConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl fmt::Debug for TmdbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmdbConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// Emit JSON lines instead of the human readable format.
    pub json: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tmdb: TmdbConfig,
    pub host: String,
    pub port: u16,
    pub log: LogConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub trust_proxy: bool,
    pub cors_origins: Vec<String>,
    pub servers: Vec<VideoServerConfig>,
}

/// Reads a `KEY=VALUE` env file. A missing file yields `None`.
pub fn read_env_file(path: &Path) -> Result<Option<Vec<(String, String)>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut vars = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value_raw.trim().trim_matches('"');
            vars.push((key.to_string(), value.to_string()));
        }
    }
    Ok(Some(vars))
}

impl AppConfig {
    /// Loads the process environment, seeded by the env file at `env_file`.
    /// Variables already present in the process win over file values.
    pub fn load(env_file: impl AsRef<Path>) -> Result<Self> {
        let mut vars: HashMap<String, String> = read_env_file(env_file.as_ref())?
            .unwrap_or_default()
            .into_iter()
            .collect();
        vars.extend(process_vars(std::env::vars_os()));
        Self::from_vars(vars)
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        let api_key = vars
            .get("TMDB_API_KEY")
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow!("TMDB_API_KEY must be set"))?;

        let base_url = vars
            .get("TMDB_BASE_URL")
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string());
        Url::parse(&base_url).with_context(|| format!("Parsing TMDB_BASE_URL {base_url}"))?;

        let timeout = positive_secs(&vars, "UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;
        let port = parse_var(&vars, "PORT")?.unwrap_or(DEFAULT_PORT);
        let host = vars
            .get("HOST")
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let log = LogConfig {
            level: vars
                .get("LOG_LEVEL")
                .filter(|value| !value.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json: vars.get("NODE_ENV").map(String::as_str) == Some("production"),
        };

        let cache = CacheConfig {
            ttl: positive_secs(&vars, "CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?,
            max_entries: parse_var(&vars, "CACHE_MAX_ENTRIES")?
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        };
        if cache.max_entries == 0 {
            bail!("CACHE_MAX_ENTRIES must be greater than zero");
        }

        let rate_limit = RateLimitConfig {
            window: positive_secs(
                &vars,
                "RATE_LIMIT_WINDOW_SECS",
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )?,
            max_requests: parse_var(&vars, "RATE_LIMIT_MAX")?.unwrap_or(DEFAULT_RATE_LIMIT_MAX),
        };
        if rate_limit.max_requests == 0 {
            bail!("RATE_LIMIT_MAX must be greater than zero");
        }

        let trust_proxy = parse_var(&vars, "TRUST_PROXY")?.unwrap_or(false);
        let cors_origins = vars
            .get("CORS_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        let servers = scan_video_servers(&vars)?;

        Ok(Self {
            tmdb: TmdbConfig {
                api_key,
                base_url,
                timeout,
            },
            host,
            port,
            log,
            cache,
            rate_limit,
            trust_proxy,
            cors_origins,
            servers,
        })
    }
}

/// Keeps the UTF-8 entries of the process environment. Anything else cannot
/// name or hold a setting this service reads.
fn process_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match vars.get(name).map(|value| value.trim()) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("Parsing {name} from {value:?}")),
    }
}

fn positive_secs(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<Duration> {
    let secs = parse_var(vars, name)?.unwrap_or(default);
    if secs == 0 {
        bail!("{name} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

/// Collects `SERVER<N>_NAME` / `SERVER<N>_URL` pairs. Half-configured servers
/// are rejected rather than skipped.
fn scan_video_servers(vars: &HashMap<String, String>) -> Result<Vec<VideoServerConfig>> {
    let mut pairs: BTreeMap<String, (Option<&String>, Option<&String>)> = BTreeMap::new();
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix("SERVER") else {
            continue;
        };
        let (digits, is_name) = if let Some(digits) = rest.strip_suffix("_NAME") {
            (digits, true)
        } else if let Some(digits) = rest.strip_suffix("_URL") {
            (digits, false)
        } else {
            continue;
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let slot = pairs.entry(digits.to_string()).or_default();
        if is_name {
            slot.0 = Some(value);
        } else {
            slot.1 = Some(value);
        }
    }

    let mut servers = Vec::with_capacity(pairs.len());
    for (digits, (name, url)) in pairs {
        let name = name
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("SERVER{digits}_NAME must be set alongside SERVER{digits}_URL"))?;
        let url = url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("SERVER{digits}_URL must be set alongside SERVER{digits}_NAME"))?;
        Url::parse(url).with_context(|| format!("Parsing SERVER{digits}_URL"))?;
        servers.push(VideoServerConfig {
            key: format!("server{digits}"),
            name: name.trim().to_string(),
            base_url: url.trim().to_string(),
        });
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn base_vars() -> Vec<(&'static str, &'static str)> {
        vec![("TMDB_API_KEY", "secret")]
    }

    #[test]
    fn read_env_file_strips_quotes_and_comments() {
        let file = make_env_file("# comment\nTMDB_API_KEY=\"abc\"\n\nPORT=4242\n");
        let vars = read_env_file(file.path()).unwrap().unwrap();
        assert_eq!(
            vars,
            vec![
                ("TMDB_API_KEY".to_string(), "abc".to_string()),
                ("PORT".to_string(), "4242".to_string()),
            ]
        );
    }

    #[test]
    fn read_env_file_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_file(&dir.path().join("absent.env")).unwrap().is_none());
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = AppConfig::from_vars(base_vars()).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.host, DEFAULT_HOST);
        assert_eq!(cfg.tmdb.base_url, DEFAULT_TMDB_BASE_URL);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(21_600));
        assert_eq!(cfg.rate_limit.window, Duration::from_secs(900));
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.cors_origins, vec!["*".to_string()]);
        assert!(!cfg.log.json);
        assert!(cfg.servers.is_empty());
    }

    #[test]
    fn missing_api_key_fails() {
        let err = AppConfig::from_vars(vec![("PORT", "3000")]).unwrap_err();
        assert!(err.to_string().contains("TMDB_API_KEY"));
    }

    #[test]
    fn invalid_port_names_variable() {
        let mut vars = base_vars();
        vars.push(("PORT", "not-a-port"));
        let err = AppConfig::from_vars(vars).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut vars = base_vars();
        vars.push(("RATE_LIMIT_WINDOW_SECS", "0"));
        assert!(AppConfig::from_vars(vars).is_err());
    }

    #[test]
    fn production_switches_to_json_logs() {
        let mut vars = base_vars();
        vars.push(("NODE_ENV", "production"));
        vars.push(("LOG_LEVEL", "debug"));
        let cfg = AppConfig::from_vars(vars).unwrap();
        assert!(cfg.log.json);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn scans_server_pairs() {
        let mut vars = base_vars();
        vars.push(("SERVER2_NAME", "Beta"));
        vars.push(("SERVER2_URL", "https://b.test/"));
        vars.push(("SERVER1_NAME", "Alpha"));
        vars.push(("SERVER1_URL", "https://a.test/"));
        vars.push(("SERVERX_NAME", "ignored"));
        let cfg = AppConfig::from_vars(vars).unwrap();
        let keys: Vec<_> = cfg.servers.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"server1"));
        assert!(keys.contains(&"server2"));
        let alpha = cfg.servers.iter().find(|s| s.key == "server1").unwrap();
        assert_eq!(alpha.name, "Alpha");
        assert_eq!(alpha.base_url, "https://a.test/");
    }

    #[test]
    fn registry_orders_scanned_servers_by_key() {
        let mut vars = base_vars();
        vars.push(("SERVER2_NAME", "Two"));
        vars.push(("SERVER2_URL", "https://two.test/"));
        vars.push(("SERVER10_NAME", "Ten"));
        vars.push(("SERVER10_URL", "https://ten.test/"));
        let cfg = AppConfig::from_vars(vars).unwrap();
        let registry = crate::video::ServerRegistry::new(cfg.servers);
        let keys: Vec<_> = registry.summaries().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["server10", "server2"]);
    }

    #[test]
    fn half_configured_server_fails_fast() {
        let mut vars = base_vars();
        vars.push(("SERVER3_NAME", "Orphan"));
        let err = AppConfig::from_vars(vars).unwrap_err();
        assert!(err.to_string().contains("SERVER3_URL"));

        let mut vars = base_vars();
        vars.push(("SERVER4_URL", "https://d.test/"));
        let err = AppConfig::from_vars(vars).unwrap_err();
        assert!(err.to_string().contains("SERVER4_NAME"));
    }

    #[test]
    fn server_url_must_parse() {
        let mut vars = base_vars();
        vars.push(("SERVER1_NAME", "Alpha"));
        vars.push(("SERVER1_URL", "not a url"));
        assert!(AppConfig::from_vars(vars).is_err());
    }

    #[test]
    fn load_prefers_file_values_when_process_env_is_silent() {
        let file = make_env_file(
            "TMDB_API_KEY=\"from-file\"\nCACHE_MAX_ENTRIES=\"25\"\n",
        );
        let cfg = AppConfig::load(file.path()).unwrap();
        if std::env::var("TMDB_API_KEY").is_err() {
            assert_eq!(cfg.tmdb.api_key, "from-file");
        }
        if std::env::var("CACHE_MAX_ENTRIES").is_err() {
            assert_eq!(cfg.cache.max_entries, 25);
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_vars_skips_non_utf8_entries() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("TMDB_API_KEY"), OsString::from("secret")),
            (OsString::from("BROKEN"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0x80]), OsString::from("value")),
        ];
        let kept: Vec<_> = process_vars(vars).collect();
        assert_eq!(kept, vec![("TMDB_API_KEY".to_string(), "secret".to_string())]);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let cfg = AppConfig::from_vars(vec![("TMDB_API_KEY", "super-secret")]).unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret"));
    }
}
