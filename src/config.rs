//! Process configuration loaded once from a flat key=value file.
//! -------------------------------------------------------------
//! Lines starting with `#` are comments; the first `=` on a line splits key
//! from value; both sides are trimmed. There is no nesting and no type
//! coercion beyond strings. Absent keys resolve to documented defaults and an
//! unreadable file degrades to an all-defaults config rather than failing the
//! process. That availability-over-correctness choice is inherited wire
//! behaviour; it is logged at warn level so a misconfigured deployment is at
//! least visible (see DESIGN.md for the open question on failing fast).

use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing::warn;

pub const KEY_APP_SECRET: &str = "APP_SECRET";
pub const KEY_API_SECRET: &str = "API_SECRET";
pub const KEY_APP_DOMAIN: &str = "APP_DOMAIN";
pub const KEY_APP_ENV: &str = "APP_ENV";

pub const DEFAULT_SECRET: &str = "change-me";
pub const DEFAULT_DOMAIN: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Immutable snapshot of the key=value source plus the typed settings this
/// core reads on every authorization decision.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_secret: String,
    pub api_secret: String,
    pub domain: String,
    pub environment: Environment,
    values: HashMap<String, String>,
}

impl Config {
    pub fn from_values(values: HashMap<String, String>) -> Self {
        let app_secret = values
            .get(KEY_APP_SECRET)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SECRET.to_string());
        if app_secret == DEFAULT_SECRET {
            warn!(target: "config", "APP_SECRET not configured; using placeholder secret");
        }
        // Legacy path-bound tokens sign with API_SECRET; fall back to the app
        // secret when only one is provisioned.
        let api_secret = values
            .get(KEY_API_SECRET)
            .cloned()
            .unwrap_or_else(|| app_secret.clone());
        let domain = values
            .get(KEY_APP_DOMAIN)
            .cloned()
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let environment = values
            .get(KEY_APP_ENV)
            .map(|s| Environment::parse(s))
            .unwrap_or(Environment::Development);
        Self { app_secret, api_secret, domain, environment, values }
    }

    /// Raw lookup for keys outside the typed core settings.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values.get(key).map(|s| s.as_str()).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Lazily-loaded, read-once configuration. `load` is idempotent and safe to
/// race from concurrent first-time callers; re-reading the file requires a
/// process restart.
pub struct ConfigStore {
    path: PathBuf,
    cell: OnceCell<Config>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cell: OnceCell::new() }
    }

    /// Pre-seeded store for tests and embedded wiring; no file is read.
    pub fn from_values(values: HashMap<String, String>) -> Self {
        Self {
            path: PathBuf::new(),
            cell: OnceCell::with_value(Config::from_values(values)),
        }
    }

    pub fn load(&self) -> &Config {
        self.cell.get_or_init(|| {
            let values = match std::fs::read_to_string(&self.path) {
                Ok(text) => parse_env_text(&text),
                Err(e) => {
                    warn!(
                        target: "config",
                        path = %self.path.display(),
                        error = %e,
                        "config file unreadable; falling back to defaults"
                    );
                    HashMap::new()
                }
            };
            Config::from_values(values)
        })
    }
}

fn parse_env_text(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(eq) = line.find('=') {
            let (k, v) = line.split_at(eq);
            out.insert(k.trim().to_string(), v[1..].trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn parses_comments_trimming_and_first_equals() {
        let text = "# comment\n  APP_ENV = production \nAPP_SECRET=a=b=c\n\nnot_a_pair\n";
        let m = parse_env_text(text);
        assert_eq!(m.get("APP_ENV").map(|s| s.as_str()), Some("production"));
        // value keeps everything after the first '='
        assert_eq!(m.get("APP_SECRET").map(|s| s.as_str()), Some("a=b=c"));
        assert!(!m.contains_key("not_a_pair"));
        assert!(!m.contains_key("# comment"));
    }

    #[test]
    fn missing_file_resolves_to_defaults() {
        let store = ConfigStore::new("/nonexistent/agrigate.conf");
        let cfg = store.load();
        assert_eq!(cfg.app_secret, DEFAULT_SECRET);
        assert_eq!(cfg.api_secret, DEFAULT_SECRET);
        assert_eq!(cfg.domain, DEFAULT_DOMAIN);
        assert_eq!(cfg.environment, Environment::Development);
    }

    #[test]
    fn load_reads_the_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "APP_SECRET=first").unwrap();
        }
        let store = ConfigStore::new(&path);
        assert_eq!(store.load().app_secret, "first");
        // Rewrite the file; the cached value must win.
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "APP_SECRET=second").unwrap();
        }
        assert_eq!(store.load().app_secret, "first");
    }

    #[test]
    fn api_secret_falls_back_to_app_secret() {
        let mut v = HashMap::new();
        v.insert(KEY_APP_SECRET.to_string(), "s1".to_string());
        let cfg = Config::from_values(v);
        assert_eq!(cfg.api_secret, "s1");

        let mut v = HashMap::new();
        v.insert(KEY_APP_SECRET.to_string(), "s1".to_string());
        v.insert(KEY_API_SECRET.to_string(), "s2".to_string());
        let cfg = Config::from_values(v);
        assert_eq!(cfg.api_secret, "s2");
    }

    #[test]
    fn environment_parsing_defaults_to_development() {
        assert_eq!(Environment::parse("Production"), Environment::Production);
        assert_eq!(Environment::parse(" development "), Environment::Development);
        assert_eq!(Environment::parse("staging"), Environment::Development);
    }

    #[test]
    fn raw_get_returns_default_for_missing_keys() {
        let cfg = Config::from_values(HashMap::new());
        assert_eq!(cfg.get("ADMIN_USER", "admin"), "admin");
        assert!(!cfg.has("ADMIN_USER"));
    }
}
