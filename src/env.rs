use crate::config::RunMode;
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_FILE_NAME: &str = ".env";

const SECRET_LEN: usize = 32;
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
// No quotes, backslashes or `$`: values are written single-quoted without escaping.
const SYMBOLS: &[u8] = b"!@%^*-_=+.,:~";

#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Fixed(&'static str),
    /// Random secret; `special` adds punctuation to the alphabet.
    Secret { special: bool },
}

pub const DEFAULTS: &[(&str, DefaultValue)] = {
    use DefaultValue::{Fixed, Secret};
    &[
        // Project
        ("use_docker", Fixed("yes")),
        ("ipythondir", Fixed("/app/.ipython")),
        // Django
        ("django_mfa_always_reveal_backup_tokens", Fixed("false")),
        ("django_account_allow_registration", Fixed("false")),
        ("django_account_reauthentication_timeout", Fixed("32400")),
        ("django_account_email_verification", Fixed("none")),
        ("django_admin_url", Fixed("admin/")),
        (
            "django_allowed_hosts",
            Fixed("localhost 127.0.0.1 django nginx host.docker.internal ghostwriter.local"),
        ),
        ("django_compress_enabled", Fixed("true")),
        ("django_csrf_cookie_secure", Fixed("false")),
        ("django_csrf_trusted_origins", Fixed("")),
        ("django_date_format", Fixed("d M Y")),
        ("django_host", Fixed("django")),
        ("django_jwt_secret_key", Secret { special: false }),
        ("django_mailgun_api_key", Fixed("")),
        ("django_mailgun_domain", Fixed("")),
        ("django_port", Fixed("8000")),
        ("django_qcluster_name", Fixed("soar")),
        ("django_secret_key", Secret { special: false }),
        ("django_secure_ssl_redirect", Fixed("false")),
        ("django_session_cookie_age", Fixed("32400")),
        ("django_session_cookie_secure", Fixed("false")),
        ("django_session_expire_at_browser_close", Fixed("false")),
        ("django_session_save_every_request", Fixed("true")),
        ("django_settings_module", Fixed("config.settings.local")),
        ("django_social_account_allow_registration", Fixed("false")),
        ("django_social_account_domain_allowlist", Fixed("")),
        ("django_social_account_login_on_get", Fixed("false")),
        ("django_superuser_email", Fixed("admin@ghostwriter.local")),
        ("django_superuser_password", Secret { special: true }),
        ("django_superuser_username", Fixed("admin")),
        ("django_web_concurrency", Fixed("4")),
        // PostgreSQL
        ("postgres_host", Fixed("postgres")),
        ("postgres_port", Fixed("5432")),
        ("postgres_db", Fixed("ghostwriter")),
        ("postgres_user", Fixed("postgres")),
        ("postgres_password", Secret { special: true }),
        ("postgres_conn_max_age", Fixed("0")),
        // Redis
        ("redis_host", Fixed("redis")),
        ("redis_port", Fixed("6379")),
        // Nginx
        ("nginx_host", Fixed("nginx")),
        ("nginx_port", Fixed("443")),
        // Hasura
        ("hasura_graphql_action_secret", Secret { special: true }),
        ("hasura_graphql_admin_secret", Secret { special: true }),
        ("hasura_graphql_dev_mode", Fixed("true")),
        ("hasura_graphql_enable_console", Fixed("false")),
        (
            "hasura_graphql_enabled_log_types",
            Fixed("startup, http-log, webhook-log, websocket-log, query-log"),
        ),
        ("hasura_graphql_enable_telemetry", Fixed("false")),
        ("hasura_graphql_server_host", Fixed("graphql_engine")),
        ("hasura_graphql_server_hostname", Fixed("graphql_engine")),
        ("hasura_graphql_insecure_skip_tls_verify", Fixed("true")),
        ("hasura_graphql_log_level", Fixed("warn")),
        ("hasura_graphql_metadata_dir", Fixed("/metadata")),
        ("hasura_graphql_migrations_dir", Fixed("/migrations")),
        ("hasura_graphql_server_port", Fixed("8080")),
        // Container and Django health checks
        ("healthcheck_disk_usage_max", Fixed("90")),
        ("healthcheck_interval", Fixed("300s")),
        ("healthcheck_mem_min", Fixed("100")),
        ("healthcheck_retries", Fixed("3")),
        ("healthcheck_start", Fixed("60s")),
        ("healthcheck_timeout", Fixed("30s")),
        // CLI behaviour
        ("gwcli_auto_check_updates", Fixed("true")),
    ]
};

/// Alias -> canonical key.
pub const ALIASES: &[(&str, &str)] = &[
    ("date_format", "django_date_format"),
    ("admin_password", "django_superuser_password"),
    ("hasura_password", "hasura_graphql_admin_secret"),
];

pub const ALLOWED_HOSTS: &str = "django_allowed_hosts";
pub const TRUSTED_ORIGINS: &str = "django_csrf_trusted_origins";

/// The five keys flipped together by the dev/prod profiles.
pub const PROFILE_KEYS: [&str; 5] = [
    "hasura_graphql_dev_mode",
    "django_secure_ssl_redirect",
    "django_settings_module",
    "django_csrf_cookie_secure",
    "django_session_cookie_secure",
];

const DEV_PROFILE: [&str; 5] = ["true", "false", "config.settings.local", "false", "false"];
const PROD_PROFILE: [&str; 5] = [
    "false",
    "true",
    "config.settings.production",
    "true",
    "true",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// One deployment's `.env`, with keys held lower-case.
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load `<dir>/.env`, creating it if missing and filling in defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(ENV_FILE_NAME);
        touch_private(&path)?;

        let mut values = BTreeMap::new();
        for item in dotenvy::from_path_iter(&path)? {
            let (key, value) = item?;
            values.insert(canonical_key(&key), value);
        }

        let mut settings = Self { path, values };
        if settings.apply_defaults() {
            debug!(path = %settings.path.display(), "persisting generated secrets");
            settings.save()?;
        }
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of `key`, or an empty string when unset.
    pub fn get(&self, key: &str) -> String {
        self.values
            .get(&canonical_key(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Boolean view of `key`; unset or empty reads as `false`.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get(key);
        match value.trim().to_lowercase().as_str() {
            "" | "false" | "f" | "0" | "no" | "n" | "off" => Ok(false),
            "true" | "t" | "1" | "yes" | "y" | "on" => Ok(true),
            _ => Err(Error::InvalidValue {
                key: canonical_key(key),
                value,
                expected: "boolean",
            }),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get(key);
        value.trim().parse::<i64>().map_err(|_| Error::InvalidValue {
            key: canonical_key(key),
            value,
            expected: "integer",
        })
    }

    /// In-memory only; call [`Settings::save`] to persist.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(canonical_key(key), value.into());
    }

    /// Add `host` to the space-delimited list in `key` unless already present.
    /// A `host` holding several whitespace-separated names adds each one.
    pub fn append_host(&mut self, key: &str, host: &str) {
        if host.trim().is_empty() {
            return;
        }
        let mut hosts = dedup_tokens(&self.get(key));
        for token in host.split_whitespace() {
            if !hosts.iter().any(|h| h == token) {
                hosts.push(token.to_string());
            }
        }
        self.set(key, hosts.join(" "));
    }

    /// Drop every occurrence of `host` from the list in `key`.
    pub fn remove_host(&mut self, key: &str, host: &str) {
        let current = self.get(key);
        if !current.split_whitespace().any(|h| h == host) {
            return;
        }
        let hosts: Vec<&str> = current.split_whitespace().filter(|h| *h != host).collect();
        self.set(key, hosts.join(" "));
    }

    pub fn set_dev_profile(&mut self) {
        self.set_profile(&DEV_PROFILE);
    }

    pub fn set_prod_profile(&mut self) {
        self.set_profile(&PROD_PROFILE);
    }

    /// Select the profile matching `mode`.
    pub fn apply_mode(&mut self, mode: RunMode) {
        if mode.uses_dev_infra() {
            self.set_dev_profile();
        } else {
            self.set_prod_profile();
        }
    }

    fn set_profile(&mut self, values: &[&str; 5]) {
        for (key, value) in PROFILE_KEYS.iter().zip(values) {
            self.set(key, *value);
        }
    }

    /// Every entry, ordered as it is written to disk.
    pub fn get_all(&self) -> Vec<Setting> {
        let mut all: Vec<Setting> = self
            .values
            .iter()
            .map(|(key, value)| Setting {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        all.sort_by_cached_key(|s| s.key.to_uppercase());
        all
    }

    /// Write every entry to a temporary file beside the real one, then rename
    /// it into place.
    pub fn save(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(ENV_FILE_NAME)
            .tempfile_in(dir)?;

        tmp.write_all(self.render().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for Setting { key, value } in self.get_all() {
            let key = key.to_uppercase();
            if value.is_empty() {
                out.push_str(&format!("{key}=\n"));
            } else {
                out.push_str(&format!("{key}='{value}'\n"));
            }
        }
        out
    }

    /// Returns true when a secret had to be generated.
    fn apply_defaults(&mut self) -> bool {
        let mut generated = false;
        for (key, default) in DEFAULTS {
            if self.values.contains_key(*key) {
                continue;
            }
            let value = match default {
                DefaultValue::Fixed(v) => v.to_string(),
                DefaultValue::Secret { special } => {
                    generated = true;
                    generate_random_password(SECRET_LEN, *special)
                }
            };
            self.values.insert(key.to_string(), value);
        }
        generated
    }
}

/// Lower-case `key` and resolve aliases to their target.
pub fn canonical_key(key: &str) -> String {
    let lower = key.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, target)| target.to_string())
        .unwrap_or(lower)
}

pub fn generate_random_password(len: usize, special: bool) -> String {
    let charset: Vec<u8> = if special {
        ALPHANUMERIC.iter().chain(SYMBOLS).copied().collect()
    } else {
        ALPHANUMERIC.to_vec()
    };
    let mut rng = rand::rng();
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

fn dedup_tokens(value: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in value.split_whitespace() {
        if !out.iter().any(|t| t == token) {
            out.push(token.to_string());
        }
    }
    out
}

fn touch_private(path: &Path) -> Result<()> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)?;
    Ok(())
}
