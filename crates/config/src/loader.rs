use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::{RelayConfig, split_id_list},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "warelay.toml",
    "warelay.yaml",
    "warelay.yml",
    "warelay.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./warelay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/warelay/warelay.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found. Environment
/// overrides are applied in both cases.
pub fn discover_and_load() -> Result<RelayConfig> {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)?
        },
        None => {
            debug!("no config file found, using defaults");
            RelayConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load an explicit file when given, otherwise discover one.
pub fn load_or_discover(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => {
            let mut config = load_config(path)?;
            apply_env_overrides(&mut config);
            Ok(config)
        },
        None => discover_and_load(),
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/warelay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "warelay").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory (`~/.local/share/warelay/`), or `./.warelay`
/// when no home directory can be determined.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "warelay")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".warelay"))
}

impl RelayConfig {
    /// Base directory for persisted sessions.
    pub fn sessions_dir(&self) -> PathBuf {
        self.session
            .dir
            .clone()
            .unwrap_or_else(|| data_dir().join("sessions"))
    }

    /// Path of the durable JSONL output.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| data_dir().join("dataset.jsonl"))
    }
}

/// Apply the recognised environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut RelayConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("WEBHOOK_URL") {
        config.webhook.url = Some(url);
    }
    if let Some(id) = lookup("SESSION_KV_KEY") {
        config.session.id = id;
    }
    if let Some(mode) = lookup("PAIR_MODE") {
        match mode.parse() {
            Ok(mode) => config.transport.pair_mode = mode,
            Err(e) => warn!(error = %e, "ignoring PAIR_MODE"),
        }
    }
    if let Some(ids) = lookup("ALLOWED_GROUP_IDS") {
        config.filter.allowed_groups = split_id_list(&ids);
    }
    if let Some(keyword) = lookup("KEYWORD_FILTER") {
        config.filter.keyword = Some(keyword).filter(|k| !k.trim().is_empty());
    }
    if let Some(forward) = lookup("FORWARD_TO_WEBHOOK") {
        config.webhook.forward = !matches!(
            forward.trim().to_ascii_lowercase().as_str(),
            "false" | "0" | "no" | "off"
        );
    }
    if let Some(url) = lookup("WARELAY_SIDECAR_URL") {
        config.transport.sidecar_url = url;
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let parsed = match ext {
        "toml" => toml::from_str(raw).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        _ => return Err(Error::UnsupportedFormat { ext: ext.into() }),
    };
    parsed.map_err(|message| Error::Parse {
        path: path.to_path_buf(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use {super::*, crate::schema::PairMode, std::collections::HashMap};

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "warelay.toml",
            r#"
            [filter]
            allowed_groups = ["120@g.us"]
            keyword = "invoice"

            [webhook]
            url = "https://hooks.example.com/wa"
            "#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.filter.allowed_groups, vec!["120@g.us"]);
        assert_eq!(cfg.filter.keyword.as_deref(), Some("invoice"));
        assert_eq!(cfg.webhook.target(), Some("https://hooks.example.com/wa"));
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(
            &dir,
            "warelay.yaml",
            "transport:\n  pair_mode: code\n  phone_number: \"4915112345678\"\n",
        );
        let cfg = load_config(&yaml).unwrap();
        assert_eq!(cfg.transport.pair_mode, PairMode::Code);

        let json = write(&dir, "warelay.json", r#"{"session": {"id": "ops"}}"#);
        assert_eq!(load_config(&json).unwrap().session.id, "ops");
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "warelay.ini", "x=1");
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "warelay.toml", "[filter\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("warelay.toml"));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WEBHOOK_URL", "https://override.example.com"),
            ("SESSION_KV_KEY", "night_shift"),
            ("PAIR_MODE", "code"),
            ("ALLOWED_GROUP_IDS", "1@g.us, 2@g.us"),
            ("KEYWORD_FILTER", "urgent"),
            ("FORWARD_TO_WEBHOOK", "false"),
        ]);
        let mut cfg = RelayConfig::default();
        apply_env_overrides_with(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            cfg.webhook.url.as_deref(),
            Some("https://override.example.com")
        );
        assert!(!cfg.webhook.forward);
        assert_eq!(cfg.session.id, "night_shift");
        assert_eq!(cfg.transport.pair_mode, PairMode::Code);
        assert_eq!(cfg.filter.allowed_groups, vec!["1@g.us", "2@g.us"]);
        assert_eq!(cfg.filter.keyword.as_deref(), Some("urgent"));
    }

    #[test]
    fn invalid_pair_mode_env_is_ignored() {
        let mut cfg = RelayConfig::default();
        apply_env_overrides_with(&mut cfg, |k| (k == "PAIR_MODE").then(|| "sms".to_string()));
        assert_eq!(cfg.transport.pair_mode, PairMode::Qr);
    }

    #[test]
    fn explicit_paths_win_over_data_dir() {
        let mut cfg = RelayConfig::default();
        cfg.session.dir = Some(PathBuf::from("/srv/wa"));
        cfg.store.path = Some(PathBuf::from("/srv/out.jsonl"));
        assert_eq!(cfg.sessions_dir(), PathBuf::from("/srv/wa"));
        assert_eq!(cfg.store_path(), PathBuf::from("/srv/out.jsonl"));
    }
}
