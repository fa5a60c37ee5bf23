use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cantor_engine::ServerConfig;

/// Default location of the server settings file.
pub fn settings_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir()?;
    base.push("Cantor");
    base.push("server.json");
    Some(base)
}

#[derive(Debug)]
pub struct Loaded {
    pub config: ServerConfig,
    /// File the settings were read from; `None` when defaults were used.
    pub source: Option<PathBuf>,
}

/// Reads settings from `explicit`, or from the default location when it
/// exists. Missing fields take their defaults.
pub fn load(explicit: Option<&Path>) -> Result<Loaded> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match settings_path() {
            Some(path) if path.exists() => path,
            _ => {
                return Ok(Loaded {
                    config: ServerConfig::default(),
                    source: None,
                })
            }
        },
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid settings file", path.display()))?;
    Ok(Loaded {
        config,
        source: Some(path),
    })
}

/// Logs where the settings came from. Call once the subscriber is installed.
pub fn report(loaded: &Loaded) {
    match &loaded.source {
        Some(path) => tracing::debug!(path = %path.display(), "settings loaded"),
        None => tracing::debug!("no settings file, using defaults"),
    }
}

pub fn save(path: &Path, config: &ServerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{ "listen": "0.0.0.0:9000", "engine": { "first_node": 2000 } }"#)
            .expect("write");
        let loaded = load(Some(&path)).expect("load");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        let config = loaded.config;
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.engine.first_node, 2000);
        assert_eq!(config.synth, ServerConfig::default().synth);
        assert_eq!(config.engine.sampler_definition, "sampler");
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("server.json");
        let mut config = ServerConfig::default();
        config.poll_ms = 7;
        save(&path, &config).expect("save");
        assert_eq!(load(Some(&path)).expect("load").config, config);
    }

    #[test]
    fn loaded_event_is_logged_once_a_subscriber_is_installed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{ "log_filter": "debug" }"#).expect("write");
        let loaded = load(Some(&path)).expect("load");

        let output = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let writer = {
            let output = output.clone();
            move || Capture(output.clone())
        };
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(&loaded.config.log_filter))
            .with_writer(writer)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || report(&loaded));

        let text = String::from_utf8(output.lock().expect("lock").clone()).expect("utf8");
        assert!(text.contains("settings loaded"), "{text}");
        assert!(text.contains("server.json"), "{text}");
    }

    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.json");
        fs::write(&path, "{ nope").expect("write");
        assert!(load(Some(&path)).is_err());
    }
}
