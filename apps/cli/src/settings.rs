//! CLI settings
//!
//! Loaded in order, later sources winning:
//! 1. built-in defaults
//! 2. `pharmaquery.toml` (or the file given with `--config`)
//! 3. `PHARMAQUERY__*` environment variables, e.g. `PHARMAQUERY__PROVIDERS__OPENFDA__API_KEY`
//! 4. the provider variables shared with other pharma tooling (`PATENTS_VIEW_API_KEY`,
//!    `ENTREZ_EMAIL`, `ENTREZ_API_KEY`, `ENTREZ_TOOL_NAME`)
//!
//! A `.env` file in the working directory is loaded into the environment first.

use std::path::Path;

use anyhow::{bail, Context};
use config::{Config, Environment, File};
use pharmaquery_adapters::{ProviderConfig, ProvidersConfig};
use serde::Deserialize;

const DEFAULT_FILE: &str = "pharmaquery";
const ENV_PREFIX: &str = "PHARMAQUERY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the pharmaquery crates when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// `daily`, `hourly`, `minutely` or `never`.
    pub file_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "pharmaquery".to_string(),
            file_rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
}

impl Settings {
    /// Load settings from `.env`, the settings file and the environment.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        let mut settings: Settings = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Failed to parse settings")?;

        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Apply the provider variables understood by other pharma tooling.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let providers = &mut self.providers;
        if let Some(key) = lookup("PATENTS_VIEW_API_KEY") {
            providers.patentsview.api_key = Some(key);
        }
        if let Some(key) = lookup("ENTREZ_API_KEY") {
            providers.entrez.provider.api_key = Some(key);
        }
        if let Some(email) = lookup("ENTREZ_EMAIL") {
            providers.entrez.email = Some(email);
        }
        if let Some(tool) = lookup("ENTREZ_TOOL_NAME") {
            providers.entrez.tool = tool;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let providers = &self.providers;
        if providers.timeout_secs == 0 {
            bail!("providers.timeout_secs must be greater than zero");
        }
        let sections: [(&str, &ProviderConfig); 5] = [
            ("openfda", &providers.openfda),
            ("clinicaltrials", &providers.clinicaltrials),
            ("patentsview", &providers.patentsview),
            ("chembl", &providers.chembl),
            ("entrez", &providers.entrez.provider),
        ];
        for (name, section) in sections {
            if section.timeout_secs == Some(0) {
                bail!("providers.{name}.timeout_secs must be greater than zero");
            }
            if let Some(base_url) = &section.base_url {
                if !is_http_url(base_url) {
                    bail!("providers.{name}.base_url '{base_url}' is not an http(s) URL");
                }
            }
        }
        if providers.entrez.tool.trim().is_empty() {
            bail!("providers.entrez.tool must not be empty");
        }

        let rotation = self.logging.file_rotation.as_str();
        if !matches!(rotation, "daily" | "hourly" | "minutely" | "never") {
            bail!("logging.file_rotation '{rotation}' is not one of daily, hourly, minutely, never");
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !url.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.providers.timeout_secs, 30);
        assert_eq!(settings.logging.file_rotation, "daily");
    }

    #[test]
    fn test_overrides_from_environment() {
        let vars: HashMap<&str, &str> = [
            ("PATENTS_VIEW_API_KEY", "pv-key"),
            ("ENTREZ_EMAIL", "ops@example.org"),
            ("ENTREZ_TOOL_NAME", "trial-scout"),
            ("ENTREZ_API_KEY", " "),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        let providers = &settings.providers;
        assert_eq!(providers.patentsview.api_key.as_deref(), Some("pv-key"));
        assert_eq!(providers.entrez.email.as_deref(), Some("ops@example.org"));
        assert_eq!(providers.entrez.tool, "trial-scout");
        assert_eq!(providers.entrez.provider.api_key, None);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.providers.chembl.timeout_secs = Some(0);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("providers.chembl.timeout_secs"));
    }

    #[test]
    fn test_rejects_malformed_base_url() {
        let mut settings = Settings::default();
        settings.providers.openfda.base_url = Some("api.fda.gov".into());
        assert!(settings.validate().is_err());

        settings.providers.openfda.base_url = Some("https://".into());
        assert!(settings.validate().is_err());

        settings.providers.openfda.base_url = Some("http://localhost:8080".into());
        settings.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("pharmaquery-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(
            &path,
            r#"
[logging]
json = true

[providers]
timeout_secs = 10

[providers.openfda]
api_key = "fda-key"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert!(settings.logging.json);
        assert_eq!(settings.providers.timeout_secs, 10);
        assert_eq!(settings.providers.openfda.api_key.as_deref(), Some("fda-key"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
