//! System configuration parsing.
//!
//! ```kdl
//! server listen="0.0.0.0:3000" public-url="https://ci.example.com"
//! database url="postgres://batchci@localhost/batchci"
//! source url="https://github.com/example/project" branch="master"
//! batch account="ci" key="..." endpoint="https://ci.westus2.batch.azure.com"
//! storage account="cistore" key="..."
//! automation sp-name="..." sp-password="..." sp-tenant="..."
//! test {
//!     output-trim head=58 tail=3
//! }
//! operator token="..."
//! ```

use crate::{ConfigError, ConfigResult};
use batchci_core::secret::Secret;
use batchci_core::test_case::OutputTrim;
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BATCHCI_";

const SECTIONS: &[&str] = &[
    "server",
    "database",
    "source",
    "batch",
    "storage",
    "automation",
    "build",
    "test",
    "operator",
];

/// System-wide configuration.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub batch: BatchConfig,
    pub storage: StorageConfig,
    /// Service principal for live test runs. Only required when one is requested.
    pub automation: Option<AutomationConfig>,
    pub build: BuildConfig,
    pub test: TestConfig,
    pub operator: OperatorConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    /// Externally reachable base URL; remote tasks call back to it.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Repository URL, e.g. `https://github.com/owner/repo`.
    pub url: String,
    pub branch: String,
    pub token: Option<Secret>,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub account: String,
    pub key: Secret,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub account: String,
    pub key: Secret,
    pub endpoint_suffix: String,
}

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub sp_name: String,
    pub sp_password: Secret,
    pub sp_tenant: String,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub script: String,
    /// Glob of build outputs, relative to the checkout.
    pub artifact_pattern: String,
    /// Name of the downloadable archive, with `{sha}` substituted.
    pub artifact_blob: String,
}

#[derive(Debug, Clone)]
pub struct TestConfig {
    pub install_script: String,
    pub scheduler_script: String,
    pub output_trim: OutputTrim,
}

#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    /// Bearer token for authenticated routes. When unset every
    /// authenticated route is rejected.
    pub token: Option<Secret>,
}

impl SystemConfig {
    /// Read a config file and apply overrides from the process environment.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Self::from_sources(Some(&text), std::env::vars())
    }

    /// Build configuration from optional KDL text and environment pairs.
    pub fn from_sources<I>(kdl: Option<&str>, env: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw = match kdl {
            Some(text) => RawConfig::parse(text)?,
            None => RawConfig::default(),
        };
        raw.apply_env(env);
        Self::from_raw(&raw)
    }

    fn from_raw(raw: &RawConfig) -> ConfigResult<Self> {
        let automation = match (
            raw.get("automation", "sp-name"),
            raw.get("automation", "sp-password"),
            raw.get("automation", "sp-tenant"),
        ) {
            (None, None, None) => None,
            (Some(name), Some(password), Some(tenant)) => Some(AutomationConfig {
                sp_name: name.to_string(),
                sp_password: Secret::new(password),
                sp_tenant: tenant.to_string(),
            }),
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "automation".to_string(),
                    message: "sp-name, sp-password and sp-tenant must be set together".to_string(),
                });
            }
        };

        let defaults = OutputTrim::default();

        Ok(Self {
            server: ServerConfig {
                listen: raw.get_or("server", "listen", "0.0.0.0:3000"),
                public_url: raw
                    .require("server", "public-url")?
                    .trim_end_matches('/')
                    .to_string(),
            },
            database: DatabaseConfig {
                url: Secret::new(raw.require("database", "url")?),
                max_connections: raw.parse_or("database", "max-connections", 10)?,
            },
            source: SourceConfig {
                url: raw.require("source", "url")?.trim_end_matches('/').to_string(),
                branch: raw.get_or("source", "branch", "master"),
                token: raw.get("source", "token").map(Secret::new),
            },
            batch: BatchConfig {
                account: raw.require("batch", "account")?.to_string(),
                key: Secret::new(raw.require("batch", "key")?),
                endpoint: raw
                    .require("batch", "endpoint")?
                    .trim_end_matches('/')
                    .to_string(),
            },
            storage: StorageConfig {
                account: raw.require("storage", "account")?.to_string(),
                key: Secret::new(raw.require("storage", "key")?),
                endpoint_suffix: raw.get_or("storage", "endpoint-suffix", "core.windows.net"),
            },
            automation,
            build: BuildConfig {
                script: raw.get_or("build", "script", "./scripts/batch/build_all.sh"),
                artifact_pattern: raw.get_or("build", "artifact-pattern", "artifacts/**/*.*"),
                artifact_blob: raw.get_or("build", "artifact-blob", "azure-cli-{sha}.tar"),
            },
            test: TestConfig {
                install_script: raw.get_or("test", "install-script", "./app/install.sh"),
                scheduler_script: raw.get_or(
                    "test",
                    "scheduler-script",
                    "$AZ_BATCH_NODE_SHARED_DIR/app/schedule.sh",
                ),
                output_trim: OutputTrim {
                    head: raw.parse_or("test", "output-trim-head", defaults.head)?,
                    tail: raw.parse_or("test", "output-trim-tail", defaults.tail)?,
                },
            },
            operator: OperatorConfig {
                token: raw.get("operator", "token").map(Secret::new),
            },
        })
    }
}

/// Flattened `(section, field)` string values before typing.
#[derive(Debug, Default)]
struct RawConfig {
    values: BTreeMap<(String, String), String>,
}

impl RawConfig {
    fn parse(text: &str) -> ConfigResult<Self> {
        let doc: KdlDocument = text.parse()?;
        let mut raw = Self::default();

        for node in doc.nodes() {
            let section = node.name().value();
            if !SECTIONS.contains(&section) {
                continue; // Ignore unknown nodes
            }
            raw.collect_props(section, "", node);
            if let Some(children) = node.children() {
                for child in children.nodes() {
                    let prefix = format!("{}-", child.name().value());
                    raw.collect_props(section, &prefix, child);
                }
            }
        }

        Ok(raw)
    }

    fn collect_props(&mut self, section: &str, prefix: &str, node: &KdlNode) {
        for entry in node.entries() {
            let Some(name) = entry.name() else {
                continue;
            };
            if let Some(value) = value_text(entry.value()) {
                self.values.insert(
                    (section.to_string(), format!("{prefix}{}", name.value())),
                    value,
                );
            }
        }
    }

    /// `BATCHCI_TEST_OUTPUT_TRIM_HEAD` overrides `test` / `output-trim-head`.
    fn apply_env<I>(&mut self, env: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in env {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, field)) = rest.split_once('_') else {
                continue;
            };
            let section = section.to_ascii_lowercase();
            if !SECTIONS.contains(&section.as_str()) {
                continue;
            }
            let field = field.to_ascii_lowercase().replace('_', "-");
            tracing::debug!(section = %section, field = %field, "Applying environment override");
            self.values.insert((section, field), value);
        }
    }

    fn get(&self, section: &str, field: &str) -> Option<&str> {
        self.values
            .get(&(section.to_string(), field.to_string()))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, section: &str, field: &str, default: &str) -> String {
        self.get(section, field).unwrap_or(default).to_string()
    }

    fn require(&self, section: &str, field: &str) -> ConfigResult<&str> {
        self.get(section, field)
            .ok_or_else(|| ConfigError::MissingField(format!("{section} {field}")))
    }

    fn parse_or<T: std::str::FromStr>(&self, section: &str, field: &str, default: T) -> ConfigResult<T> {
        match self.get(section, field) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{section} {field}"),
                message: format!("expected a non-negative integer, got '{value}'"),
            }),
        }
    }
}

fn value_text(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s.to_string());
    }
    if let Some(i) = value.as_integer() {
        return Some(i.to_string());
    }
    value.as_bool().map(|b| b.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        server public-url="https://ci.example.com/"
        database url="postgres://localhost/batchci"
        source url="https://github.com/example/project"
        batch account="ci" key="batchkey" endpoint="https://ci.westus2.batch.azure.com"
        storage account="cistore" key="storagekey"
    "#;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_parse_minimal_config_applies_defaults() {
        let config = SystemConfig::from_sources(Some(MINIMAL), no_env()).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert_eq!(config.server.public_url, "https://ci.example.com");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.source.branch, "master");
        assert!(config.source.token.is_none());
        assert_eq!(config.batch.key.expose(), "batchkey");
        assert_eq!(config.storage.endpoint_suffix, "core.windows.net");
        assert!(config.automation.is_none());
        assert_eq!(config.build.script, "./scripts/batch/build_all.sh");
        assert_eq!(config.build.artifact_blob, "azure-cli-{sha}.tar");
        assert_eq!(config.test.install_script, "./app/install.sh");
        assert_eq!(config.test.output_trim, OutputTrim { head: 58, tail: 3 });
        assert!(config.operator.token.is_none());
    }

    #[test]
    fn test_parse_nested_output_trim() {
        let kdl = format!(
            "{MINIMAL}\ntest install-script=\"./install.sh\" {{\n    output-trim head=10 tail=0\n}}\n"
        );
        let config = SystemConfig::from_sources(Some(&kdl), no_env()).unwrap();
        assert_eq!(config.test.install_script, "./install.sh");
        assert_eq!(config.test.output_trim, OutputTrim { head: 10, tail: 0 });
    }

    #[test]
    fn test_missing_required_field() {
        let result = SystemConfig::from_sources(Some("server public-url=\"https://x\""), no_env());
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(f) if f == "database url"));
    }

    #[test]
    fn test_env_overrides_file() {
        let env = vec![
            ("BATCHCI_BATCH_KEY".to_string(), "fromenv".to_string()),
            ("BATCHCI_TEST_OUTPUT_TRIM_HEAD".to_string(), "5".to_string()),
            ("BATCHCI_OPERATOR_TOKEN".to_string(), "op".to_string()),
            ("BATCHCI_CONFIG".to_string(), "/etc/batchci.kdl".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = SystemConfig::from_sources(Some(MINIMAL), env).unwrap();
        assert_eq!(config.batch.key.expose(), "fromenv");
        assert_eq!(config.test.output_trim.head, 5);
        assert_eq!(config.operator.token.unwrap().expose(), "op");
    }

    #[test]
    fn test_env_only_configuration() {
        let env = [
            ("BATCHCI_SERVER_PUBLIC_URL", "https://ci"),
            ("BATCHCI_DATABASE_URL", "postgres://db"),
            ("BATCHCI_SOURCE_URL", "https://github.com/o/r"),
            ("BATCHCI_BATCH_ACCOUNT", "a"),
            ("BATCHCI_BATCH_KEY", "k"),
            ("BATCHCI_BATCH_ENDPOINT", "https://a.batch"),
            ("BATCHCI_STORAGE_ACCOUNT", "s"),
            ("BATCHCI_STORAGE_KEY", "k"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()));
        let config = SystemConfig::from_sources(None, env).unwrap();
        assert_eq!(config.source.url, "https://github.com/o/r");
    }

    #[test]
    fn test_partial_automation_is_rejected() {
        let kdl = format!("{MINIMAL}\nautomation sp-name=\"sp\"\n");
        let result = SystemConfig::from_sources(Some(&kdl), no_env());
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_full_automation() {
        let kdl = format!("{MINIMAL}\nautomation sp-name=\"sp\" sp-password=\"pw\" sp-tenant=\"t\"\n");
        let config = SystemConfig::from_sources(Some(&kdl), no_env()).unwrap();
        let automation = config.automation.unwrap();
        assert_eq!(automation.sp_name, "sp");
        assert_eq!(automation.sp_password.expose(), "pw");
        assert_eq!(format!("{:?}", automation.sp_password), "Secret(***)");
    }

    #[test]
    fn test_invalid_integer() {
        let env = vec![("BATCHCI_DATABASE_MAX_CONNECTIONS".to_string(), "lots".to_string())];
        let result = SystemConfig::from_sources(Some(MINIMAL), env);
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidValue { .. }));
    }
}
