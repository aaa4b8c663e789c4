//! Command line arguments and their translation into host types

use crate::tracing_support::{TracingConfig, TracingFormat};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hotmod_host::{ManagerConfig, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "hotmod", version, about = "Run and call hot-reloaded native modules")]
pub struct Cli {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// How log records are written to stderr
#[derive(Debug, Args)]
pub struct LogArgs {
    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true)]
    pub log_format: TracingFormat,

    /// Log level; overrides RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    /// Omit timestamps from log records
    #[arg(long, global = true)]
    pub no_log_timestamps: bool,

    /// Include the emitting module path in log records
    #[arg(long, global = true)]
    pub log_target: bool,

    /// Include thread ids in log records
    #[arg(long, global = true)]
    pub log_thread_ids: bool,
}

impl LogArgs {
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            level: self.log_level,
            format: self.log_format,
            timestamps: !self.no_log_timestamps,
            target: self.log_target,
            thread_ids: self.log_thread_ids,
        }
    }
}

/// Where modules come from
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Directory of modules to load and watch
    #[arg(long, env = "HOTMOD_DIR", global = true)]
    pub dir: Option<PathBuf>,

    /// File name suffix of modules
    #[arg(long, global = true)]
    pub suffix: Option<String>,

    /// Quiet period before acting on file changes
    #[arg(long, global = true)]
    pub debounce_ms: Option<u64>,

    /// JSON configuration file; flags override its values
    #[arg(long, env = "HOTMOD_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load every module and print lifecycle events until interrupted
    Watch,

    /// Load the modules, call one function and print its results
    Call {
        /// Module name
        module: String,

        /// Function name
        function: String,

        /// Arguments as JSON; anything else is passed as a string
        args: Vec<String>,

        /// Call this exact version instead of the latest
        #[arg(long, value_parser = parse_version)]
        module_version: Option<u64>,

        /// Print the result vector as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Default module directory under the platform data directory
pub fn default_module_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hotmod")
        .join("modules")
}

impl SourceArgs {
    /// Merge the config file (if any) with flags; flags win
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let mut config = match &self.config {
            Some(path) => ManagerConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ManagerConfig::new(default_module_dir()),
        };

        if let Some(dir) = &self.dir {
            config.root = dir.clone();
        }
        if let Some(suffix) = &self.suffix {
            config = config.with_suffix(suffix.clone());
        }
        if let Some(ms) = self.debounce_ms {
            config = config.with_debounce(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

/// Accept decimal or `0x`-prefixed hexadecimal versions
fn parse_version(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid version {:?}: {}", raw, e))
}

/// Parse one command line argument into a value
///
/// JSON literals map onto the matching variant; integers become `Int`
/// unless they only fit `UInt`. A trailing `u` (`42u`) forces `UInt`.
/// Anything that is not JSON is taken as a plain string.
pub fn parse_arg(raw: &str) -> Value {
    if let Some(unsigned) = raw.strip_suffix('u').and_then(|n| n.parse::<u64>().ok()) {
        return Value::UInt(unsigned);
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => from_json(json),
        Err(_) => Value::Str(raw.to_string()),
    }
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Render a value as JSON for printing
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::UInt(u) => (*u).into(),
        Value::Float(f) => (*f).into(),
        Value::Str(s) => s.clone().into(),
        Value::Bytes(bytes) => bytes.clone().into(),
        Value::List(items) => items.iter().map(to_json).collect(),
        Value::Map(fields) => fields
            .iter()
            .map(|(k, v)| (k.clone(), to_json(v)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
        Value::Error(e) => serde_json::json!({
            "error": { "kind": e.kind.to_string(), "message": e.message }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("42"), Value::Int(42));
        assert_eq!(parse_arg("-1"), Value::Int(-1));
        assert_eq!(parse_arg("42u"), Value::UInt(42));
        assert_eq!(parse_arg("18446744073709551615"), Value::UInt(u64::MAX));
        assert_eq!(parse_arg("1.5"), Value::Float(1.5));
        assert_eq!(parse_arg("true"), Value::Bool(true));
        assert_eq!(parse_arg("null"), Value::Nil);
        assert_eq!(parse_arg("\"quoted\""), Value::Str("quoted".into()));
        assert_eq!(parse_arg("world"), Value::Str("world".into()));
        assert_eq!(
            parse_arg("[1, \"a\"]"),
            Value::List(vec![Value::Int(1), Value::Str("a".into())])
        );
    }

    #[test]
    fn test_to_json_error_slot() {
        let error = hotmod_host::CallError::new(hotmod_host::ErrorKind::NotFound, "gone");
        let json = to_json(&Value::Error(error));
        assert_eq!(json["error"]["kind"], "NotFound");
        assert_eq!(json["error"]["message"], "gone");
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("7"), Ok(7));
        assert_eq!(parse_version("0x00010000"), Ok(0x0001_0000));
        assert!(parse_version("v1").is_err());
    }

    #[test]
    fn test_call_command() {
        let cli = Cli::try_parse_from([
            "hotmod",
            "call",
            "testplugin",
            "test",
            "world",
            "--module-version",
            "0x10000",
            "--dir",
            "/srv/modules",
        ])
        .unwrap();

        match cli.command {
            Command::Call {
                module,
                function,
                args,
                module_version,
                json,
            } => {
                assert_eq!(module, "testplugin");
                assert_eq!(function, "test");
                assert_eq!(args, vec!["world".to_string()]);
                assert_eq!(module_version, Some(0x10000));
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.source.dir, Some(PathBuf::from("/srv/modules")));
    }

    #[test]
    fn test_log_flags() {
        let cli = Cli::try_parse_from(["hotmod", "watch"]).unwrap();
        let config = cli.log.tracing_config();
        assert_eq!(config.level, None);
        assert_eq!(config.format, TracingFormat::Compact);
        assert!(config.timestamps);

        let cli = Cli::try_parse_from([
            "hotmod",
            "watch",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--no-log-timestamps",
            "--log-target",
            "--log-thread-ids",
        ])
        .unwrap();
        let config = cli.log.tracing_config();
        assert_eq!(config.level, Some(tracing::Level::DEBUG));
        assert_eq!(config.format, TracingFormat::Json);
        assert!(!config.timestamps);
        assert!(config.target);
        assert!(config.thread_ids);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hotmod.json");
        std::fs::write(&path, r#"{ "root": "/from/file", "suffix": ".mod" }"#).unwrap();

        let source = SourceArgs {
            dir: None,
            suffix: None,
            debounce_ms: Some(10),
            config: Some(path),
        };
        let config = source.manager_config().unwrap();
        assert_eq!(config.root, PathBuf::from("/from/file"));
        assert_eq!(config.suffix, ".mod");
        assert_eq!(config.debounce_ms, 10);

        let source = SourceArgs {
            dir: Some(PathBuf::from("/from/flag")),
            ..source
        };
        assert_eq!(source.manager_config().unwrap().root, PathBuf::from("/from/flag"));
    }

    #[test]
    fn test_default_root() {
        let source = SourceArgs {
            dir: None,
            suffix: None,
            debounce_ms: None,
            config: None,
        };
        let config = source.manager_config().unwrap();
        assert!(config.root.ends_with("hotmod/modules"));
    }
}
