//! Configuration loading and environment parsing.

use super::validation::validate_config_security;
use super::Config;
use serde_json::Value;
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const ENV_CONFIG_PATH: &str = "CHAT_GATEWAY_CONFIG_PATH";
const ENV_CONFIG_STDIN: &str = "CHAT_GATEWAY_CONFIG_STDIN";
const ENV_CONFIG_JSON: &str = "CHAT_GATEWAY_CONFIG_JSON";
const ENV_OVERRIDE_PREFIX: &str = "CHAT_GATEWAY__";

/// Build the gateway configuration from layered JSON documents.
///
/// Later layers win key by key: compiled defaults, `config.json` next to the
/// executable, `config.json` in the working directory, the file named by
/// `CHAT_GATEWAY_CONFIG_PATH`, stdin when `CHAT_GATEWAY_CONFIG_STDIN` is
/// truthy, inline `CHAT_GATEWAY_CONFIG_JSON`, and finally single fields such
/// as `CHAT_GATEWAY__RATE_LIMIT__DEFAULT_TIER=pro`.
///
/// Unreadable layers are reported on stderr and skipped. Validation problems
/// are reported but not returned; `main` validates again and refuses to start.
#[must_use]
pub fn load() -> Config {
    let defaults = Config::default();
    let mut merged =
        serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    for layer in config_layers() {
        merge_values(&mut merged, layer);
    }
    apply_env_overrides(&mut merged);

    let config = serde_json::from_value::<Config>(merged).unwrap_or_else(|err| {
        eprintln!("Failed to deserialize config; using defaults: {err}");
        defaults
    });

    if let Err(err) = validate_config_security(&config) {
        eprintln!("Configuration validation error: {err}");
    }
    config
}

/// JSON documents to merge over the defaults, lowest precedence first.
fn config_layers() -> Vec<Value> {
    let mut files = Vec::new();
    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(PathBuf::from)) {
        files.push(dir.join("config.json"));
    }
    files.push(PathBuf::from("config.json"));
    if let Ok(path) = env::var(ENV_CONFIG_PATH) {
        files.push(PathBuf::from(path));
    }

    let mut layers: Vec<Value> = files
        .iter()
        .map(PathBuf::as_path)
        .filter_map(read_config_file)
        .collect();

    if env::var(ENV_CONFIG_STDIN).is_ok_and(|flag| env_var_truthy(&flag)) {
        let mut buf = String::new();
        match std::io::stdin().read_to_string(&mut buf) {
            Ok(_) => layers.extend(parse_json_document(&buf, "stdin")),
            Err(err) => eprintln!("Failed to read config from stdin: {err}"),
        }
    }
    if let Ok(json) = env::var(ENV_CONFIG_JSON) {
        layers.extend(parse_json_document(&json, ENV_CONFIG_JSON));
    }
    layers
}

fn read_config_file(path: &Path) -> Option<Value> {
    if !path.is_file() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(contents) => parse_json_document(&contents, &path.display().to_string()),
        Err(err) => {
            eprintln!("Failed to read config from {}: {err}", path.display());
            None
        }
    }
}

fn parse_json_document(raw: &str, source: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(raw)
        .map_err(|err| eprintln!("Failed to parse config from {source}: {err}"))
        .ok()
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target_slot, source_value) => {
            *target_slot = source_value;
        }
    }
}

fn apply_env_overrides(root: &mut Value) {
    for (key, raw_value) in env::vars() {
        let Some(stripped) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };

        let segments: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();

        if segments.is_empty() {
            continue;
        }

        let value = parse_env_value(&raw_value);
        set_nested_value(root, &segments, value);
    }
}

fn env_var_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.contains(',') {
        let items = trimmed
            .split(',')
            .map(|segment| parse_scalar(segment.trim()))
            .collect::<Vec<_>>();
        return Value::Array(items);
    }

    parse_scalar(trimmed)
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_nested_value(target: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }

    let entry = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_nested_value(entry, rest, value);
}
