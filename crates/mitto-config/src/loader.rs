// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Config, ConfigError, ConfigResult};

fn read_layer(path: &Path) -> ConfigResult<serde_yaml::Value> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones. `MITTO_DIR`, when set,
/// replaces the XDG state root used for the user-level layer.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/mitto/config.yaml"));
    paths.push(PathBuf::from("/etc/mitto/config.yml"));

    // 2. XDG / home, or MITTO_DIR override
    if let Ok(dir) = std::env::var("MITTO_DIR") {
        let dir = PathBuf::from(dir);
        paths.push(dir.join("config.yaml"));
        paths.push(dir.join("config.yml"));
    } else {
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/mitto/config.yaml"));
            paths.push(home.join(".config/mitto/config.yml"));
        }
        if let Some(cfg) = dirs::config_dir() {
            paths.push(cfg.join("mitto/config.yaml"));
            paths.push(cfg.join("mitto/config.yml"));
        }
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".mitto/config.yaml"));
    paths.push(PathBuf::from(".mitto/config.yml"));
    paths.push(PathBuf::from("mitto.yaml"));
    paths.push(PathBuf::from("mitto.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
///
/// `extra` is an explicit path (e.g. the `--config` CLI flag, or the
/// `MITTO_RC` environment variable resolved by the caller) applied last,
/// so it wins over every layer found by [`config_search_paths`].
pub fn load(extra: Option<&Path>) -> ConfigResult<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_yaml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_yaml(&mut merged, read_layer(p)?);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).map_err(|source| ConfigError::Invalid {
            path: PathBuf::from("<merged configuration>"),
            source,
        })?
    };
    Ok(config)
}

/// Load configuration, honouring `MITTO_RC` as the explicit override path
/// when the caller didn't pass one on the command line.
pub fn load_with_env_override(cli_path: Option<&Path>) -> ConfigResult<Config> {
    let env_path = std::env::var("MITTO_RC").ok().map(PathBuf::from);
    let extra = cli_path.map(Path::to_path_buf).or(env_path);
    load(extra.as_deref())
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}
