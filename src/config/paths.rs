//! Config file discovery

use std::path::{Path, PathBuf};

/// File names tried in the config directory, in order
const CONFIG_FILE_NAMES: [&str; 3] = ["config.json", "config.json5", "config.toml"];

/// Directory holding the config file
///
/// `SEARCHAGENT_CONFIG_DIR`, else `<XDG config>/searchagent`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SEARCHAGENT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|d| d.join("searchagent"))
        .unwrap_or_else(|| PathBuf::from(".searchagent"))
}

/// Config file to load
///
/// `SEARCHAGENT_CONFIG` wins; otherwise the first existing file of
/// [`CONFIG_FILE_NAMES`] in [`config_dir`], defaulting to `config.json`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SEARCHAGENT_CONFIG") {
        return PathBuf::from(path);
    }

    find_config_in(&config_dir())
}

fn find_config_in(dir: &Path) -> PathBuf {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| dir.join(CONFIG_FILE_NAMES[0]))
}
