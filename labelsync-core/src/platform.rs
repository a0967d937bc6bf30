//! Platform-specific default locations

use std::path::PathBuf;

/// Get the platform-specific data directory for label sync state
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\LabelSync
/// - macOS: ~/Library/Application Support/LabelSync
/// - Linux/Other: ~/.local/share/LabelSync
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("LabelSync")
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("LabelSync")
}

/// Default path of the wallet store used by the CLI
pub fn get_default_wallet_path() -> PathBuf {
    get_data_dir().join("wallet.db")
}

/// Default path of the sync configuration file
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("labelsync.toml")
}

/// Create the data directory if needed
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_app_dirs() {
        assert!(get_default_wallet_path().starts_with(get_data_dir()));
        assert!(get_default_config_path().starts_with(get_config_dir()));
        assert_eq!(
            get_default_config_path().file_name().unwrap(),
            "labelsync.toml"
        );
    }
}
