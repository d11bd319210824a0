use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "labrecon";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of a user-supplied reference catalog.
pub const CATALOG_FILE_NAME: &str = "lab_catalog.json";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "labrecon=info,warn"
}

/// Per-user configuration directory (`~/.config/labrecon` on Linux).
/// `None` when the platform has no notion of one.
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Location of a reference catalog that replaces the bundled one.
pub fn catalog_override_path() -> Option<PathBuf> {
    app_config_dir().map(|dir| dir.join(CATALOG_FILE_NAME))
}
