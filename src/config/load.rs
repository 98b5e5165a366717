use super::{default_global_config_path, default_state_root, ConfigError, Settings};
use std::path::Path;

/// Loads settings from `path`, or from the global config path when none is given.
/// A missing global file yields defaults rooted at `$HOME/.archivist`.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let settings = match path {
        Some(path) => Settings::from_path(path)?,
        None => {
            let global = default_global_config_path()?;
            if global.is_file() {
                Settings::from_path(&global)?
            } else {
                Settings::with_state_root(default_state_root()?)
            }
        }
    };
    settings.validate()?;
    Ok(settings)
}
