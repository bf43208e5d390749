use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::{ConfigError, RelayConfig};

/// Reads `path` as a relay config, falling back to defaults when the file is
/// missing. The flag reports whether the file existed. Either way the config
/// comes back normalized and validated.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<(RelayConfig, bool), ConfigError> {
    let (mut config, exists) = match fs::read_to_string(path.as_ref()) {
        Ok(raw) => {
            let parsed = toml::from_str::<RelayConfig>(&raw).map_err(ConfigError::Parse)?;
            (parsed, true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => (RelayConfig::default(), false),
        Err(err) => return Err(ConfigError::Read(err)),
    };
    config.normalize();
    config.validate()?;
    Ok((config, exists))
}
