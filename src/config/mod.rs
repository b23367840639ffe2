//! On-disk config loading (§6): `multiplierConfig.json` (read-only at
//! startup) and `gameCountdownConfig.json` (read at startup, debounced
//! writes thereafter).

use std::path::Path;

use crate::error::CrashCoreError;
use crate::multiplier::MultiplierConfig;
use crate::orchestrator::CountdownConfig;

/// Loads and validates `multiplierConfig.json`. A missing file is not an
/// error here — callers fall back to `MultiplierGenerator::fallback()`
/// (§4.A); a present-but-invalid file is `Fatal` (§7).
pub fn load_multiplier_config(path: &Path) -> Result<Option<MultiplierConfig>, CrashCoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CrashCoreError::fatal(format!("reading {}: {e}", path.display())))?;
    let config: MultiplierConfig = serde_json::from_str(&contents)
        .map_err(|e| CrashCoreError::fatal(format!("parsing {}: {e}", path.display())))?;
    config.validate()?;
    Ok(Some(config))
}

/// Loads `gameCountdownConfig.json`, or the documented defaults if absent.
pub fn load_countdown_config(path: &Path) -> Result<CountdownConfig, CrashCoreError> {
    if !path.exists() {
        return Ok(CountdownConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CrashCoreError::fatal(format!("reading {}: {e}", path.display())))?;
    let config: CountdownConfig = serde_json::from_str(&contents)
        .map_err(|e| CrashCoreError::fatal(format!("parsing {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Synchronous write used both by the debounce task and by the final
/// shutdown flush (§9: "on shutdown, do a synchronous final write").
pub fn save_countdown_config(path: &Path, config: &CountdownConfig) -> Result<(), CrashCoreError> {
    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| CrashCoreError::fatal(format!("serializing countdown config: {e}")))?;
    std::fs::write(path, contents)
        .map_err(|e| CrashCoreError::fatal(format!("writing {}: {e}", path.display())))?;
    Ok(())
}
