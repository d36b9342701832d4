//! Host platform utility functions

use std::path::PathBuf;

/// Name of the environment variable pointing at the software root.
pub const SW_ROOT_ENV_VAR: &str = "PLATOON_SW_ROOT";

/// Get the software root directory from the environment.
///
/// The root holds the `params` and `sessions` directories and must be set
/// before any executable is started.
pub fn get_platoon_sw_root() -> Result<PathBuf, std::env::VarError> {
    let root = std::env::var(SW_ROOT_ENV_VAR)?;
    Ok(PathBuf::from(root))
}
