//! Where the configuration directory lives

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the configuration directory
pub const ENV_CONFIG_DIR: &str = "PMOPLAYDAR_CONFIG";

/// Directory name used in the working directory and in `$HOME`
pub const DEFAULT_CONFIG_DIR: &str = ".pmoplaydar";

/// Pick the configuration directory
///
/// First match wins: `explicit` when non-empty, `$PMOPLAYDAR_CONFIG`,
/// `./.pmoplaydar` if it exists, `~/.pmoplaydar` if it exists. Without any
/// match the relative `.pmoplaydar` is used and will be created.
pub fn locate(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return PathBuf::from(explicit);
    }

    if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
        debug!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory from environment");
        return PathBuf::from(from_env);
    }

    let local = PathBuf::from(DEFAULT_CONFIG_DIR);
    if local.exists() {
        return local;
    }

    dirs::home_dir()
        .map(|home| home.join(DEFAULT_CONFIG_DIR))
        .filter(|candidate| candidate.exists())
        .unwrap_or(local)
}

/// Create the directory if needed and check it is writable
pub fn prepare(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create config directory {}", dir.display()))?;
    }
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let probe = dir.join(".write_test");
    fs::write(&probe, b"ok")
        .with_context(|| format!("config directory {} is not writable", dir.display()))?;
    fs::remove_file(&probe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_directory_wins() {
        assert_eq!(locate("/tmp/somewhere"), PathBuf::from("/tmp/somewhere"));
    }

    #[test]
    fn test_prepare_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        prepare(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(".write_test").exists());
    }

    #[test]
    fn test_prepare_rejects_files() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(prepare(&file).is_err());
    }
}
