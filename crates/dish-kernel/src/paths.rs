//! XDG Base Directory paths for dish.
//!
//! | Purpose | XDG Variable | dish path |
//! |---------|--------------|-----------|
//! | Runtime | `$XDG_RUNTIME_DIR` | control FIFOs, pipeline FIFOs |
//! | Config | `$XDG_CONFIG_HOME` | `config.toml` |
//!
//! The runtime directory falls back to the system temp directory when
//! `$XDG_RUNTIME_DIR` is not set.

use std::path::PathBuf;

use directories::BaseDirs;

/// Get the user's home directory.
///
/// Returns `$HOME` or falls back to `/tmp` if not set.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Get XDG config home directory.
///
/// Returns `$XDG_CONFIG_HOME` or falls back to `~/.config`.
pub fn xdg_config_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".config"))
}

/// Get XDG runtime directory.
///
/// Returns `$XDG_RUNTIME_DIR` or falls back to system temp directory.
pub fn xdg_runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

// ═══════════════════════════════════════════════════════════════════════════
// dish-Specific Paths
// ═══════════════════════════════════════════════════════════════════════════

/// `$XDG_RUNTIME_DIR/dish`
pub fn runtime_dir() -> PathBuf {
    xdg_runtime_dir().join("dish")
}

/// `$XDG_CONFIG_HOME/dish`
pub fn config_dir() -> PathBuf {
    xdg_config_home().join("dish")
}

/// FIFO the daemon reads requests from.
pub fn request_fifo() -> PathBuf {
    runtime_dir().join("input.fifo")
}

/// FIFO the daemon writes responses to.
pub fn response_fifo() -> PathBuf {
    runtime_dir().join("output.fifo")
}

/// Directory for the named pipes that materialize ephemeral edges.
pub fn fifo_dir() -> PathBuf {
    runtime_dir().join("fifos")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_runtime_dir_is_absolute() {
        assert!(xdg_runtime_dir().is_absolute());
    }

    #[test]
    fn dish_paths_build_on_xdg_primitives() {
        assert_eq!(runtime_dir(), xdg_runtime_dir().join("dish"));
        assert_eq!(config_dir(), xdg_config_home().join("dish"));
    }

    #[test]
    fn control_fifos_live_in_runtime_dir() {
        assert!(request_fifo().starts_with(runtime_dir()));
        assert!(response_fifo().starts_with(runtime_dir()));
        assert_ne!(request_fifo(), response_fifo());
        assert!(fifo_dir().ends_with("fifos"));
    }
}
