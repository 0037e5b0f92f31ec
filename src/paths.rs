//! Filesystem root resolution.
//!
//! The launcher works against five native roots: system config, user config,
//! shares, installed games and logs. Each root is resolved with the same
//! precedence: explicit environment override, platform-derived default,
//! compile-time default. Overrides are tilde- and variable-expanded so
//! `DELAUNCHER_GAMES=~/games` behaves as expected.

use std::env;
use std::path::PathBuf;

use log::debug;

/// Environment override names.
pub const ENV_SYS_CONFIG: &str = "DELAUNCHER_SYS_CONFIG";
pub const ENV_USER_CONFIG: &str = "DELAUNCHER_USER_CONFIG";
pub const ENV_SHARES: &str = "DELAUNCHER_SHARES";
pub const ENV_GAMES: &str = "DELAUNCHER_GAMES";
pub const ENV_LOGS: &str = "DELAUNCHER_LOGS";

/// Compile-time fallbacks.
const DEFAULT_SYS_CONFIG: &str = "/etc/delga-launcher";
const DEFAULT_SHARES: &str = "/usr/share/delga-launcher";
const DEFAULT_GAMES: &str = "/opt/delga-launcher/games";

/// Resolved native roots used to compose the launcher VFS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPaths {
    pub config_system: PathBuf,
    pub config_user: PathBuf,
    pub shares: PathBuf,
    pub games: PathBuf,
    pub logs: PathBuf,
}

impl LauncherPaths {
    /// Resolve all roots from the process environment.
    pub fn resolve() -> Self {
        Self::resolve_with(|name| env::var(name).ok())
    }

    /// Resolve all roots with an injected environment lookup.
    ///
    /// Tests pass a closure over a fixed map instead of mutating the process
    /// environment.
    pub fn resolve_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_system =
            resolve_root(&lookup, ENV_SYS_CONFIG, || PathBuf::from(DEFAULT_SYS_CONFIG));
        let config_user = resolve_root(&lookup, ENV_USER_CONFIG, || derive_user_config(&lookup));
        let shares = resolve_root(&lookup, ENV_SHARES, || PathBuf::from(DEFAULT_SHARES));
        let games = resolve_root(&lookup, ENV_GAMES, || PathBuf::from(DEFAULT_GAMES));
        let logs = resolve_root(&lookup, ENV_LOGS, || config_user.join("logs"));

        let paths = LauncherPaths {
            config_system,
            config_user,
            shares,
            games,
            logs,
        };
        debug!("Resolved launcher paths: {:?}", paths);
        paths
    }

    /// Native directory holding per-game state
    /// (`<user_config>/games/<uuid-hex>`).
    pub fn game_state_dir(&self, identifier_hex: &str) -> PathBuf {
        self.config_user.join("games").join(identifier_hex)
    }
}

fn resolve_root<F, D>(lookup: &F, env_name: &str, derive: D) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
    D: FnOnce() -> PathBuf,
{
    if let Some(value) = lookup(env_name) {
        if !value.is_empty() {
            let expanded = shellexpand::full(&value)
                .map(|cow| cow.into_owned())
                .unwrap_or(value);
            return PathBuf::from(expanded);
        }
    }
    derive()
}

/// Derive the user config directory.
///
/// Prefers the platform config directory. Falls back to the classic
/// `HOME`/`USER`/`LOGUSER` derivation so the launcher still finds its state
/// in stripped-down environments.
fn derive_user_config<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = dirs::config_dir() {
        return dir.join("delga-launcher");
    }

    if let Some(home) = lookup("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".config").join("delga-launcher");
    }
    for name in ["USER", "LOGUSER"] {
        if let Some(user) = lookup(name).filter(|v| !v.is_empty()) {
            return PathBuf::from("/home")
                .join(user)
                .join(".config")
                .join("delga-launcher");
        }
    }

    // last resort: relative to the working directory
    PathBuf::from(".delga-launcher")
}
