//! Configuration of the protection rules, read from the system-wide Git configuration.
//!
//! # Configuration Keys
//! - `user.email`: the deployer identity
//! - `protect.deployerEmail`: the deployer identity, overriding `user.email`
//! - `protect.masterBranch`: the protected master branch
//! - `protect.releaseBranchPrefix`: namespace of release branches
//! - `protect.releaseTagPrefix`: namespace of release tags

use std::path::{Path, PathBuf};

pub mod policy;

pub use policy::PolicyConfig;

use crate::Error;

/// Result type for configuration parsing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The location of the system configuration file, honoring `GIT_CONFIG_SYSTEM`.
pub fn system_config_path() -> Option<PathBuf> {
    gix_config::Source::System
        .storage_location(&mut |name| std::env::var_os(name))
        .map(|path| path.into_owned())
}

/// Read the configuration file at `path` without following includes.
pub fn open(path: &Path) -> Result<gix_config::File<'static>> {
    gix_config::File::from_path_no_includes(path.to_owned(), gix_config::Source::System)
        .map_err(|e| Error::Config(format!("could not read '{}': {e}", path.display())))
}

/// Load the policy from the configuration file at `path`, or from the system configuration.
///
/// A configuration file that can't be read leaves the defaults in place, which means there is
/// no deployer identity. Invalid values are errors.
pub fn load_policy_config(path: Option<&Path>) -> Result<PolicyConfig> {
    let path = match path {
        Some(path) => path.to_owned(),
        None => match system_config_path() {
            Some(path) => path,
            None => {
                tracing::warn!("no system configuration available, using defaults");
                return Ok(PolicyConfig::new());
            }
        },
    };
    match open(&path) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded configuration");
            PolicyConfig::from_config(&config)
        }
        Err(err) => {
            tracing::warn!(%err, "using default configuration");
            Ok(PolicyConfig::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_config_yields_defaults() {
        let policy_config = load_policy_config(Some(Path::new("/does/not/exist/gitconfig"))).unwrap();
        assert_eq!(policy_config, PolicyConfig::new());
    }

    #[test]
    fn open_reports_path() {
        let err = open(Path::new("/does/not/exist/gitconfig")).unwrap_err();
        assert!(err.to_string().contains("/does/not/exist/gitconfig"));
    }
}
