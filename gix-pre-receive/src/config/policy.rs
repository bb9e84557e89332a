//! Policy configuration parsing from Git config.

use gix::bstr::ByteSlice;
use gix_config::File;

use crate::policy::PolicySet;
use crate::Error;

/// Configuration loader for the protection rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyConfig {
    policy_set: PolicySet,
}

impl PolicyConfig {
    /// Create a new PolicyConfig with default namespaces and no deployer identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policy configuration from a Git config file.
    ///
    /// This method parses the following configuration keys:
    /// - `user.email`: the deployer identity
    /// - `protect.deployerEmail`: the deployer identity, taking precedence over `user.email`
    /// - `protect.masterBranch`: the protected master branch
    /// - `protect.releaseBranchPrefix`: the namespace of release branches
    /// - `protect.releaseTagPrefix`: the namespace of release tags
    ///
    /// Empty values are the same as unset ones. Namespaces must be full ref names below `refs/`.
    pub fn from_config(config: &File<'static>) -> Result<Self, Error> {
        let mut policy_set = PolicySet::new();

        let deployer = match string(config, "protect.deployerEmail")? {
            Some(email) => Some(email),
            None => string(config, "user.email")?,
        };
        policy_set = policy_set.with_deployer_email(deployer);

        if let Some(name) = ref_name(config, "protect.masterBranch")? {
            policy_set = policy_set.with_master_branch(name);
        }
        if let Some(prefix) = ref_name(config, "protect.releaseBranchPrefix")? {
            policy_set = policy_set.with_release_branch_prefix(prefix);
        }
        if let Some(prefix) = ref_name(config, "protect.releaseTagPrefix")? {
            policy_set = policy_set.with_release_tag_prefix(prefix);
        }

        Ok(Self { policy_set })
    }

    /// Replace the deployer identity, if `email` is set.
    pub fn with_deployer_email(mut self, email: Option<String>) -> Self {
        if let Some(email) = email.filter(|email| !email.trim().is_empty()) {
            self.policy_set = self.policy_set.with_deployer_email(Some(email.trim().to_owned()));
        }
        self
    }

    /// Get the parsed PolicySet.
    pub fn policy_set(&self) -> &PolicySet {
        &self.policy_set
    }

    /// Convert into the PolicySet.
    pub fn into_policy_set(self) -> PolicySet {
        self.policy_set
    }
}

/// Read `key` as trimmed UTF-8 string, with empty values being unset.
fn string(config: &File<'static>, key: &str) -> Result<Option<String>, Error> {
    let Some(value) = config.string(key) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|e| Error::Config(format!("invalid UTF-8 in '{key}': {e}")))?
        .trim();
    Ok((!value.is_empty()).then(|| value.to_owned()))
}

fn ref_name(config: &File<'static>, key: &str) -> Result<Option<String>, Error> {
    match string(config, key)? {
        Some(name) if !name.starts_with("refs/") => Err(Error::Config(format!(
            "invalid value for '{key}': '{name}' must be a full ref name starting with 'refs/'"
        ))),
        name => Ok(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::set::{DEFAULT_MASTER_BRANCH, DEFAULT_RELEASE_BRANCH_PREFIX, DEFAULT_RELEASE_TAG_PREFIX};

    fn config(text: &'static str) -> File<'static> {
        File::try_from(text).unwrap()
    }

    #[test]
    fn empty_config_yields_defaults() {
        let config = File::new(gix_config::file::Metadata::api());
        let policy_config = PolicyConfig::from_config(&config).unwrap();
        let policy_set = policy_config.policy_set();

        assert_eq!(policy_set.deployer_email(), None);
        assert_eq!(policy_set.master_branch(), DEFAULT_MASTER_BRANCH);
        assert_eq!(policy_set.release_branch_prefix(), DEFAULT_RELEASE_BRANCH_PREFIX);
        assert_eq!(policy_set.release_tag_prefix(), DEFAULT_RELEASE_TAG_PREFIX);
        assert_eq!(policy_config, PolicyConfig::new());
    }

    #[test]
    fn deployer_from_user_email() {
        let policy_config = PolicyConfig::from_config(&config("[user]\n\temail = deployer@example.com\n")).unwrap();
        assert_eq!(policy_config.policy_set().deployer_email(), Some("deployer@example.com"));
    }

    #[test]
    fn dedicated_deployer_key_takes_precedence() {
        let policy_config = PolicyConfig::from_config(&config(
            "[user]\n\temail = admin@example.com\n[protect]\n\tdeployerEmail = deployer@example.com\n",
        ))
        .unwrap();
        assert_eq!(policy_config.policy_set().deployer_email(), Some("deployer@example.com"));
    }

    #[test]
    fn empty_values_are_unset() {
        let policy_config = PolicyConfig::from_config(&config(
            "[user]\n\temail = deployer@example.com\n[protect]\n\tdeployerEmail = \"\"\n\tmasterBranch = \"\"\n",
        ))
        .unwrap();
        let policy_set = policy_config.policy_set();
        assert_eq!(policy_set.deployer_email(), Some("deployer@example.com"));
        assert_eq!(policy_set.master_branch(), DEFAULT_MASTER_BRANCH);

        let policy_config = PolicyConfig::from_config(&config("[user]\n\temail = \"  \"\n")).unwrap();
        assert_eq!(policy_config.policy_set().deployer_email(), None);
    }

    #[test]
    fn custom_namespaces() {
        let policy_config = PolicyConfig::from_config(&config(
            "[protect]\n\tmasterBranch = refs/heads/main\n\treleaseBranchPrefix = refs/heads/rel/\n\treleaseTagPrefix = refs/tags/v\n",
        ))
        .unwrap();
        let policy_set = policy_config.policy_set();
        assert_eq!(policy_set.master_branch(), "refs/heads/main");
        assert_eq!(policy_set.release_branch_prefix(), "refs/heads/rel/");
        assert_eq!(policy_set.release_tag_prefix(), "refs/tags/v");
    }

    #[test]
    fn namespaces_must_be_full_ref_names() {
        let err = PolicyConfig::from_config(&config("[protect]\n\tmasterBranch = main\n")).unwrap_err();
        assert!(err.to_string().contains("protect.masterBranch"));
        assert!(err.to_string().contains("must be a full ref name"));
    }

    #[test]
    fn deployer_override() {
        let policy_config = PolicyConfig::from_config(&config("[user]\n\temail = deployer@example.com\n")).unwrap();
        let overridden = policy_config.clone().with_deployer_email(Some("ci@example.com".into()));
        assert_eq!(overridden.policy_set().deployer_email(), Some("ci@example.com"));

        let kept = policy_config.with_deployer_email(Some(" ".into())).with_deployer_email(None);
        assert_eq!(kept.policy_set().deployer_email(), Some("deployer@example.com"));
    }
}
