//! Protection rules and their evaluation.

use crate::backend::Backend;
use crate::policy::ff::{self, Classification};
use crate::protocol::RefUpdate;

/// The default ref of the protected master branch, also used for prefix matching.
pub const DEFAULT_MASTER_BRANCH: &str = "refs/heads/master";
/// The default namespace of release branches.
pub const DEFAULT_RELEASE_BRANCH_PREFIX: &str = "refs/heads/release/";
/// The default namespace of release tags.
pub const DEFAULT_RELEASE_TAG_PREFIX: &str = "refs/tags/";

/// The protection rules and the identity they protect.
///
/// Each ref update is handled by exactly one rule, chosen by ref name prefix in this order:
/// master branch, release tags, release branches. Refs matching none of them are not protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    /// The protected master branch.
    master_branch: String,
    /// Namespace of release branches.
    release_branch_prefix: String,
    /// Namespace of release tags.
    release_tag_prefix: String,
    /// Email of the deployer whose tags mark releases.
    deployer_email: Option<String>,
}

/// The rule responsible for a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rule {
    MasterBranch,
    ReleaseTag,
    ReleaseBranch,
}

/// Reason codes for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReasonCode {
    /// The update is allowed.
    Allowed,
    /// Master was deleted or force-pushed.
    MasterProtected,
    /// A deployer tag was deleted or moved.
    ReleaseTagProtected,
    /// A release branch with an unmerged deployer tag was deleted or force-pushed,
    /// or a release branch was created outside of master's history.
    ReleaseBranchProtected,
}

impl ReasonCode {
    /// The message shown to the pusher.
    pub fn message(&self) -> &'static str {
        match self {
            ReasonCode::Allowed => "allowed",
            ReasonCode::MasterProtected => "Branch master is protected, no one can delete or force push",
            ReasonCode::ReleaseTagProtected => "The release tag is protected, no one can delete or force push",
            ReasonCode::ReleaseBranchProtected => {
                "The release branch tagged, no one can delete or force push except that you merge it to the master branch"
            }
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Decision result from evaluating a single update.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyDecision {
    /// Whether the update is allowed.
    pub allowed: bool,
    /// The reason code for the decision.
    pub reason_code: ReasonCode,
    /// The rule that made the decision, `None` for refs no rule is responsible for.
    pub rule: Option<Rule>,
}

impl PolicyDecision {
    fn allow(rule: Option<Rule>) -> Self {
        Self {
            allowed: true,
            reason_code: ReasonCode::Allowed,
            rule,
        }
    }

    fn deny(rule: Rule, reason_code: ReasonCode) -> Self {
        Self {
            allowed: false,
            reason_code,
            rule: Some(rule),
        }
    }
}

impl PolicySet {
    /// Create a new PolicySet with the default namespaces and no deployer identity.
    pub fn new() -> Self {
        Self {
            master_branch: DEFAULT_MASTER_BRANCH.into(),
            release_branch_prefix: DEFAULT_RELEASE_BRANCH_PREFIX.into(),
            release_tag_prefix: DEFAULT_RELEASE_TAG_PREFIX.into(),
            deployer_email: None,
        }
    }

    pub fn master_branch(&self) -> &str {
        &self.master_branch
    }

    pub fn with_master_branch(mut self, name: impl Into<String>) -> Self {
        self.master_branch = name.into();
        self
    }

    pub fn release_branch_prefix(&self) -> &str {
        &self.release_branch_prefix
    }

    pub fn with_release_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.release_branch_prefix = prefix.into();
        self
    }

    pub fn release_tag_prefix(&self) -> &str {
        &self.release_tag_prefix
    }

    pub fn with_release_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.release_tag_prefix = prefix.into();
        self
    }

    pub fn deployer_email(&self) -> Option<&str> {
        self.deployer_email.as_deref()
    }

    /// Set the deployer identity. Without it, release tags and release branches are unprotected.
    pub fn with_deployer_email(mut self, email: impl Into<Option<String>>) -> Self {
        self.deployer_email = email.into();
        self
    }

    /// Select the rule responsible for the ref `name`, if any.
    pub fn rule_for(&self, name: &str) -> Option<Rule> {
        if name.starts_with(&self.master_branch) {
            Some(Rule::MasterBranch)
        } else if name.starts_with(&self.release_tag_prefix) {
            Some(Rule::ReleaseTag)
        } else if name.starts_with(&self.release_branch_prefix) {
            Some(Rule::ReleaseBranch)
        } else {
            None
        }
    }

    /// Evaluate `update` against the rule responsible for its ref.
    ///
    /// Evaluation never fails: queries that can't be answered degrade as documented by each rule.
    pub fn evaluate<B: Backend + ?Sized>(&self, update: &RefUpdate, backend: &B) -> PolicyDecision {
        if update.is_noop() {
            return PolicyDecision::allow(self.rule_for(&update.name));
        }
        match self.rule_for(&update.name) {
            Some(Rule::MasterBranch) => self.protect_master_branch(update, backend),
            Some(Rule::ReleaseTag) => self.protect_release_tag(update, backend),
            Some(Rule::ReleaseBranch) => self.protect_release_branch(update, backend),
            None => PolicyDecision::allow(None),
        }
    }

    /// Master may be created, and fast-forwarded, but never deleted or force-pushed.
    fn protect_master_branch<B: Backend + ?Sized>(&self, update: &RefUpdate, backend: &B) -> PolicyDecision {
        match ff::classify(backend, update) {
            Classification::Deletion | Classification::ForcePush => {
                PolicyDecision::deny(Rule::MasterBranch, ReasonCode::MasterProtected)
            }
            Classification::NoOp
            | Classification::Creation
            | Classification::Unchanged
            | Classification::FastForward => PolicyDecision::allow(Some(Rule::MasterBranch)),
        }
    }

    /// Tags created by the deployer can't be deleted or moved once pushed.
    ///
    /// The tag is looked up as it currently is in the repository. If that fails, it's unprotected.
    fn protect_release_tag<B: Backend + ?Sized>(&self, update: &RefUpdate, backend: &B) -> PolicyDecision {
        let allow = PolicyDecision::allow(Some(Rule::ReleaseTag));
        if update.is_creation() || (!update.is_deletion() && update.old == update.new) {
            return allow;
        }
        let Some(deployer) = self.deployer_email.as_deref() else {
            return allow;
        };
        match backend.tag_info(&update.name) {
            Ok(Some(tag)) if tag.is_authored_by(deployer) => {
                PolicyDecision::deny(Rule::ReleaseTag, ReasonCode::ReleaseTagProtected)
            }
            Ok(_) => allow,
            Err(err) => {
                tracing::warn!(tag = %update.name, %err, "could not read tag, treating it as unprotected");
                allow
            }
        }
    }

    /// Release branches must originate from master, and can't be deleted or rewritten while
    /// they carry a deployer tag that isn't merged into master yet.
    fn protect_release_branch<B: Backend + ?Sized>(&self, update: &RefUpdate, backend: &B) -> PolicyDecision {
        let allow = PolicyDecision::allow(Some(Rule::ReleaseBranch));
        let deny = PolicyDecision::deny(Rule::ReleaseBranch, ReasonCode::ReleaseBranchProtected);
        match ff::classify(backend, update) {
            Classification::Creation => {
                if ff::is_branched_from(backend, update.new, &self.master_branch) {
                    allow
                } else {
                    deny
                }
            }
            Classification::Deletion | Classification::ForcePush => {
                let Some(deployer) = self.deployer_email.as_deref() else {
                    return allow;
                };
                match self.last_deployer_tag(update, deployer, backend) {
                    None => allow,
                    Some(tagged) if ff::is_merged_into(backend, tagged, &self.master_branch) => allow,
                    Some(_) => deny,
                }
            }
            Classification::NoOp | Classification::Unchanged | Classification::FastForward => allow,
        }
    }

    /// Find the most recent commit tagged by `deployer` between the fork point of the release
    /// branch with master and its current tip.
    ///
    /// Failing queries count as "no tag found", and so does a branch without a fork point with master.
    fn last_deployer_tag<B: Backend + ?Sized>(
        &self,
        update: &RefUpdate,
        deployer: &str,
        backend: &B,
    ) -> Option<gix_hash::ObjectId> {
        // Before the push, the ref still points to the old tip.
        let tip = ff::resolve_tip(backend, &update.name).unwrap_or(update.old);
        // Without a fork point the branch's own history can't be told apart from master's.
        let Some(master) = ff::resolve_tip(backend, &self.master_branch) else {
            tracing::warn!(branch = %update.name, master = %self.master_branch, "master is missing, not looking for deployer tags");
            return None;
        };
        let base = match backend.merge_base(tip, master) {
            Ok(Some(base)) => base,
            Ok(None) => {
                tracing::warn!(branch = %update.name, "release branch shares no history with master, not looking for deployer tags");
                return None;
            }
            Err(err) => {
                tracing::warn!(branch = %update.name, %err, "could not find fork point with master");
                return None;
            }
        };

        let tags = match backend.tags_between(Some(base), tip) {
            Ok(tags) => tags,
            Err(err) => {
                tracing::warn!(branch = %update.name, %err, "could not list tags of release branch");
                return None;
            }
        };
        for tagged in tags {
            let tagged = match tagged {
                Ok(tagged) => tagged,
                Err(err) => {
                    tracing::warn!(branch = %update.name, %err, "stopped listing tags of release branch");
                    return None;
                }
            };
            match backend.tag_info(&tagged.name) {
                Ok(Some(tag)) if tag.is_authored_by(deployer) => {
                    tracing::debug!(branch = %update.name, tag = %tagged.name, commit = %tagged.commit, "found deployer tag");
                    return Some(tagged.commit);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(tag = %tagged.name, %err, "could not read tag, skipping it"),
            }
        }
        None
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new()
    }
}
