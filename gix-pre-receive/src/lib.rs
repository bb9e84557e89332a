/*!
A `pre-receive` hook protecting the master branch, release tags and release branches.

Every push is a batch of ref updates, read as `<old> <new> <ref>` lines. The batch is accepted
as a whole, or rejected with the reason of its first offending update.

Protection rules
- The master branch can neither be deleted nor force-pushed.
- Annotated tags created by the deployer can neither be deleted nor moved.
- Release branches must be created from master's history, and can't be deleted or force-pushed
  while they carry a deployer tag that isn't merged into master yet.

All repository access goes through the [`backend::Backend`] trait, which is implemented for
real repositories by [`backend::GixBackend`] and for tests by [`backend::InMemoryBackend`].

```rust
use gix_pre_receive::{backend::InMemoryBackend, policy::PolicySet, PreReceiveBuilder, Verdict};
use gix_hash::ObjectId;

let master = ObjectId::from_hex(b"1111111111111111111111111111111111111111").unwrap();
let backend = InMemoryBackend::new()
    .with_commit(master, [])
    .with_ref("refs/heads/master", master);
let hook = PreReceiveBuilder::new()
    .with_policy(PolicySet::new().with_deployer_email(Some("deployer@example.com".to_string())))
    .with_backend(backend)
    .build();

let verdict = hook
    .evaluate_text("1111111111111111111111111111111111111111 0000000000000000000000000000000000000000 refs/heads/master\n")
    .unwrap();
assert!(verdict.is_rejected());
```
*/

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod policy;
pub mod protocol;

pub use protocol::{RefUpdate, RefUpdateList};

use core::marker::PhantomData;

use gix_hash::ObjectId;

use crate::backend::Backend;
use crate::policy::{PolicySet, ReasonCode};

/// Typestates representing builder progress.
pub mod state {
    /// Initial builder state without a backend.
    pub struct Start;
    /// Ready state after a backend was provided.
    pub struct Ready;
}

/// Stable high-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Io,
    Protocol,
    Config,
    Repository,
}

/// Error type for operations provided by this crate.
///
/// Policy violations are not errors, they are reported through [`Verdict::Rejected`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An input line couldn't be parsed.
    #[error("malformed input on line {line}: {message}")]
    MalformedInput { line: usize, message: String },
    /// The configuration contains invalid values or couldn't be read.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O errors from reading the input.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The repository couldn't be opened or queried.
    #[error(transparent)]
    Backend(#[from] backend::Error),
}

impl Error {
    /// Fast classification helper returning a stable error kind.
    pub fn kind(&self) -> Kind {
        match self {
            Error::MalformedInput { .. } => Kind::Protocol,
            Error::Config(_) => Kind::Config,
            Error::Io(_) => Kind::Io,
            Error::Backend(_) => Kind::Repository,
        }
    }
}

/// The update that caused a push to be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rejection {
    pub reason: ReasonCode,
    pub refname: String,
    pub old: ObjectId,
    pub new: ObjectId,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason.message())
    }
}

/// The outcome of evaluating a whole push.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Verdict {
    /// All updates may be applied.
    Accepted,
    /// No update may be applied, because of the contained one.
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_accepted()
    }

    /// The rejection, if there was one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Accepted => None,
            Verdict::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Builder for constructing a [`PreReceive`] instance with typestate guarantees.
///
/// A backend must be provided before the hook can be built.
#[derive(Debug, Clone)]
pub struct PreReceiveBuilder<S = state::Start, B = ()> {
    policy: PolicySet,
    backend: B,
    _state: PhantomData<S>,
}

impl PreReceiveBuilder<state::Start, ()> {
    /// Create a new builder in the Start state with the default policy.
    pub fn new() -> Self {
        Self {
            policy: PolicySet::new(),
            backend: (),
            _state: PhantomData,
        }
    }

    /// Set the repository to query and move to the Ready state.
    pub fn with_backend<B: Backend>(self, backend: B) -> PreReceiveBuilder<state::Ready, B> {
        PreReceiveBuilder {
            policy: self.policy,
            backend,
            _state: PhantomData,
        }
    }
}

impl Default for PreReceiveBuilder<state::Start, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> PreReceiveBuilder<S, B> {
    /// Replace the protection rules.
    pub fn with_policy(mut self, policy: PolicySet) -> Self {
        self.policy = policy;
        self
    }

    /// Use the policy loaded from configuration.
    pub fn with_policy_config(self, config: config::PolicyConfig) -> Self {
        self.with_policy(config.into_policy_set())
    }
}

impl<B: Backend> PreReceiveBuilder<state::Ready, B> {
    /// Finalize the builder and obtain a PreReceive instance.
    ///
    /// This does no I/O.
    pub fn build(self) -> PreReceive<B> {
        if self.policy.deployer_email().is_none() {
            tracing::warn!("no deployer identity configured, release tags and release branches are unprotected");
        }
        PreReceive {
            policy: self.policy,
            backend: self.backend,
        }
    }
}

/// Evaluates the updates of a push against the protection rules.
#[derive(Debug, Clone)]
pub struct PreReceive<B> {
    policy: PolicySet,
    backend: B,
}

impl<B: Backend> PreReceive<B> {
    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Evaluate `updates` in order, stopping at the first rejected one.
    ///
    /// Updates after a rejection are not looked at.
    pub fn evaluate(&self, updates: &[RefUpdate]) -> Verdict {
        for update in updates {
            let decision = self.policy.evaluate(update, &self.backend);
            tracing::debug!(
                refname = %update.name,
                old = %update.old,
                new = %update.new,
                rule = ?decision.rule,
                allowed = decision.allowed,
                "evaluated update"
            );
            if !decision.allowed {
                return Verdict::Rejected(Rejection {
                    reason: decision.reason_code,
                    refname: update.name.clone(),
                    old: update.old,
                    new: update.new,
                });
            }
        }
        Verdict::Accepted
    }

    /// Parse all of `text`, then evaluate the updates it contains.
    pub fn evaluate_text(&self, text: &str) -> Result<Verdict, Error> {
        let updates = RefUpdateList::parse_from_text(text)?;
        Ok(self.evaluate(updates.as_slice()))
    }

    /// Read all updates from `input`, then evaluate them.
    pub fn run(&self, input: impl std::io::Read) -> Result<Verdict, Error> {
        let updates = RefUpdateList::read_from(input)?;
        tracing::debug!(count = updates.len(), "read updates");
        Ok(self.evaluate(updates.as_slice()))
    }
}
