//! Read-only repository queries the protection rules are built on.
//!
//! The [`Backend`] trait is the only way the policy engine looks at the repository:
//! - `merge_base`: nearest common ancestor of two commits
//! - `resolve_ref`: the commit a ref currently points to
//! - `tags_between`: tags decorating the commits of a range, most recent first
//! - `tag_info`: the metadata of a single tag
//!
//! Two implementations are provided:
//! - [`GixBackend`] queries a real repository through `gix`
//! - [`InMemoryBackend`] holds a commit graph in memory and records every query,
//!   for deterministic tests of the rules
//!
//! None of the queries has side effects. Errors are inconclusive by nature, and it's up to
//! the caller to decide whether a failed query should lead to a rejection or not.

use gix_hash::ObjectId;

pub mod memory;
pub mod repository;

pub use memory::{InMemoryBackend, Operation, Query};
pub use repository::GixBackend;

/// The error returned by all [`Backend`] queries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The repository could not be opened.
    #[error("could not open repository at '{}'", path.display())]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: Box<gix::open::Error>,
    },
    /// An additional object directory could not be opened.
    #[error("could not open object directory '{}'", path.display())]
    ObjectDirectory {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A query could not be answered.
    #[error("{operation} failed: {message}")]
    Query { operation: &'static str, message: String },
}

impl Error {
    pub(crate) fn query(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Query {
            operation,
            message: err.to_string(),
        }
    }
}

/// Whether a tag is a tag object of its own or just a ref pointing at a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagKind {
    /// A tag object with its own tagger and message.
    Annotated,
    /// A ref pointing directly at a commit.
    Lightweight,
}

/// Metadata of a single tag ref.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    /// The full ref name, like `refs/tags/v1.0`.
    pub name: String,
    /// The commit the tag eventually points to, with tag objects peeled.
    pub target: ObjectId,
    /// The email of the tagger, without angle brackets. Only annotated tags have one.
    pub tagger_email: Option<String>,
    pub kind: TagKind,
}

impl Tag {
    /// Return true if this is an annotated tag created by `email`.
    ///
    /// Lightweight tags never belong to anyone.
    pub fn is_authored_by(&self, email: &str) -> bool {
        self.kind == TagKind::Annotated && self.tagger_email.as_deref() == Some(email)
    }
}

/// A tag ref along with the commit it decorates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCommit {
    pub commit: ObjectId,
    pub name: String,
}

/// A lazy, single-pass sequence of tagged commits.
pub type TaggedCommits<'a> = Box<dyn Iterator<Item = Result<TaggedCommit, Error>> + 'a>;

/// Read-only access to the commit graph, refs and tags of a repository.
pub trait Backend {
    /// Find the nearest common ancestor of `one` and `two`.
    ///
    /// Returns `Ok(None)` if the histories are unrelated.
    fn merge_base(&self, one: ObjectId, two: ObjectId) -> Result<Option<ObjectId>, Error>;

    /// Resolve the ref `name` to the commit it points to, peeling tags.
    ///
    /// Returns `Ok(None)` if there is no such ref.
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, Error>;

    /// Produce all tags decorating commits reachable from `tip` but not from `base`,
    /// most recent commits first.
    ///
    /// With `base` being `None`, all commits reachable from `tip` are considered.
    fn tags_between(&self, base: Option<ObjectId>, tip: ObjectId) -> Result<TaggedCommits<'_>, Error>;

    /// Obtain the metadata of the tag ref `name`, or `None` if it doesn't exist.
    fn tag_info(&self, name: &str) -> Result<Option<Tag>, Error>;
}

impl<T: Backend + ?Sized> Backend for &T {
    fn merge_base(&self, one: ObjectId, two: ObjectId) -> Result<Option<ObjectId>, Error> {
        (**self).merge_base(one, two)
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, Error> {
        (**self).resolve_ref(name)
    }

    fn tags_between(&self, base: Option<ObjectId>, tip: ObjectId) -> Result<TaggedCommits<'_>, Error> {
        (**self).tags_between(base, tip)
    }

    fn tag_info(&self, name: &str) -> Result<Option<Tag>, Error> {
        (**self).tag_info(name)
    }
}
