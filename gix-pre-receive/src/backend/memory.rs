//! An in-memory commit graph implementing [`Backend`].
//!
//! Commits, refs and tags are registered up-front, and every query is recorded so tests can
//! assert which questions the policy engine asked, and in which order.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use gix_hash::ObjectId;

use super::{Backend, Error, Tag, TagKind, TaggedCommit, TaggedCommits};

/// The kind of query, used to make individual operations fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    MergeBase,
    ResolveRef,
    TagsBetween,
    TagInfo,
}

/// A query as it was received by the [`InMemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    MergeBase(ObjectId, ObjectId),
    ResolveRef(String),
    TagsBetween(Option<ObjectId>, ObjectId),
    TagInfo(String),
}

/// A backend answering queries from a commit graph held in memory.
///
/// ```rust
/// use gix_pre_receive::backend::{Backend, InMemoryBackend};
/// use gix_hash::ObjectId;
///
/// let a = ObjectId::from_hex(b"1111111111111111111111111111111111111111").unwrap();
/// let b = ObjectId::from_hex(b"2222222222222222222222222222222222222222").unwrap();
/// let backend = InMemoryBackend::new()
///     .with_commit(a, [])
///     .with_commit(b, [a])
///     .with_ref("refs/heads/master", b);
///
/// assert_eq!(backend.merge_base(a, b).unwrap(), Some(a));
/// assert_eq!(backend.resolve_ref("refs/heads/master").unwrap(), Some(b));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    parents: HashMap<ObjectId, Vec<ObjectId>>,
    refs: BTreeMap<String, ObjectId>,
    tags: BTreeMap<String, Tag>,
    failing: HashSet<Operation>,
    log: RefCell<Vec<Query>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add commit `id` with the given `parents`, which must have been added before.
    pub fn with_commit(mut self, id: ObjectId, parents: impl IntoIterator<Item = ObjectId>) -> Self {
        self.parents.insert(id, parents.into_iter().collect());
        self
    }

    /// Let the branch or other ref `name` point to `id`.
    pub fn with_ref(mut self, name: impl Into<String>, id: ObjectId) -> Self {
        self.refs.insert(name.into(), id);
        self
    }

    /// Add an annotated tag `name` on `target`, created by `tagger_email`.
    pub fn with_annotated_tag(mut self, name: impl Into<String>, target: ObjectId, tagger_email: &str) -> Self {
        let name = name.into();
        self.tags.insert(
            name.clone(),
            Tag {
                name,
                target,
                tagger_email: Some(tagger_email.to_owned()),
                kind: TagKind::Annotated,
            },
        );
        self
    }

    /// Add a lightweight tag `name` pointing at `target`.
    pub fn with_lightweight_tag(mut self, name: impl Into<String>, target: ObjectId) -> Self {
        let name = name.into();
        self.tags.insert(
            name.clone(),
            Tag {
                name,
                target,
                tagger_email: None,
                kind: TagKind::Lightweight,
            },
        );
        self
    }

    /// Make every query of the given `operation` fail.
    pub fn fail_on(mut self, operation: Operation) -> Self {
        self.failing.insert(operation);
        self
    }

    /// All queries received so far, in order.
    pub fn queries(&self) -> Vec<Query> {
        self.log.borrow().clone()
    }

    /// Forget all recorded queries.
    pub fn clear_queries(&self) {
        self.log.borrow_mut().clear();
    }

    fn record(&self, operation: Operation, query: Query) -> Result<(), Error> {
        self.log.borrow_mut().push(query);
        if self.failing.contains(&operation) {
            return Err(Error::query(operation_name(operation), "injected failure"));
        }
        Ok(())
    }

    fn parents_of(&self, id: &ObjectId) -> Result<&[ObjectId], Error> {
        self.parents
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::query("lookup", format!("commit {id} not found")))
    }

    /// `id` and all of its ancestors.
    fn ancestors(&self, id: ObjectId) -> Result<HashSet<ObjectId>, Error> {
        let mut seen = HashSet::new();
        let mut to_visit = vec![id];
        while let Some(current) = to_visit.pop() {
            if !seen.insert(current) {
                continue;
            }
            to_visit.extend_from_slice(self.parents_of(&current)?);
        }
        Ok(seen)
    }

    /// Commits reachable from `tip` so that each commit comes before all of its parents.
    fn topo_order(&self, tip: ObjectId) -> Result<Vec<ObjectId>, Error> {
        let mut seen = HashSet::new();
        let mut post_order = Vec::new();
        let mut stack = vec![(tip, false)];
        while let Some((id, parents_done)) = stack.pop() {
            if parents_done {
                post_order.push(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.push((id, true));
            for parent in self.parents_of(&id)?.iter().rev() {
                if !seen.contains(parent) {
                    stack.push((*parent, false));
                }
            }
        }
        post_order.reverse();
        Ok(post_order)
    }
}

impl Backend for InMemoryBackend {
    fn merge_base(&self, one: ObjectId, two: ObjectId) -> Result<Option<ObjectId>, Error> {
        self.record(Operation::MergeBase, Query::MergeBase(one, two))?;
        let of_one = self.ancestors(one)?;

        // Breadth-first from `two`, stopping at the first common commit of each path.
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([two]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if of_one.contains(&current) {
                candidates.push(current);
                continue;
            }
            queue.extend(self.parents_of(&current)?.iter().copied());
        }

        // The best common ancestor isn't an ancestor of any other candidate.
        for candidate in &candidates {
            let mut is_best = true;
            for other in candidates.iter().filter(|other| *other != candidate) {
                if self.ancestors(*other)?.contains(candidate) {
                    is_best = false;
                    break;
                }
            }
            if is_best {
                return Ok(Some(*candidate));
            }
        }
        Ok(None)
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, Error> {
        self.record(Operation::ResolveRef, Query::ResolveRef(name.to_owned()))?;
        Ok(self
            .refs
            .get(name)
            .copied()
            .or_else(|| self.tags.get(name).map(|tag| tag.target)))
    }

    fn tags_between(&self, base: Option<ObjectId>, tip: ObjectId) -> Result<TaggedCommits<'_>, Error> {
        self.record(Operation::TagsBetween, Query::TagsBetween(base, tip))?;
        let hidden = match base {
            Some(base) => self.ancestors(base)?,
            None => HashSet::new(),
        };
        let commits = self.topo_order(tip)?;
        Ok(Box::new(
            commits
                .into_iter()
                .filter(move |id| !hidden.contains(id))
                .flat_map(move |commit| {
                    self.tags
                        .values()
                        .filter(move |tag| tag.target == commit)
                        .map(move |tag| {
                            Ok::<_, Error>(TaggedCommit {
                                commit,
                                name: tag.name.clone(),
                            })
                        })
                }),
        ))
    }

    fn tag_info(&self, name: &str) -> Result<Option<Tag>, Error> {
        self.record(Operation::TagInfo, Query::TagInfo(name.to_owned()))?;
        Ok(self.tags.get(name).cloned())
    }
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::MergeBase => "merge-base",
        Operation::ResolveRef => "resolve-ref",
        Operation::TagsBetween => "tags-between",
        Operation::TagInfo => "tag-info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from_bytes_or_panic(&bytes)
    }

    ///   1 - 2 - 3 - 5     (master)
    ///        \     /
    ///         4 --+       (feature)
    ///   9                 (unrelated root)
    fn graph() -> InMemoryBackend {
        InMemoryBackend::new()
            .with_commit(oid(1), [])
            .with_commit(oid(2), [oid(1)])
            .with_commit(oid(3), [oid(2)])
            .with_commit(oid(4), [oid(2)])
            .with_commit(oid(5), [oid(3), oid(4)])
            .with_commit(oid(9), [])
            .with_ref("refs/heads/master", oid(5))
    }

    #[test]
    fn merge_base_of_linear_history_is_the_older_commit() {
        let g = graph();
        assert_eq!(g.merge_base(oid(1), oid(3)).unwrap(), Some(oid(1)));
        assert_eq!(g.merge_base(oid(3), oid(1)).unwrap(), Some(oid(1)));
        assert_eq!(g.merge_base(oid(3), oid(3)).unwrap(), Some(oid(3)));
    }

    #[test]
    fn merge_base_of_diverged_branches_is_the_fork_point() {
        let g = graph();
        assert_eq!(g.merge_base(oid(3), oid(4)).unwrap(), Some(oid(2)));
        assert_eq!(g.merge_base(oid(4), oid(5)).unwrap(), Some(oid(4)));
    }

    #[test]
    fn unrelated_histories_have_no_merge_base() {
        assert_eq!(graph().merge_base(oid(9), oid(5)).unwrap(), None);
    }

    #[test]
    fn unknown_commits_are_errors() {
        assert!(graph().merge_base(oid(42), oid(5)).is_err());
    }

    #[test]
    fn tags_between_is_most_recent_first_and_excludes_base() {
        let g = graph()
            .with_annotated_tag("refs/tags/v1", oid(1), "a@example.com")
            .with_annotated_tag("refs/tags/v2", oid(2), "a@example.com")
            .with_lightweight_tag("refs/tags/v3", oid(3));
        let found: Vec<_> = g
            .tags_between(Some(oid(1)), oid(3))
            .unwrap()
            .map(|t| t.unwrap().name)
            .collect();
        assert_eq!(found, vec!["refs/tags/v3".to_string(), "refs/tags/v2".to_string()]);

        let all = g.tags_between(None, oid(3)).unwrap().count();
        assert_eq!(all, 3);
    }

    #[test]
    fn queries_are_recorded_and_failures_injected() {
        let g = graph().fail_on(Operation::MergeBase);
        assert!(g.merge_base(oid(1), oid(2)).is_err());
        assert_eq!(g.resolve_ref("refs/heads/nope").unwrap(), None);
        assert_eq!(
            g.queries(),
            vec![
                Query::MergeBase(oid(1), oid(2)),
                Query::ResolveRef("refs/heads/nope".into())
            ]
        );
        g.clear_queries();
        assert!(g.queries().is_empty());
    }
}
