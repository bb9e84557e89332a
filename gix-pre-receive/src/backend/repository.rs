//! [`Backend`] implementation on top of a `gix` repository.
//!
//! While a push is in progress, `git receive-pack` keeps the received objects in a quarantine
//! directory and announces it to hooks through the environment only. Refs are read from the
//! repository, but objects are looked up in the announced directories first, then in the
//! repository's own object database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gix_hash::ObjectId;
use gix_object::{Exists, Find};
use gix_traverse::commit::simple::{CommitTimeOrder, Sorting};

use super::{Backend, Error, Tag, TagKind, TaggedCommit, TaggedCommits};

/// Variables set by `git receive-pack` for hooks running before the objects were migrated.
const QUARANTINE_PATH: &str = "GIT_QUARANTINE_PATH";
const OBJECT_DIRECTORY: &str = "GIT_OBJECT_DIRECTORY";
const ALTERNATE_OBJECT_DIRECTORIES: &str = "GIT_ALTERNATE_OBJECT_DIRECTORIES";

/// Answers queries by reading the object database and refs of a repository.
///
/// Nothing is cached between queries as the repository is immutable for the lifetime of the hook.
pub struct GixBackend {
    repo: gix::Repository,
    /// Searched in order before the repository's own objects.
    quarantine: Vec<gix_odb::Handle>,
}

impl std::fmt::Debug for GixBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GixBackend")
            .field("git_dir", &self.repo.git_dir())
            .field("quarantine", &self.object_directories().collect::<Vec<_>>())
            .finish()
    }
}

impl GixBackend {
    pub fn new(repo: gix::Repository) -> Self {
        Self {
            repo,
            quarantine: Vec::new(),
        }
    }

    /// Open the repository at `path`, which is typically the `GIT_DIR` the hook runs in, along with
    /// the object directories of the push in progress.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        Self::open_with_object_directories(path, object_directories_from_env())
    }

    /// Open the repository at `path` and look up objects in `directories` before its own.
    pub fn open_with_object_directories(
        path: impl Into<PathBuf>,
        directories: impl IntoIterator<Item = PathBuf>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let repo = gix::open(&path).map_err(|err| Error::Open {
            path,
            source: Box::new(err),
        })?;
        Self::new(repo).with_object_directories(directories)
    }

    /// Search `directories` for objects before the repository's object database.
    ///
    /// The repository's own object directory and duplicates are skipped, directories that don't exist are
    /// ignored with a warning like git ignores missing alternates.
    pub fn with_object_directories(mut self, directories: impl IntoIterator<Item = PathBuf>) -> Result<Self, Error> {
        let mut seen = vec![canonical(&self.repo.common_dir().join("objects"))];
        for dir in directories {
            if dir.as_os_str().is_empty() {
                continue;
            }
            if !dir.is_dir() {
                tracing::warn!(dir = %dir.display(), "ignoring object directory that doesn't exist");
                continue;
            }
            let key = canonical(&dir);
            if seen.contains(&key) {
                continue;
            }
            let objects = gix_odb::at(&dir).map_err(|source| Error::ObjectDirectory { path: dir.clone(), source })?;
            tracing::debug!(dir = %dir.display(), "searching quarantined objects");
            self.quarantine.push(objects);
            seen.push(key);
        }
        Ok(self)
    }

    /// The directories searched for objects before the repository's object database.
    pub fn object_directories(&self) -> impl Iterator<Item = &Path> + '_ {
        self.quarantine.iter().map(|objects| objects.store_ref().path())
    }

    pub fn repository(&self) -> &gix::Repository {
        &self.repo
    }

    fn objects(&self) -> Objects<'_> {
        Objects {
            quarantine: &self.quarantine,
            repo: &self.repo.objects,
        }
    }

    /// Map each commit to the names of the tags pointing at it, sorted by name.
    fn tag_decorations(&self) -> Result<HashMap<ObjectId, Vec<String>>, Error> {
        let mut decorations: HashMap<ObjectId, Vec<String>> = HashMap::new();
        let platform = self.repo.references().map_err(|e| Error::query("tag iteration", e))?;
        for reference in platform.tags().map_err(|e| Error::query("tag iteration", e))? {
            let mut reference = reference.map_err(|e| Error::query("tag iteration", e))?;
            let name = reference.name().as_bstr().to_string();
            match reference.peel_to_id_in_place() {
                Ok(id) => decorations.entry(id.detach()).or_default().push(name),
                Err(err) => tracing::warn!(tag = %name, %err, "skipping tag that can't be peeled"),
            }
        }
        for names in decorations.values_mut() {
            names.sort();
        }
        Ok(decorations)
    }
}

/// The directories `git receive-pack` announces to hooks, most specific first.
fn object_directories_from_env() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [QUARANTINE_PATH, OBJECT_DIRECTORY]
        .into_iter()
        .filter_map(std::env::var_os)
        .map(PathBuf::from)
        .collect();
    if let Some(alternates) = std::env::var_os(ALTERNATE_OBJECT_DIRECTORIES) {
        dirs.extend(std::env::split_paths(&alternates));
    }
    dirs
}

fn canonical(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_owned())
}

/// Quarantined object directories chained with the repository's object database.
struct Objects<'a> {
    quarantine: &'a [gix_odb::Handle],
    repo: &'a gix::OdbHandle,
}

impl Find for Objects<'_> {
    fn try_find<'a>(
        &self,
        id: &gix_hash::oid,
        buffer: &'a mut Vec<u8>,
    ) -> Result<Option<gix_object::Data<'a>>, gix_object::find::Error> {
        match self.quarantine.iter().find(|objects| objects.exists(id)) {
            Some(objects) => objects.try_find(id, buffer),
            None => self.repo.try_find(id, buffer),
        }
    }
}

impl Exists for Objects<'_> {
    fn exists(&self, id: &gix_hash::oid) -> bool {
        self.quarantine.iter().any(|objects| objects.exists(id)) || self.repo.exists(id)
    }
}

impl Backend for GixBackend {
    fn merge_base(&self, one: ObjectId, two: ObjectId) -> Result<Option<ObjectId>, Error> {
        let objects = self.objects();
        // The graph treats missing commits as roots, which would look like unrelated histories.
        for id in [one, two] {
            if !objects.exists(&id) {
                return Err(Error::query("merge-base", format_args!("object {id} not found")));
            }
        }
        let cache = self.repo.commit_graph_if_enabled().ok().flatten();
        let mut graph = gix_revision::Graph::new(objects, cache.as_ref());
        let bases = gix_revision::merge_base(one, &[two], &mut graph).map_err(|e| Error::query("merge-base", e))?;
        Ok(bases.and_then(|bases| bases.first().copied()))
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, Error> {
        let Some(mut reference) = self
            .repo
            .try_find_reference(name)
            .map_err(|e| Error::query("resolve-ref", e))?
        else {
            return Ok(None);
        };
        let id = reference
            .peel_to_id_in_place()
            .map_err(|e| Error::query("resolve-ref", e))?;
        Ok(Some(id.detach()))
    }

    fn tags_between(&self, base: Option<ObjectId>, tip: ObjectId) -> Result<TaggedCommits<'_>, Error> {
        let mut decorations = self.tag_decorations()?;
        let walk = gix_traverse::commit::Simple::new([tip], self.objects())
            .sorting(Sorting::ByCommitTime(CommitTimeOrder::NewestFirst))
            .and_then(|walk| walk.hide(base))
            .map_err(|e| Error::query("rev-walk", e))?;

        Ok(Box::new(walk.flat_map(move |info| -> Vec<Result<TaggedCommit, Error>> {
            match info {
                Ok(info) => {
                    let commit = info.id;
                    decorations
                        .remove(&commit)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|name| Ok(TaggedCommit { commit, name }))
                        .collect()
                }
                Err(err) => vec![Err(Error::query("rev-walk", err))],
            }
        })))
    }

    fn tag_info(&self, name: &str) -> Result<Option<Tag>, Error> {
        let Some(mut reference) = self
            .repo
            .try_find_reference(name)
            .map_err(|e| Error::query("tag-info", e))?
        else {
            return Ok(None);
        };
        let Some(direct) = reference.try_id().map(|id| id.detach()) else {
            return Ok(None);
        };

        let mut buf = Vec::new();
        let object = self
            .objects()
            .try_find(&direct, &mut buf)
            .map_err(|e| Error::query("tag-info", e))?
            .ok_or_else(|| Error::query("tag-info", format_args!("object {direct} not found")))?;
        let (kind, tagger_email) = if object.kind == gix_object::Kind::Tag {
            let email = gix_object::TagRefIter::from_bytes(object.data)
                .tagger()
                .map_err(|e| Error::query("tag-info", e))?
                .map(|signature| signature.email.to_string());
            (TagKind::Annotated, email)
        } else {
            (TagKind::Lightweight, None)
        };

        let target = reference
            .peel_to_id_in_place()
            .map_err(|e| Error::query("tag-info", e))?
            .detach();
        Ok(Some(Tag {
            name: name.to_owned(),
            target,
            tagger_email,
            kind,
        }))
    }
}
