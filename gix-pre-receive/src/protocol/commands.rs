// Parsing of the ref update lines a pre-receive hook receives on stdin.
//
// Each line has the form
//   "<old-oid> <new-oid> <refname>"
//
// A token consisting only of '0' characters is the null object id, independent of its
// length, so "0000 0000 refs/heads/master" is accepted as a no-op. All lines are parsed
// before any of them is evaluated so that malformed input never leads to a partial decision.

use crate::Error;
use gix_hash::ObjectId;

/// A single ref update proposed by the push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    /// The object the ref pointed to before the push, or null if it did not exist.
    pub old: ObjectId,
    /// The object the ref will point to after the push, or null if it is being deleted.
    pub new: ObjectId,
    /// The full ref name, like `refs/heads/master`.
    pub name: String,
}

impl RefUpdate {
    pub fn new(old: ObjectId, new: ObjectId, name: impl Into<String>) -> Self {
        Self {
            old,
            new,
            name: name.into(),
        }
    }

    /// The ref did not exist before the push.
    pub fn is_creation(&self) -> bool {
        self.old.is_null()
    }

    /// The ref is removed by the push.
    pub fn is_deletion(&self) -> bool {
        self.new.is_null()
    }

    /// Both sides are null: deleting a ref that never existed.
    pub fn is_noop(&self) -> bool {
        self.is_creation() && self.is_deletion()
    }
}

/// The ordered list of updates of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefUpdateList {
    updates: Vec<RefUpdate>,
}

impl RefUpdateList {
    pub fn new() -> Self {
        Self { updates: Vec::new() }
    }

    pub fn push(&mut self, update: RefUpdate) {
        self.updates.push(update);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RefUpdate> {
        self.updates.iter()
    }

    pub fn as_slice(&self) -> &[RefUpdate] {
        &self.updates
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Parse all update lines from `text`, one per `\n`.
    ///
    /// Trailing whitespace, including `\r`, is ignored, as are blank lines.
    /// Any other line must consist of exactly three whitespace separated tokens.
    pub fn parse_from_text(text: &str) -> Result<Self, Error> {
        let mut list = RefUpdateList::new();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim_end();
            if line.is_empty() {
                continue;
            }
            list.push(parse_line(line).map_err(|message| Error::MalformedInput { line: idx + 1, message })?);
        }
        Ok(list)
    }

    /// Read everything from `input` and parse it with [`parse_from_text()`][Self::parse_from_text()].
    pub fn read_from(mut input: impl std::io::Read) -> Result<Self, Error> {
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        Self::parse_from_text(&text)
    }
}

impl<'a> IntoIterator for &'a RefUpdateList {
    type Item = &'a RefUpdate;
    type IntoIter = std::slice::Iter<'a, RefUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.iter()
    }
}

impl FromIterator<RefUpdate> for RefUpdateList {
    fn from_iter<T: IntoIterator<Item = RefUpdate>>(iter: T) -> Self {
        Self {
            updates: iter.into_iter().collect(),
        }
    }
}

fn parse_line(line: &str) -> Result<RefUpdate, String> {
    let mut it = line.split_whitespace();
    let old_hex = it.next().ok_or("missing <old> oid")?;
    let new_hex = it.next().ok_or("missing <new> oid")?;
    let name = it.next().ok_or("missing <refname>")?;
    // Refnames can't contain spaces.
    if it.next().is_some() {
        return Err("unexpected tokens after <refname>".into());
    }

    let old = parse_side(old_hex).map_err(|e| format!("invalid old oid '{old_hex}': {e}"))?;
    let new = parse_side(new_hex).map_err(|e| format!("invalid new oid '{new_hex}': {e}"))?;

    // A null side takes the hash kind of the other side so both ids agree.
    let (old, new) = match (old, new) {
        (Some(old), Some(new)) => (old, new),
        (None, Some(new)) => (ObjectId::null(new.kind()), new),
        (Some(old), None) => (old, ObjectId::null(old.kind())),
        (None, None) => {
            let null = ObjectId::null(gix_hash::Kind::Sha1);
            (null, null)
        }
    };
    Ok(RefUpdate::new(old, new, name))
}

/// `None` for the null id, otherwise the decoded object id.
fn parse_side(hex: &str) -> Result<Option<ObjectId>, String> {
    if is_all_zeros(hex) {
        return Ok(None);
    }
    ObjectId::from_hex(hex.as_bytes()).map(Some).map_err(|e| e.to_string())
}

fn is_all_zeros(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b == b'0')
}
