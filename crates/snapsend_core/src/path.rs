//! Growable path buffer that can be built from either end.

use std::fmt;

/// Initial buffer size; most paths fit without growing.
const INLINE_CAPACITY: usize = 256;

/// A `/`-separated path assembled from name components.
///
/// In normal mode components are appended. In reversed mode they are
/// prepended, which lets a resolver walk from a leaf up to the root and emit
/// each name as it goes without re-copying the path on every step. The
/// content always reads in path order; [`unreverse`](Self::unreverse) only
/// switches which end grows.
///
/// # Example
///
/// ```rust
/// use snapsend_core::PathBuilder;
///
/// let mut path = PathBuilder::reversed();
/// path.push(b"c");
/// path.push(b"b");
/// path.push(b"a");
/// path.unreverse();
/// path.push(b"d");
/// assert_eq!(path.as_bytes(), b"a/b/c/d");
/// ```
#[derive(Clone)]
pub struct PathBuilder {
    buf: Vec<u8>,
    start: usize,
    end: usize,
    reversed: bool,
}

impl Default for PathBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathBuilder {
    /// Creates an empty path that grows to the right.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: vec![0; INLINE_CAPACITY],
            start: 0,
            end: 0,
            reversed: false,
        }
    }

    /// Creates an empty path that grows to the left.
    #[must_use]
    pub fn reversed() -> Self {
        Self {
            buf: vec![0; INLINE_CAPACITY],
            start: INLINE_CAPACITY,
            end: INLINE_CAPACITY,
            reversed: true,
        }
    }

    /// Creates a right-growing path holding `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut path = Self::new();
        path.set(bytes);
        path
    }

    /// Returns true if components are prepended.
    #[must_use]
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the path is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The path bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Copies the path bytes out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Empties the path, keeping its mode and allocation.
    pub fn reset(&mut self) {
        if self.reversed {
            self.start = self.buf.len();
            self.end = self.buf.len();
        } else {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Replaces the content with `bytes`.
    pub fn set(&mut self, bytes: &[u8]) {
        self.reset();
        self.insert(bytes);
    }

    /// Adds one name component at the growing end.
    pub fn push(&mut self, name: &[u8]) {
        if !self.is_empty() {
            self.insert(b"/");
        }
        self.insert(name);
    }

    /// Adds every component of `other` at the growing end.
    pub fn push_path(&mut self, other: &PathBuilder) {
        self.push(other.as_bytes());
    }

    /// Removes the last component (in path order).
    pub fn pop(&mut self) {
        let cut = self
            .as_bytes()
            .iter()
            .rposition(|&b| b == b'/')
            .unwrap_or(0);
        self.end = self.start + cut;
    }

    /// Splits into `(directory, name)` at the last separator.
    #[must_use]
    pub fn split_last(&self) -> (&[u8], &[u8]) {
        let bytes = self.as_bytes();
        match bytes.iter().rposition(|&b| b == b'/') {
            Some(pos) => (&bytes[..pos], &bytes[pos + 1..]),
            None => (&bytes[..0], bytes),
        }
    }

    /// Returns true if the path is a strict descendant of `dir`.
    #[must_use]
    pub fn is_below(&self, dir: &[u8]) -> bool {
        let bytes = self.as_bytes();
        bytes.len() > dir.len() && bytes.starts_with(dir) && bytes[dir.len()] == b'/'
    }

    /// Moves the path from below `from` to below `to`. Returns false and
    /// leaves the path alone unless it is a strict descendant of `from`.
    pub fn rebase(&mut self, from: &[u8], to: &[u8]) -> bool {
        if !self.is_below(from) {
            return false;
        }
        let mut rebased = to.to_vec();
        rebased.extend_from_slice(&self.as_bytes()[from.len()..]);
        self.set(&rebased);
        true
    }

    /// Switches a reversed path to normal mode without changing its content.
    pub fn unreverse(&mut self) {
        if !self.reversed {
            return;
        }
        let len = self.len();
        self.buf.copy_within(self.start..self.end, 0);
        self.start = 0;
        self.end = len;
        self.reversed = false;
    }

    fn insert(&mut self, bytes: &[u8]) {
        let n = bytes.len();
        if self.reversed {
            if self.start < n {
                self.grow_front(n);
            }
            self.start -= n;
            self.buf[self.start..self.start + n].copy_from_slice(bytes);
        } else {
            if self.buf.len() - self.end < n {
                let want = (self.buf.len() * 2).max(self.end + n);
                self.buf.resize(want, 0);
            }
            self.buf[self.end..self.end + n].copy_from_slice(bytes);
            self.end += n;
        }
    }

    fn grow_front(&mut self, needed: usize) {
        let len = self.len();
        let cap = (self.buf.len() * 2).max(len + needed);
        let mut buf = vec![0; cap];
        buf[cap - len..].copy_from_slice(self.as_bytes());
        self.buf = buf;
        self.start = cap - len;
        self.end = cap;
    }
}

impl PartialEq for PathBuilder {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PathBuilder {}

impl fmt::Debug for PathBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathBuilder({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Display for PathBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}
