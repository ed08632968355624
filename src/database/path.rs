//! Database paths
//!
//! A path is an ordered list of child keys, descending one level per
//! segment from the database root. Validation happens once, at
//! construction, so every `DatabasePath` in circulation is usable.

use crate::error::{ConfigError, FirebaseError};
use std::fmt;

/// Characters the backend refuses in keys
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Validated location in the database tree
///
/// The empty path is the database root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DatabasePath {
    segments: Vec<String>,
}

impl DatabasePath {
    /// The database root
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments, left to right
    ///
    /// Fails on the first empty or malformed segment; nothing is skipped.
    ///
    /// # Example
    /// ```
    /// use firebase_kit::database::DatabasePath;
    ///
    /// let path = DatabasePath::new(["users", "42"]).unwrap();
    /// assert_eq!(path.depth(), 2);
    /// assert_eq!(path.to_string(), "users/42");
    /// assert!(DatabasePath::new(["users", ""]).is_err());
    /// ```
    pub fn new<I, S>(segments: I) -> Result<Self, FirebaseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = Self::root();
        for (index, segment) in segments.into_iter().enumerate() {
            path.segments.push(validate_segment(index, segment.as_ref())?);
        }
        Ok(path)
    }

    /// Descend one level
    pub fn child(&self, segment: impl AsRef<str>) -> Result<Self, FirebaseError> {
        let segment = validate_segment(self.segments.len(), segment.as_ref())?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    /// Parent path, `None` at the root
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    /// Last segment, `None` at the root
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Check if this is the database root
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Check if `self` equals `other` or lies above it
    pub fn is_ancestor_of(&self, other: &DatabasePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Check if either path contains the other
    pub fn overlaps(&self, other: &DatabasePath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Segments of `other` below `self`, if `self` is an ancestor
    pub fn relative<'a>(&self, other: &'a DatabasePath) -> Option<&'a [String]> {
        other.segments.strip_prefix(self.segments.as_slice())
    }
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.segments.join("/"))
    }
}

fn validate_segment(index: usize, segment: &str) -> Result<String, FirebaseError> {
    if segment.is_empty() {
        return Err(ConfigError::EmptyPathSegment { index }.into());
    }

    let forbidden = segment
        .chars()
        .any(|c| c.is_ascii_control() || FORBIDDEN_KEY_CHARS.contains(&c));
    if forbidden {
        return Err(ConfigError::InvalidPathSegment {
            index,
            segment: segment.to_string(),
        }
        .into());
    }

    Ok(segment.to_string())
}

/// Conversion into a validated [`DatabasePath`]
///
/// Implemented for paths themselves and for arrays, slices and vectors of
/// string-likes, so façade methods accept `["users", "42"]` directly.
pub trait IntoPath {
    /// Validate and convert
    fn into_path(self) -> Result<DatabasePath, FirebaseError>;
}

impl IntoPath for DatabasePath {
    fn into_path(self) -> Result<DatabasePath, FirebaseError> {
        Ok(self)
    }
}

impl IntoPath for &DatabasePath {
    fn into_path(self) -> Result<DatabasePath, FirebaseError> {
        Ok(self.clone())
    }
}

impl<S: AsRef<str>> IntoPath for &[S] {
    fn into_path(self) -> Result<DatabasePath, FirebaseError> {
        DatabasePath::new(self)
    }
}

impl<S: AsRef<str>, const N: usize> IntoPath for [S; N] {
    fn into_path(self) -> Result<DatabasePath, FirebaseError> {
        DatabasePath::new(self)
    }
}

impl<S: AsRef<str>> IntoPath for Vec<S> {
    fn into_path(self) -> Result<DatabasePath, FirebaseError> {
        DatabasePath::new(self)
    }
}
