//! Shared data records for the store.
//!
//! These structs are plain rows; all behavior lives on `Shelf`, which is
//! passed explicitly wherever it is needed.

use std::path::{Path, PathBuf};

use crate::error::{Result, ShelfError};

/// Identifier shared by albums and images.
pub type ObjectId = i64;
/// Identifier of a category.
pub type CategoryId = i64;
/// Identifier of an image version.
pub type VersionId = i64;

/// Kind of an album.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumKind {
    /// An ordinary album with an explicit, ordered member list.
    Plain,
    /// Virtual: albums and images that are members of no album.
    Orphans,
    /// Virtual: the result of evaluating the album's `query` attribute.
    Search,
}

impl AlbumKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlbumKind::Plain => "plain",
            AlbumKind::Orphans => "orphans",
            AlbumKind::Search => "search",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(AlbumKind::Plain),
            "orphans" => Ok(AlbumKind::Orphans),
            "search" => Ok(AlbumKind::Search),
            other => Err(ShelfError::BadTag(format!("album kind {other}"))),
        }
    }
}

/// Kind of an image version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Original,
    Important,
    Other,
}

impl VersionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionKind::Original => "original",
            VersionKind::Important => "important",
            VersionKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(VersionKind::Original),
            "important" => Ok(VersionKind::Important),
            "other" => Ok(VersionKind::Other),
            other => Err(ShelfError::BadTag(format!("version kind {other}"))),
        }
    }
}

/// Recorded orientation of an image, as the `orientation` attribute spells
/// it. Anything unrecognized is treated as `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Up,
    Right,
    Down,
    Left,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Up => "up",
            Orientation::Right => "right",
            Orientation::Down => "down",
            Orientation::Left => "left",
        }
    }

    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("right") => Orientation::Right,
            Some("down") => Orientation::Down,
            Some("left") => Orientation::Left,
            _ => Orientation::Up,
        }
    }

    /// Whether the orientation swaps width and height.
    pub fn is_sideways(self) -> bool {
        matches!(self, Orientation::Left | Orientation::Right)
    }
}

/// An album row.
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub id: ObjectId,
    /// Unique human-readable tag.
    pub tag: String,
    /// False only for the root album.
    pub deletable: bool,
    pub kind: AlbumKind,
}

impl Album {
    /// Whether the member list can be replaced with `set_album_children`.
    pub fn is_mutable(&self) -> bool {
        self.kind == AlbumKind::Plain
    }
}

/// An image row.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub id: ObjectId,
    /// The preferred version, if the image has any versions at all.
    pub primary_version: Option<VersionId>,
}

/// An image version row. Content-addressed by `hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVersion {
    pub id: VersionId,
    pub image: ObjectId,
    pub kind: VersionKind,
    /// Hex digest of the file contents; unique across the store.
    pub hash: String,
    /// Directory part of the last known location.
    pub directory: PathBuf,
    /// Filename part of the last known location.
    pub filename: String,
    /// Last known modification time (UNIX epoch seconds).
    pub mtime: i64,
    pub width: u32,
    pub height: u32,
    pub comment: String,
}

impl ImageVersion {
    /// The last known full path of the version file.
    pub fn location(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

/// A category row. The hierarchy lives in `category_child`.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: CategoryId,
    pub tag: String,
    pub description: String,
}

/// An object is either an album or an image.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Album(Album),
    Image(Image),
}

impl Object {
    pub fn id(&self) -> ObjectId {
        match self {
            Object::Album(album) => album.id,
            Object::Image(image) => image.id,
        }
    }

    pub fn is_album(&self) -> bool {
        matches!(self, Object::Album(_))
    }

    pub fn as_album(&self) -> Option<&Album> {
        match self {
            Object::Album(album) => Some(album),
            Object::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Object::Image(image) => Some(image),
            Object::Album(_) => None,
        }
    }
}

/// Verify that a tag is usable for an album: non-empty, no whitespace, no
/// leading `@` and not purely numeric (ids and tags share lookup syntax in
/// client code).
pub fn verify_album_tag(tag: &str) -> Result<()> {
    verify_tag(tag, &[])
}

/// Verify that a tag is usable for a category. Query keywords are refused
/// on top of the album tag rules, since bare category tags appear in search
/// expressions.
pub fn verify_category_tag(tag: &str) -> Result<()> {
    verify_tag(tag, &["and", "exactly", "not", "or"])
}

fn verify_tag(tag: &str, reserved: &[&str]) -> Result<()> {
    let bad = tag.is_empty()
        || tag.starts_with('@')
        || tag.contains(char::is_whitespace)
        || tag.chars().all(|c| c.is_ascii_digit())
        || reserved.contains(&tag);
    if bad {
        Err(ShelfError::BadTag(tag.to_owned()))
    } else {
        Ok(())
    }
}

/// Normalize an arbitrary string into a valid tag.
pub fn make_valid_tag(tag: &str) -> String {
    let mut tag: String = tag
        .trim_start_matches('@')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
        tag.push('_');
    }
    tag
}

/// Split a location into the (directory, filename) pair stored in
/// `image_version`.
pub fn split_location(location: &Path) -> (PathBuf, String) {
    let directory = location.parent().unwrap_or(Path::new("")).to_path_buf();
    let filename = location
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    (directory, filename)
}
