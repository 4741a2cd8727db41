use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShelfError>;

/// All failure conditions of the store, search engine and cache.
#[derive(Debug, Error)]
pub enum ShelfError {
    /// Another writer holds the shelf file.
    #[error("shelf is locked by another writer: {0}")]
    Locked(PathBuf),

    #[error("shelf not found: {0}")]
    NotFound(PathBuf),

    /// The on-disk format is missing, too new, or not a shelf at all.
    #[error("unsupported shelf format in {location} (found version {found})")]
    UnsupportedFormat { location: PathBuf, found: i64 },

    /// The shelf file already exists and cannot be created anew.
    #[error("failed to create shelf: {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("no object with id {0}")]
    ObjectNotFound(i64),

    #[error("no album matching {0}")]
    AlbumNotFound(String),

    #[error("no image with id {0}")]
    ImageNotFound(i64),

    #[error("no image version matching {0}")]
    VersionNotFound(String),

    #[error("no category matching {0}")]
    CategoryNotFound(String),

    #[error("an album tagged {0} already exists")]
    AlbumExists(String),

    #[error("a category tagged {0} already exists")]
    CategoryExists(String),

    /// An image version with the same content hash is already registered,
    /// possibly under a different image.
    #[error("an image version with hash {0} already exists")]
    VersionExists(String),

    #[error("object {object} already has category {tag}")]
    CategoryPresent { object: i64, tag: String },

    #[error("category {parent} is already connected to {child}")]
    AlreadyConnected { parent: i64, child: i64 },

    #[error("connecting category {parent} to {child} would create a loop")]
    WouldCreateLoop { parent: i64, child: i64 },

    #[error("invalid tag: {0:?}")]
    BadTag(String),

    #[error("album {0} cannot be deleted")]
    UndeletableAlbum(String),

    /// The album is virtual and has no explicit member list.
    #[error("children of album {0} cannot be set")]
    UnsettableChildren(String),

    #[error("several image versions are registered at {0}")]
    AmbiguousLocation(PathBuf),

    #[error("unrecognized token at offset {0}")]
    BadToken(usize),

    #[error("unterminated quoted string at offset {0}")]
    UnterminatedString(usize),

    /// A syntactically valid token stream that does not form an expression.
    #[error("parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("cannot decode {path} as an image: {source}")]
    NotAnImage {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShelfError {
    /// Whether this error means an object/album/image/version/category
    /// lookup failed to resolve.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ShelfError::ObjectNotFound(_)
                | ShelfError::AlbumNotFound(_)
                | ShelfError::ImageNotFound(_)
                | ShelfError::VersionNotFound(_)
                | ShelfError::CategoryNotFound(_)
        )
    }
}
