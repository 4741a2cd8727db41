//! The transactional object store: albums, images, image versions,
//! attributes and categories on a single SQLite file.

pub mod schema;
pub mod shelf;
pub mod types;
pub mod upgrade;

pub use schema::{FORMAT_VERSION, ROOT_ALBUM_ID};
pub use shelf::{compute_image_hash, Shelf, Statistics};
pub use types::{
    make_valid_tag, verify_album_tag, verify_category_tag, Album, AlbumKind, Category, CategoryId,
    Image, ImageVersion, Object, ObjectId, Orientation, VersionId, VersionKind,
};
