//! photoshelf: a metadata database for photographs.
//!
//! The shelf is a single SQLite file holding albums, images, image
//! versions, free-form attributes and a category hierarchy. All reads and
//! writes happen inside explicit transactions on an open [`Shelf`] handle.
//! Queries in a small boolean language are parsed by [`search`] and
//! evaluated inside SQLite, and scaled derivative images are produced on
//! demand by the content-addressed [`cache`].
//!
//! [`Shelf`]: store::Shelf

pub mod cache;
pub mod config;
pub mod dag;
pub mod error;
pub mod search;
pub mod store;

pub use cache::{ImageCache, SourceImage};
pub use config::Config;
pub use error::{Result, ShelfError};
pub use store::{
    compute_image_hash, Album, AlbumKind, Category, Image, ImageVersion, Object, Orientation,
    Shelf, VersionKind, FORMAT_VERSION, ROOT_ALBUM_ID,
};
