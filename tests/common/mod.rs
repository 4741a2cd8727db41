#![allow(dead_code)]

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use photoshelf::store::{AlbumKind, ObjectId, Shelf, VersionKind};

/// A fresh shelf in a temporary directory. The directory handle keeps the
/// files alive for the duration of the test.
pub fn new_shelf() -> (tempfile::TempDir, Shelf) {
    let dir = tempfile::tempdir().unwrap();
    let shelf = Shelf::create(&dir.path().join("shelf")).unwrap();
    (dir, shelf)
}

/// Write a decodable test image. `tint` makes the bytes (and therefore the
/// content hash) unique per image.
pub fn write_test_image(dir: &Path, name: &str, width: u32, height: u32, tint: u8) -> PathBuf {
    let path = dir.join(name);
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([tint, (x % 256) as u8, (y % 256) as u8])
    });
    img.save(&path).unwrap();
    path
}

/// Ids of the standard fixture contents.
pub struct Fixture {
    pub image0: ObjectId,
    pub image1: ObjectId,
    pub alpha: ObjectId,
    pub beta: ObjectId,
    pub cat_a: i64,
    pub cat_b: i64,
    pub cat_c: i64,
    pub cat_d: i64,
}

/// Populate a shelf with the standard fixture:
///
/// * albums `alpha` (members: image0, beta) and `beta` (members: image1)
/// * categories `a` -> {`b`, `c`}, `b` -> `d`, `c` -> `d`
/// * image0 categorized `b` with attributes foo=abc, bar=17
/// * image1 categorized `c`
///
/// Expects an open transaction.
pub fn build_fixture(dir: &Path, shelf: &mut Shelf) -> Fixture {
    let image0 = shelf.create_image().unwrap().id;
    let path0 = write_test_image(dir, "image0.png", 64, 48, 10);
    shelf
        .create_image_version(image0, &path0, VersionKind::Original)
        .unwrap();
    let image1 = shelf.create_image().unwrap().id;
    let path1 = write_test_image(dir, "image1.png", 64, 48, 20);
    shelf
        .create_image_version(image1, &path1, VersionKind::Original)
        .unwrap();

    let alpha = shelf.create_album("alpha", AlbumKind::Plain).unwrap().id;
    let beta = shelf.create_album("beta", AlbumKind::Plain).unwrap().id;
    shelf.set_album_children(alpha, &[image0, beta]).unwrap();
    shelf.set_album_children(beta, &[image1]).unwrap();

    let cat_a = shelf.create_category("a", "A").unwrap().id;
    let cat_b = shelf.create_category("b", "B").unwrap().id;
    let cat_c = shelf.create_category("c", "C").unwrap().id;
    let cat_d = shelf.create_category("d", "D").unwrap().id;
    shelf.connect_categories(cat_a, cat_b).unwrap();
    shelf.connect_categories(cat_a, cat_c).unwrap();
    shelf.connect_categories(cat_b, cat_d).unwrap();
    shelf.connect_categories(cat_c, cat_d).unwrap();

    shelf.add_object_category(image0, cat_b).unwrap();
    shelf.add_object_category(image1, cat_c).unwrap();
    shelf.set_attribute(image0, "foo", "abc").unwrap();
    shelf.set_attribute(image0, "bar", "17").unwrap();

    Fixture {
        image0,
        image1,
        alpha,
        beta,
        cat_a,
        cat_b,
        cat_c,
        cat_d,
    }
}
