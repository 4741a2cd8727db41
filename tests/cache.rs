mod common;

use photoshelf::cache::{derivative_for_version, ImageCache, SourceImage};
use photoshelf::store::VersionKind;
use photoshelf::ShelfError;

use common::{new_shelf, write_test_image};

fn fixture_source(
    dir: &std::path::Path,
    shelf: &mut photoshelf::Shelf,
    name: &str,
    tint: u8,
) -> SourceImage {
    let image = shelf.create_image().unwrap();
    let path = write_test_image(dir, name, 60, 40, tint);
    let version = shelf
        .create_image_version(image.id, &path, VersionKind::Original)
        .unwrap();
    SourceImage::for_version(shelf, &version).unwrap()
}

#[test]
fn derivatives_are_scaled_within_the_limit() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let source = fixture_source(dir.path(), &mut shelf, "photo.png", 1);
    let cache = ImageCache::new(dir.path().join("cache"), false).unwrap();

    let path = cache.get(&source, 30).unwrap();
    assert_eq!(image::image_dimensions(&path).unwrap(), (30, 20));
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(&source.hash));
    shelf.rollback().unwrap();
}

#[test]
fn repeated_requests_hit_the_cache() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let source = fixture_source(dir.path(), &mut shelf, "photo.png", 1);
    let cache = ImageCache::new(dir.path().join("cache"), false).unwrap();

    let first = cache.get(&source, 30).unwrap();
    let mtime = std::fs::metadata(&first).unwrap().modified().unwrap();
    let second = cache.get(&source, 30).unwrap();
    assert_eq!(first, second);
    assert_eq!(std::fs::metadata(&second).unwrap().modified().unwrap(), mtime);
    shelf.rollback().unwrap();
}

#[test]
fn files_are_bucketed_by_filename_prefix() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let source = fixture_source(dir.path(), &mut shelf, "photo.png", 1);
    let root = dir.path().join("cache");
    let cache = ImageCache::new(&root, false).unwrap();

    let path = cache.get(&source, 30).unwrap();
    let mut chars = source.hash.chars();
    let expected_dir = root
        .join(chars.next().unwrap().to_string())
        .join(chars.next().unwrap().to_string());
    assert_eq!(path.parent().unwrap(), expected_dir);
    shelf.rollback().unwrap();
}

#[test]
fn fitting_requests_reference_the_original() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let source = fixture_source(dir.path(), &mut shelf, "photo.png", 1);
    let cache = ImageCache::new(dir.path().join("cache"), false).unwrap();

    // 60x40 already fits; the derivative has the original's bytes.
    let path = cache.get(&source, 100).unwrap();
    assert_eq!(image::image_dimensions(&path).unwrap(), (60, 40));
    assert_eq!(
        std::fs::read(&path).unwrap(),
        std::fs::read(&source.location).unwrap()
    );
    shelf.rollback().unwrap();
}

#[test]
fn smaller_derivatives_come_from_larger_ones() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let source = fixture_source(dir.path(), &mut shelf, "photo.png", 1);
    let cache = ImageCache::new(dir.path().join("cache"), false).unwrap();

    cache.get(&source, 50).unwrap();
    // With the original gone, only the cached base can serve this.
    std::fs::remove_file(&source.location).unwrap();
    let path = cache.get(&source, 25).unwrap();
    let (w, h) = image::image_dimensions(&path).unwrap();
    assert!(w.max(h) <= 25);

    // Upscaling past the largest derivative needs the original again.
    assert!(matches!(
        cache.get(&source, 55),
        Err(ShelfError::Io(_) | ShelfError::NotAnImage { .. })
    ));
    shelf.rollback().unwrap();
}

#[test]
fn orientation_is_applied_before_scaling() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let image = shelf.create_image().unwrap();
    let path = write_test_image(dir.path(), "photo.png", 60, 40, 1);
    let version = shelf
        .create_image_version(image.id, &path, VersionKind::Original)
        .unwrap();
    shelf.set_attribute(image.id, "orientation", "left").unwrap();

    let cache = ImageCache::new(dir.path().join("cache"), true).unwrap();
    let derivative = derivative_for_version(&cache, &shelf, &version, 30).unwrap();
    // Rotated to 40x60, then scaled.
    assert_eq!(image::image_dimensions(&derivative).unwrap(), (20, 30));
    assert!(derivative.to_string_lossy().contains("-left."));

    // An ignoring cache produces an unrotated derivative.
    let plain_cache = ImageCache::new(dir.path().join("plain"), false).unwrap();
    let plain = derivative_for_version(&plain_cache, &shelf, &version, 30).unwrap();
    assert_eq!(image::image_dimensions(&plain).unwrap(), (30, 20));
    shelf.rollback().unwrap();
}

#[test]
fn cleanup_removes_everything_not_kept() {
    let (dir, mut shelf) = new_shelf();
    shelf.begin().unwrap();
    let kept = fixture_source(dir.path(), &mut shelf, "kept.png", 1);
    let dropped = fixture_source(dir.path(), &mut shelf, "dropped.png", 2);
    let cache = ImageCache::new(dir.path().join("cache"), false).unwrap();

    let kept_small = cache.get(&kept, 25).unwrap();
    let kept_large = cache.get(&kept, 50).unwrap();
    let dropped_small = cache.get(&dropped, 25).unwrap();
    let dropped_large = cache.get(&dropped, 50).unwrap();

    cache.cleanup(&[kept.clone()], &[25]).unwrap();
    assert!(kept_small.exists());
    assert!(!kept_large.exists());
    assert!(!dropped_small.exists());
    assert!(!dropped_large.exists());
    // The dropped image's bucket directory is pruned unless the kept one
    // shares it.
    if kept.hash[..2] != dropped.hash[..2] {
        assert!(!dropped_large.parent().unwrap().exists());
    }

    // Kept derivatives are still served without regeneration.
    let mtime = std::fs::metadata(&kept_small).unwrap().modified().unwrap();
    assert_eq!(cache.get(&kept, 25).unwrap(), kept_small);
    assert_eq!(
        std::fs::metadata(&kept_small).unwrap().modified().unwrap(),
        mtime
    );
    shelf.rollback().unwrap();
}
