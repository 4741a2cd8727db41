//! Content-addressed cache of scaled derivative images.
//!
//! A derivative is identified by the source content hash, the requested
//! size limit and the applied orientation, so its cache filename is
//! deterministic and a repeated request is a plain file-existence check.
//! Files are sharded into a two-level directory tree keyed by the first
//! two characters of the filename to keep directories small.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};

use crate::error::{Result, ShelfError};
use crate::store::shelf::Shelf;
use crate::store::types::{ImageVersion, Orientation};

const DERIVATIVE_EXT: &str = "jpg";

/// What the cache needs to know about a source image. Decoupled from the
/// store so generated files can outlive any particular shelf session.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub location: PathBuf,
    pub hash: String,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

impl SourceImage {
    /// Build a cache source from a stored image version, picking up the
    /// owning image's `orientation` attribute.
    pub fn for_version(shelf: &Shelf, version: &ImageVersion) -> Result<SourceImage> {
        let orientation = shelf
            .get_attribute(version.image, "orientation")?
            .map(|value| Orientation::from_attribute(Some(&value)))
            .unwrap_or_default();
        Ok(SourceImage {
            location: version.location(),
            hash: version.hash.clone(),
            width: version.width,
            height: version.height,
            orientation,
        })
    }
}

pub struct ImageCache {
    root: PathBuf,
    use_orientation: bool,
}

impl ImageCache {
    /// Open a cache rooted at `root`, creating the directory if needed.
    /// When `use_orientation` is false all derivatives are generated
    /// unrotated.
    pub fn new(root: impl Into<PathBuf>, use_orientation: bool) -> Result<ImageCache> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ImageCache {
            root,
            use_orientation,
        })
    }

    pub fn location(&self) -> &Path {
        &self.root
    }

    /// Path to a derivative of `source` whose largest dimension is at most
    /// `size_limit`, generating it if it is not cached yet.
    ///
    /// Generation prefers cheap routes: an existing derivative with the
    /// same content is referenced by symlink (copy where symlinks are
    /// unavailable), and a smaller derivative is downscaled from the
    /// smallest cached one that is still large enough. Only when neither
    /// exists is the original decoded.
    pub fn get(&self, source: &SourceImage, size_limit: u32) -> Result<PathBuf> {
        let orientation = self.effective_orientation(source);
        let filename = derivative_filename(&source.hash, size_limit, orientation);
        let path = self.bucket_path(&filename)?;
        if path.exists() {
            return Ok(path);
        }

        let (oriented_width, oriented_height) = if orientation.is_sideways() {
            (source.height, source.width)
        } else {
            (source.width, source.height)
        };
        let needs_scaling = oriented_width.max(oriented_height) > size_limit;

        if !needs_scaling {
            // The derivative has the source's full dimensions; reference
            // an existing file with identical content instead of
            // re-encoding.
            if let Some(existing) = self.find_derivative(
                &source.hash,
                orientation,
                oriented_width.max(oriented_height),
            )? {
                symlink_or_copy(&existing, &path)?;
                return Ok(path);
            }
            if orientation == Orientation::Up {
                let original = fs::canonicalize(&source.location)?;
                symlink_or_copy(&original, &path)?;
                return Ok(path);
            }
        }

        let decoded = if needs_scaling {
            match self.find_derivative(&source.hash, orientation, size_limit)? {
                // Already oriented; just scale down.
                Some(base) => decode(&base)?,
                None => orient(decode(&source.location)?, orientation),
            }
        } else {
            orient(decode(&source.location)?, orientation)
        };
        let derivative = if needs_scaling {
            decoded.resize(size_limit, size_limit, FilterType::Lanczos3)
        } else {
            decoded
        };
        write_atomically(&derivative, &path)?;
        debug!(
            hash = %source.hash,
            size_limit,
            orientation = orientation.as_str(),
            path = %path.display(),
            "generated derivative"
        );
        Ok(path)
    }

    /// Delete every cache file that is not a derivative of `keep` at one
    /// of `sizes`, then prune empty bucket directories. Callers coordinate
    /// any concurrent `get` traffic themselves.
    pub fn cleanup(&self, keep: &[SourceImage], sizes: &[u32]) -> Result<()> {
        let mut expected = std::collections::HashSet::new();
        for source in keep {
            let orientation = self.effective_orientation(source);
            for &size in sizes {
                expected.insert(derivative_filename(&source.hash, size, orientation));
            }
        }

        let mut removed = 0usize;
        for entry in walkdir::WalkDir::new(&self.root).contents_first(true) {
            let entry = entry.map_err(io_from_walkdir)?;
            if entry.file_type().is_dir() {
                if entry.path() != self.root {
                    // Only empty buckets go away.
                    let _ = fs::remove_dir(entry.path());
                }
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !expected.contains(name.as_ref()) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        info!(removed, kept = expected.len(), "cache cleanup finished");
        Ok(())
    }

    fn effective_orientation(&self, source: &SourceImage) -> Orientation {
        if self.use_orientation {
            source.orientation
        } else {
            Orientation::Up
        }
    }

    /// The bucketed path for `filename`, with its directories created.
    fn bucket_path(&self, filename: &str) -> Result<PathBuf> {
        let mut chars = filename.chars();
        let c0 = chars.next().unwrap_or('0');
        let c1 = chars.next().unwrap_or('0');
        let dir = self.root.join(c0.to_string()).join(c1.to_string());
        fs::create_dir_all(&dir)?;
        Ok(dir.join(filename))
    }

    /// The smallest cached derivative of `hash`/`orientation` whose size
    /// limit is at least `min_limit`. All derivatives of one hash share a
    /// bucket, so one directory scan suffices.
    fn find_derivative(
        &self,
        hash: &str,
        orientation: Orientation,
        min_limit: u32,
    ) -> Result<Option<PathBuf>> {
        let mut chars = hash.chars();
        let (Some(c0), Some(c1)) = (chars.next(), chars.next()) else {
            return Ok(None);
        };
        let dir = self.root.join(c0.to_string()).join(c1.to_string());
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut best: Option<(u32, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some((entry_hash, limit, entry_orientation)) =
                parse_derivative_filename(&name)
            else {
                continue;
            };
            if entry_hash != hash || entry_orientation != orientation || limit < min_limit {
                continue;
            }
            if best.as_ref().map_or(true, |(l, _)| limit < *l) {
                best = Some((limit, entry.path()));
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}

fn derivative_filename(hash: &str, size_limit: u32, orientation: Orientation) -> String {
    format!(
        "{hash}-{size_limit}-{}.{DERIVATIVE_EXT}",
        orientation.as_str()
    )
}

/// Split `hash-limit-orientation.jpg` back into its parts. Hashes are hex
/// and contain no dash, so splitting from the right is unambiguous.
fn parse_derivative_filename(name: &str) -> Option<(&str, u32, Orientation)> {
    let stem = name.strip_suffix(&format!(".{DERIVATIVE_EXT}"))?;
    let (rest, orientation) = stem.rsplit_once('-')?;
    let (hash, limit) = rest.rsplit_once('-')?;
    let orientation = match orientation {
        "up" => Orientation::Up,
        "right" => Orientation::Right,
        "down" => Orientation::Down,
        "left" => Orientation::Left,
        _ => return None,
    };
    Some((hash, limit.parse().ok()?, orientation))
}

fn decode(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| ShelfError::NotAnImage {
        path: path.to_path_buf(),
        source,
    })
}

fn orient(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Up => img,
        Orientation::Right => img.rotate90(),
        Orientation::Down => img.rotate180(),
        Orientation::Left => img.rotate270(),
    }
}

/// Save via a temporary sibling so a concurrent reader never sees a
/// half-written derivative.
fn write_atomically(img: &DynamicImage, path: &Path) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let saved = img
        .to_rgb8()
        .save_with_format(&tmp, ImageFormat::Jpeg)
        .map_err(|source| ShelfError::NotAnImage {
            path: path.to_path_buf(),
            source,
        });
    if let Err(err) = saved {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Point `dest` at `source` without duplicating bytes where the platform
/// allows it.
fn symlink_or_copy(source: &Path, dest: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(source, dest).is_ok() {
            return Ok(());
        }
    }
    fs::copy(source, dest).map(|_| ())
}

fn io_from_walkdir(err: walkdir::Error) -> ShelfError {
    ShelfError::Io(err.into_io_error().unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "walk interrupted")
    }))
}

/// Convenience for callers holding a shelf: resolve the version, read its
/// orientation and fetch the derivative in one step.
pub fn derivative_for_version(
    cache: &ImageCache,
    shelf: &Shelf,
    version: &ImageVersion,
    size_limit: u32,
) -> Result<PathBuf> {
    let source = SourceImage::for_version(shelf, version)?;
    cache.get(&source, size_limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_round_trip() {
        let name = derivative_filename("ab12cd", 300, Orientation::Left);
        assert_eq!(name, "ab12cd-300-left.jpg");
        assert_eq!(
            parse_derivative_filename(&name),
            Some(("ab12cd", 300, Orientation::Left))
        );
    }

    #[test]
    fn malformed_filenames_are_ignored() {
        assert_eq!(parse_derivative_filename("notacachefile"), None);
        assert_eq!(parse_derivative_filename("ab12cd-300-left.png"), None);
        assert_eq!(parse_derivative_filename("ab12cd-left.jpg"), None);
        assert_eq!(parse_derivative_filename("ab12cd-x-left.jpg"), None);
        assert_eq!(parse_derivative_filename("ab12cd-300-sideways.jpg"), None);
    }
}
