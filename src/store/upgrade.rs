//! Migration of legacy shelf databases to the current format.
//!
//! The upgrade never rewrites the old file in place: a fresh database with
//! the current schema is built next to it, rows are copied over with the
//! necessary shape adaptations, and only after a successful commit is the
//! old file renamed to a timestamped backup and the new file moved into its
//! place. Any earlier failure leaves the original untouched.

use std::path::{Path, PathBuf};

use chrono::Local;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use tracing::info;

use crate::error::{Result, ShelfError};
use crate::store::schema::{FORMAT_VERSION, OLDEST_UPGRADABLE_VERSION, SCHEMA};

/// Whether the database at `location` is in a legacy format this module
/// can migrate.
pub fn is_upgradable(location: &Path) -> Result<bool> {
    let version = read_version(location)?;
    Ok(version >= OLDEST_UPGRADABLE_VERSION && version < FORMAT_VERSION)
}

/// Try to upgrade the database at `location` to `to_version`.
///
/// Returns `Ok(false)` if the stored format is too old to migrate. On
/// success the original file remains available as
/// `<location>-backup-<timestamp>`.
pub fn try_upgrade(location: &Path, to_version: i64) -> Result<bool> {
    let from_version = read_version(location)?;
    if from_version < OLDEST_UPGRADABLE_VERSION {
        return Ok(false);
    }
    if from_version >= to_version {
        return Ok(true);
    }

    let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let new_location = sibling(location, &format!("-new-{timestamp}"));

    let copied = copy_to_new_format(location, &new_location, to_version);
    if let Err(err) = copied {
        // The original has not been touched; just drop the half-built file.
        let _ = std::fs::remove_file(&new_location);
        return Err(err);
    }

    let backup_location = sibling(location, &format!("-backup-{timestamp}"));
    std::fs::rename(location, &backup_location)?;
    std::fs::rename(&new_location, location)?;
    info!(
        location = %location.display(),
        backup = %backup_location.display(),
        from_version,
        to_version,
        "upgraded shelf"
    );
    Ok(true)
}

/// Build a current-format database at `new_location` from the legacy file.
fn copy_to_new_format(location: &Path, new_location: &Path, to_version: i64) -> Result<()> {
    let conn = Connection::open(new_location)?;
    conn.execute_batch(&format!("BEGIN;{SCHEMA}COMMIT;"))?;
    conn.execute(
        "ATTACH DATABASE ?1 AS old",
        [location.to_string_lossy()],
    )?;
    conn.execute_batch("BEGIN")?;

    // Identically shaped tables copy straight across.
    for table in [
        "dbinfo",
        "object",
        "album",
        "member",
        "attribute",
        "category",
        "category_child",
        "object_category",
    ] {
        conn.execute_batch(&format!("INSERT INTO {table} SELECT * FROM old.{table}"))?;
    }

    // The legacy format kept one flat row per image; split it into an
    // image row plus an explicit original version carrying the file
    // metadata.
    conn.execute_batch(
        "INSERT INTO image (id, primary_version)
         SELECT imageid, imageid FROM old.image;
         INSERT INTO image_version
             (id, image, type, comment, hash, directory, filename,
              mtime, width, height)
         SELECT imageid, imageid, 'original', '', hash, directory, filename,
                mtime, width, height
         FROM old.image;",
    )?;

    // Legacy synthetic all-albums/all-images albums are computed now, not
    // persisted; drop their rows and every reference to them.
    let mut stmt =
        conn.prepare("SELECT id FROM album WHERE type IN ('allalbums', 'allimages')")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let legacy_ids: Vec<i64> = rows.collect::<rusqlite::Result<_>>()?;
    drop(stmt);
    if !legacy_ids.is_empty() {
        let ph: Vec<&str> = legacy_ids.iter().map(|_| "?").collect();
        let ph = ph.join(",");
        for sql in [
            format!("DELETE FROM album WHERE id IN ({ph})"),
            format!("DELETE FROM object WHERE id IN ({ph})"),
            format!("DELETE FROM member WHERE album IN ({ph})"),
            format!("DELETE FROM member WHERE object IN ({ph})"),
            format!("DELETE FROM attribute WHERE object IN ({ph})"),
        ] {
            conn.execute(&sql, params_from_iter(legacy_ids.iter()))?;
        }
    }

    conn.execute("UPDATE dbinfo SET version = ?1", [to_version])?;
    conn.execute_batch("COMMIT")?;
    Ok(())
}

fn read_version(location: &Path) -> Result<i64> {
    if !location.exists() {
        return Err(ShelfError::NotFound(location.to_path_buf()));
    }
    let conn = Connection::open(location)?;
    conn.busy_timeout(std::time::Duration::ZERO)?;
    conn.query_row("SELECT version FROM dbinfo", [], |row| row.get(0))
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked =>
            {
                ShelfError::Locked(location.to_path_buf())
            }
            _ => ShelfError::UnsupportedFormat {
                location: location.to_path_buf(),
                found: 0,
            },
        })
}

/// `location` with a suffix appended to the file name.
fn sibling(location: &Path, suffix: &str) -> PathBuf {
    let mut name = location.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
