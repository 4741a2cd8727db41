//! The transactional object store.
//!
//! A `Shelf` is an explicit handle to one metadata database. All mutation
//! happens inside an open transaction; nothing is durable until `commit`.
//! There is no ambient global state: callers thread the handle through the
//! search engine and cache themselves.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::dag::Dag;
use crate::error::{Result, ShelfError};
use crate::search;
use crate::store::schema::{FORMAT_VERSION, ROOT_ALBUM_ID, SCHEMA};
use crate::store::types::{
    split_location, verify_album_tag, verify_category_tag, Album, AlbumKind, Category, CategoryId,
    Image, ImageVersion, Object, ObjectId, VersionId, VersionKind,
};

/// Counts of the things stored in a shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub albums: i64,
    pub images: i64,
    pub image_versions: i64,
    pub categories: i64,
}

/// Compute the canonical content hash for an image file: the SHA-256 hex
/// digest of its bytes.
pub fn compute_image_hash(location: &Path) -> Result<String> {
    let mut file = File::open(location)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A handle to an open shelf database.
pub struct Shelf {
    conn: Connection,
    location: PathBuf,
    in_transaction: bool,
    modified: bool,
    /// Lazily built category DAG, dropped whenever the transaction ends or
    /// categories are structurally modified from outside.
    category_dag: Option<Dag>,
}

impl Shelf {
    /// Create a new shelf at `location` and return an open handle.
    ///
    /// Seeds the root album (id 0), an `orphans` album and the default
    /// categories.
    pub fn create(location: &Path) -> Result<Shelf> {
        if location.exists() {
            return Err(ShelfError::AlreadyExists(location.to_path_buf()));
        }
        let conn = Connection::open(location)?;
        conn.busy_timeout(std::time::Duration::ZERO)?;
        conn.execute_batch(&format!("BEGIN;{SCHEMA}COMMIT;"))?;

        let mut shelf = Shelf {
            conn,
            location: location.to_path_buf(),
            in_transaction: false,
            modified: false,
            category_dag: None,
        };
        shelf.begin()?;
        shelf
            .conn
            .execute("INSERT INTO dbinfo (version) VALUES (?1)", [FORMAT_VERSION])?;
        shelf
            .conn
            .execute("INSERT INTO object (id) VALUES (?1)", [ROOT_ALBUM_ID])?;
        shelf.conn.execute(
            "INSERT INTO album (id, tag, deletable, type) VALUES (?1, 'root', 0, 'plain')",
            [ROOT_ALBUM_ID],
        )?;
        shelf.set_attribute(ROOT_ALBUM_ID, "title", "Root album")?;
        let orphans = shelf.create_album("orphans", AlbumKind::Orphans)?;
        shelf.set_attribute(orphans.id, "title", "Orphans")?;
        shelf.set_attribute(
            orphans.id,
            "description",
            "This album contains albums and images that are not linked from any album.",
        )?;
        shelf.set_album_children(ROOT_ALBUM_ID, &[orphans.id])?;
        shelf.create_category("events", "Events")?;
        shelf.create_category("locations", "Locations")?;
        shelf.create_category("people", "People")?;
        shelf.commit()?;
        info!(location = %location.display(), "created shelf");
        Ok(shelf)
    }

    /// Open an existing shelf.
    ///
    /// Fails with `UnsupportedFormat` if the stored schema version differs
    /// from the current one; an older shelf must be upgraded explicitly
    /// first (see `store::upgrade`).
    pub fn open(location: &Path) -> Result<Shelf> {
        if !location.exists() {
            return Err(ShelfError::NotFound(location.to_path_buf()));
        }
        let conn = Connection::open(location)?;
        conn.busy_timeout(std::time::Duration::ZERO)?;
        let version: i64 = conn
            .query_row("SELECT version FROM dbinfo", [], |row| row.get(0))
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
            })?;
        if version != FORMAT_VERSION {
            return Err(ShelfError::UnsupportedFormat {
                location: location.to_path_buf(),
                found: version,
            });
        }
        debug!(location = %location.display(), "opened shelf");
        Ok(Shelf {
            conn,
            location: location.to_path_buf(),
            in_transaction: false,
            modified: false,
            category_dag: None,
        })
    }

    /// Where the database file lives.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Begin a transaction, taking the single writer slot.
    ///
    /// If another writer is active the call fails immediately with
    /// `Locked`; there is no queueing or retry.
    pub fn begin(&mut self) -> Result<()> {
        assert!(!self.in_transaction, "transaction already open");
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(e, _)
                    if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked =>
                {
                    ShelfError::Locked(self.location.clone())
                }
                other => ShelfError::Sqlite(other),
            })?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction.
    pub fn commit(&mut self) -> Result<()> {
        assert!(self.in_transaction, "no open transaction");
        let result = self.conn.execute_batch("COMMIT");
        self.end_transaction();
        result?;
        debug!("committed");
        Ok(())
    }

    /// Abort the open transaction; uncommitted changes are discarded.
    pub fn rollback(&mut self) -> Result<()> {
        assert!(self.in_transaction, "no open transaction");
        let result = self.conn.execute_batch("ROLLBACK");
        self.end_transaction();
        result?;
        Ok(())
    }

    /// Whether the open transaction has made changes.
    pub fn is_modified(&self) -> bool {
        assert!(self.in_transaction, "no open transaction");
        self.modified
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.modified = false;
        self.category_dag = None;
    }

    fn set_modified(&mut self) {
        self.modified = true;
    }

    pub(crate) fn connection(&self) -> &Connection {
        assert!(self.in_transaction, "no open transaction");
        &self.conn
    }

    // ---------------------------------------------------------------
    // Albums

    /// Create an empty, orphaned album.
    pub fn create_album(&mut self, tag: &str, kind: AlbumKind) -> Result<Album> {
        assert!(self.in_transaction, "no open transaction");
        verify_album_tag(tag)?;
        self.conn.execute("INSERT INTO object (id) VALUES (NULL)", [])?;
        let id = self.conn.last_insert_rowid();
        let inserted = self.conn.execute(
            "INSERT INTO album (id, tag, deletable, type) VALUES (?1, ?2, 1, ?3)",
            params![id, tag, kind.as_str()],
        );
        if let Err(err) = inserted {
            // Undo the orphaned object row before reporting the duplicate.
            self.conn.execute("DELETE FROM object WHERE id = ?1", [id])?;
            if is_constraint_violation(&err) {
                return Err(ShelfError::AlbumExists(tag.to_owned()));
            }
            return Err(err.into());
        }
        self.set_modified();
        self.album(id)
    }

    /// Get an album by id.
    pub fn album(&self, id: ObjectId) -> Result<Album> {
        assert!(self.in_transaction, "no open transaction");
        let row = self
            .conn
            .query_row(
                "SELECT id, tag, deletable, type FROM album WHERE id = ?1",
                [id],
                album_from_row,
            )
            .optional()?;
        match row {
            Some(album) => album,
            None => Err(ShelfError::AlbumNotFound(format!("id {id}"))),
        }
    }

    /// Get an album by its unique tag.
    pub fn album_by_tag(&self, tag: &str) -> Result<Album> {
        assert!(self.in_transaction, "no open transaction");
        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM album WHERE tag = ?1", [tag], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => self.album(id),
            None => Err(ShelfError::AlbumNotFound(tag.to_owned())),
        }
    }

    /// The non-deletable root album.
    pub fn root_album(&self) -> Result<Album> {
        self.album(ROOT_ALBUM_ID)
    }

    /// All albums, unsorted.
    pub fn all_albums(&self) -> Result<Vec<Album>> {
        assert!(self.in_transaction, "no open transaction");
        let mut stmt = self
            .conn
            .prepare("SELECT id, tag, deletable, type FROM album")?;
        let rows = stmt.query_map([], album_from_row)?;
        let mut albums = Vec::new();
        for row in rows {
            albums.push(row??);
        }
        Ok(albums)
    }

    /// Delete an album, its attributes, its category assignments, its
    /// member rows and its appearances in other albums.
    pub fn delete_album(&mut self, id: ObjectId) -> Result<()> {
        let album = self.album(id)?;
        if !album.deletable {
            return Err(ShelfError::UndeletableAlbum(album.tag));
        }
        self.conn.execute("DELETE FROM album WHERE id = ?1", [id])?;
        self.remove_from_parents(id)?;
        self.conn.execute("DELETE FROM member WHERE album = ?1", [id])?;
        self.delete_object_rows(id)?;
        self.set_modified();
        Ok(())
    }

    /// Replace an album's ordered member list atomically. Duplicates are
    /// permitted; positions run from 0 upwards.
    pub fn set_album_children(&mut self, album_id: ObjectId, children: &[ObjectId]) -> Result<()> {
        let album = self.album(album_id)?;
        if !album.is_mutable() {
            return Err(ShelfError::UnsettableChildren(album.tag));
        }
        for &child in children {
            self.ensure_object(child)?;
        }
        self.conn
            .execute("DELETE FROM member WHERE album = ?1", [album_id])?;
        let mut stmt = self
            .conn
            .prepare("INSERT INTO member (album, position, object) VALUES (?1, ?2, ?3)")?;
        for (position, &child) in children.iter().enumerate() {
            stmt.execute(params![album_id, position as i64, child])?;
        }
        drop(stmt);
        self.set_modified();
        Ok(())
    }

    /// An album's members in position order. For the virtual album kinds
    /// the member list is computed: orphaned objects for `Orphans`, the
    /// evaluated `query` attribute for `Search`.
    pub fn album_children(&mut self, album_id: ObjectId) -> Result<Vec<ObjectId>> {
        let album = self.album(album_id)?;
        match album.kind {
            AlbumKind::Plain => {
                let mut stmt = self.conn.prepare(
                    "SELECT object FROM member WHERE album = ?1 ORDER BY position",
                )?;
                let rows = stmt.query_map([album_id], |row| row.get(0))?;
                let mut children = Vec::new();
                for row in rows {
                    children.push(row?);
                }
                Ok(children)
            }
            AlbumKind::Orphans => self.orphaned_objects(),
            AlbumKind::Search => {
                let query = match self.get_attribute(album_id, "query")? {
                    Some(query) if !query.trim().is_empty() => query,
                    _ => return Ok(Vec::new()),
                };
                // A stored query that no longer parses or resolves yields
                // no members rather than failing the caller.
                match search::parse(&query) {
                    Ok(expr) => match self.search_expr(&expr) {
                        Ok(members) => Ok(members),
                        Err(err) if err.is_not_found() => Ok(Vec::new()),
                        Err(err) => Err(err),
                    },
                    Err(_) => Ok(Vec::new()),
                }
            }
        }
    }

    /// The distinct albums an object appears in.
    pub fn object_parents(&self, object: ObjectId) -> Result<Vec<ObjectId>> {
        assert!(self.in_transaction, "no open transaction");
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT album FROM member WHERE object = ?1")?;
        let rows = stmt.query_map([object], |row| row.get(0))?;
        let mut parents = Vec::new();
        for row in rows {
            parents.push(row?);
        }
        Ok(parents)
    }

    /// Rename an album.
    pub fn set_album_tag(&mut self, id: ObjectId, tag: &str) -> Result<()> {
        verify_album_tag(tag)?;
        self.album(id)?;
        let updated = self
            .conn
            .execute("UPDATE album SET tag = ?1 WHERE id = ?2", params![tag, id]);
        match updated {
            Ok(_) => {
                self.set_modified();
                Ok(())
            }
            Err(err) if is_constraint_violation(&err) => {
                Err(ShelfError::AlbumExists(tag.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Albums and images that are members of no album, root excluded.
    /// Albums come first, ordered by tag; images follow, ordered by their
    /// `captured` attribute.
    fn orphaned_objects(&self) -> Result<Vec<ObjectId>> {
        let mut result = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT id FROM album \
             WHERE id NOT IN (SELECT object FROM member) AND id != ?1 \
             ORDER BY tag",
        )?;
        let rows = stmt.query_map([ROOT_ALBUM_ID], |row| row.get(0))?;
        for row in rows {
            result.push(row?);
        }
        let mut stmt = self.conn.prepare(
            "SELECT i.id FROM image AS i \
             LEFT JOIN attribute AS a ON i.id = a.object AND a.name = 'captured' \
             WHERE i.id NOT IN (SELECT object FROM member) \
             ORDER BY a.lcvalue",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ---------------------------------------------------------------
    // Images and image versions

    /// Create a new, orphaned image with no versions.
    pub fn create_image(&mut self) -> Result<Image> {
        assert!(self.in_transaction, "no open transaction");
        self.conn.execute("INSERT INTO object (id) VALUES (NULL)", [])?;
        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "INSERT INTO image (id, primary_version) VALUES (?1, NULL)",
            [id],
        )?;
        self.set_modified();
        self.image(id)
    }

    /// Get an image by id.
    pub fn image(&self, id: ObjectId) -> Result<Image> {
        assert!(self.in_transaction, "no open transaction");
        self.conn
            .query_row(
                "SELECT id, primary_version FROM image WHERE id = ?1",
                [id],
                |row| {
                    Ok(Image {
                        id: row.get(0)?,
                        primary_version: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(ShelfError::ImageNotFound(id))
    }

    /// All images, unsorted.
    pub fn all_images(&self) -> Result<Vec<Image>> {
        assert!(self.in_transaction, "no open transaction");
        let mut stmt = self.conn.prepare("SELECT id, primary_version FROM image")?;
        let rows = stmt.query_map([], |row| {
            Ok(Image {
                id: row.get(0)?,
                primary_version: row.get(1)?,
            })
        })?;
        let mut images = Vec::new();
        for row in rows {
            images.push(row?);
        }
        Ok(images)
    }

    /// Delete an image together with all its versions, attributes,
    /// category assignments and album memberships.
    pub fn delete_image(&mut self, id: ObjectId) -> Result<()> {
        self.image(id)?;
        self.conn
            .execute("DELETE FROM image_version WHERE image = ?1", [id])?;
        self.conn.execute("DELETE FROM image WHERE id = ?1", [id])?;
        self.remove_from_parents(id)?;
        self.delete_object_rows(id)?;
        self.set_modified();
        Ok(())
    }

    /// Register a version of an image from a file on disk.
    ///
    /// The file is decoded to find its dimensions and hashed to obtain its
    /// content id. Registering bytes that are already in the store fails
    /// with `VersionExists`, even if the existing version belongs to a
    /// different image. Becomes the image's primary version if it has none.
    pub fn create_image_version(
        &mut self,
        image_id: ObjectId,
        location: &Path,
        kind: VersionKind,
    ) -> Result<ImageVersion> {
        let image = self.image(image_id)?;
        let (width, height) =
            image::image_dimensions(location).map_err(|source| ShelfError::NotAnImage {
                path: location.to_path_buf(),
                source,
            })?;
        let location = std::fs::canonicalize(location)?;
        let mtime = file_mtime(&location)?;
        let hash = compute_image_hash(&location)?;
        let (directory, filename) = split_location(&location);
        let inserted = self.conn.execute(
            "INSERT INTO image_version \
                 (image, type, comment, hash, directory, filename, mtime, width, height) \
             VALUES (?1, ?2, '', ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                image_id,
                kind.as_str(),
                hash,
                directory.to_string_lossy(),
                filename,
                mtime,
                width,
                height
            ],
        );
        if let Err(err) = inserted {
            if is_constraint_violation(&err) {
                return Err(ShelfError::VersionExists(hash));
            }
            return Err(err.into());
        }
        let id = self.conn.last_insert_rowid();
        if image.primary_version.is_none() {
            self.conn.execute(
                "UPDATE image SET primary_version = ?1 WHERE id = ?2",
                params![id, image_id],
            )?;
        }
        self.set_modified();
        self.image_version(id)
    }

    /// Get an image version by id.
    pub fn image_version(&self, id: VersionId) -> Result<ImageVersion> {
        assert!(self.in_transaction, "no open transaction");
        let row = self
            .conn
            .query_row(
                "SELECT id, image, type, comment, hash, directory, filename, \
                        mtime, width, height \
                 FROM image_version WHERE id = ?1",
                [id],
                version_from_row,
            )
            .optional()?;
        match row {
            Some(version) => version,
            None => Err(ShelfError::VersionNotFound(format!("id {id}"))),
        }
    }

    /// Get the image version with a given content hash.
    pub fn version_by_hash(&self, hash: &str) -> Result<ImageVersion> {
        assert!(self.in_transaction, "no open transaction");
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM image_version WHERE hash = ?1",
                [hash],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => self.image_version(id),
            None => Err(ShelfError::VersionNotFound(format!("hash {hash}"))),
        }
    }

    /// Get the image version last seen at a location. Fails with
    /// `AmbiguousLocation` if several versions share it.
    pub fn version_by_location(&self, location: &Path) -> Result<ImageVersion> {
        assert!(self.in_transaction, "no open transaction");
        let (directory, filename) = split_location(location);
        let mut stmt = self.conn.prepare(
            "SELECT id FROM image_version WHERE directory = ?1 AND filename = ?2",
        )?;
        let rows = stmt.query_map(params![directory.to_string_lossy(), filename], |row| {
            row.get::<_, i64>(0)
        })?;
        let ids: Vec<i64> = rows.collect::<rusqlite::Result<_>>()?;
        match ids.as_slice() {
            [] => Err(ShelfError::VersionNotFound(
                location.display().to_string(),
            )),
            [id] => self.image_version(*id),
            _ => Err(ShelfError::AmbiguousLocation(location.to_path_buf())),
        }
    }

    /// The versions of an image, oldest first.
    pub fn image_versions(&self, image_id: ObjectId) -> Result<Vec<ImageVersion>> {
        self.image(image_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, image, type, comment, hash, directory, filename, \
                    mtime, width, height \
             FROM image_version WHERE image = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([image_id], version_from_row)?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row??);
        }
        Ok(versions)
    }

    /// Delete an image version. If it was the primary version, the newest
    /// remaining version (if any) takes over.
    pub fn delete_image_version(&mut self, id: VersionId) -> Result<()> {
        let version = self.image_version(id)?;
        let image = self.image(version.image)?;
        self.conn
            .execute("DELETE FROM image_version WHERE id = ?1", [id])?;
        if image.primary_version == Some(id) {
            self.elect_primary_version(version.image)?;
        }
        self.set_modified();
        Ok(())
    }

    /// Make a version the primary version of its image.
    pub fn set_primary_version(&mut self, id: VersionId) -> Result<()> {
        let version = self.image_version(id)?;
        self.conn.execute(
            "UPDATE image SET primary_version = ?1 WHERE id = ?2",
            params![id, version.image],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Reassign a version to another image, fixing up the primary version
    /// of both images where needed.
    pub fn set_version_image(&mut self, id: VersionId, image_id: ObjectId) -> Result<()> {
        let version = self.image_version(id)?;
        if version.image == image_id {
            return Ok(());
        }
        let new_image = self.image(image_id)?;
        let old_image = self.image(version.image)?;
        self.conn.execute(
            "UPDATE image_version SET image = ?1 WHERE id = ?2",
            params![image_id, id],
        )?;
        if new_image.primary_version.is_none() {
            self.conn.execute(
                "UPDATE image SET primary_version = ?1 WHERE id = ?2",
                params![id, image_id],
            )?;
        }
        if old_image.primary_version == Some(id) {
            self.elect_primary_version(old_image.id)?;
        }
        self.set_modified();
        Ok(())
    }

    /// Change the kind of a version.
    pub fn set_version_kind(&mut self, id: VersionId, kind: VersionKind) -> Result<()> {
        self.image_version(id)?;
        self.conn.execute(
            "UPDATE image_version SET type = ?1 WHERE id = ?2",
            params![kind.as_str(), id],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Change the comment of a version.
    pub fn set_version_comment(&mut self, id: VersionId, comment: &str) -> Result<()> {
        self.image_version(id)?;
        self.conn.execute(
            "UPDATE image_version SET comment = ?1 WHERE id = ?2",
            params![comment, id],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Record new content for an edited version file: hash, dimensions and
    /// mtime are re-read from the version's current location.
    pub fn version_content_changed(&mut self, id: VersionId) -> Result<ImageVersion> {
        let version = self.image_version(id)?;
        let location = version.location();
        let (width, height) =
            image::image_dimensions(&location).map_err(|source| ShelfError::NotAnImage {
                path: location.clone(),
                source,
            })?;
        let hash = compute_image_hash(&location)?;
        let mtime = file_mtime(&location)?;
        self.conn.execute(
            "UPDATE image_version SET hash = ?1, width = ?2, height = ?3, mtime = ?4 \
             WHERE id = ?5",
            params![hash, width, height, mtime, id],
        )?;
        self.set_modified();
        self.image_version(id)
    }

    /// Record that a version file has moved. The stored mtime follows the
    /// file; a vanished file records mtime 0.
    pub fn version_location_changed(&mut self, id: VersionId, location: &Path) -> Result<()> {
        self.image_version(id)?;
        let mtime = file_mtime(location).unwrap_or(0);
        let (directory, filename) = split_location(location);
        self.conn.execute(
            "UPDATE image_version SET directory = ?1, filename = ?2, mtime = ?3 \
             WHERE id = ?4",
            params![directory.to_string_lossy(), filename, mtime, id],
        )?;
        self.set_modified();
        Ok(())
    }

    fn elect_primary_version(&mut self, image_id: ObjectId) -> Result<()> {
        // The newest remaining version is probably the best.
        let new_primary: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM image_version WHERE image = ?1 \
                 ORDER BY id DESC LIMIT 1",
                [image_id],
                |row| row.get(0),
            )
            .optional()?;
        self.conn.execute(
            "UPDATE image SET primary_version = ?1 WHERE id = ?2",
            params![new_primary, image_id],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Objects

    /// Get the object (album or image) with a given id.
    pub fn object(&self, id: ObjectId) -> Result<Object> {
        match self.image(id) {
            Ok(image) => Ok(Object::Image(image)),
            Err(err) if err.is_not_found() => match self.album(id) {
                Ok(album) => Ok(Object::Album(album)),
                Err(err) if err.is_not_found() => Err(ShelfError::ObjectNotFound(id)),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Delete the object (album or image) with a given id.
    pub fn delete_object(&mut self, id: ObjectId) -> Result<()> {
        match self.object(id)? {
            Object::Album(_) => self.delete_album(id),
            Object::Image(_) => self.delete_image(id),
        }
    }

    fn ensure_object(&self, id: ObjectId) -> Result<()> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM object WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        found.map(|_| ()).ok_or(ShelfError::ObjectNotFound(id))
    }

    /// Remove `attribute` and `object_category` rows plus the `object` row
    /// itself. Shared tail of album and image deletion.
    fn delete_object_rows(&mut self, id: ObjectId) -> Result<()> {
        self.conn.execute("DELETE FROM object WHERE id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM attribute WHERE object = ?1", [id])?;
        self.conn
            .execute("DELETE FROM object_category WHERE object = ?1", [id])?;
        Ok(())
    }

    /// Remove every appearance of an object in album member lists and
    /// compact the position sequences it leaves behind.
    fn remove_from_parents(&mut self, object: ObjectId) -> Result<()> {
        let parents = self.object_parents(object)?;
        for parent in parents {
            loop {
                let position: Option<i64> = self
                    .conn
                    .query_row(
                        "SELECT position FROM member \
                         WHERE album = ?1 AND object = ?2 \
                         ORDER BY position DESC LIMIT 1",
                        params![parent, object],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(position) = position else { break };
                self.conn.execute(
                    "DELETE FROM member WHERE album = ?1 AND position = ?2",
                    params![parent, position],
                )?;
                self.conn.execute(
                    "UPDATE member SET position = position - 1 \
                     WHERE album = ?1 AND position > ?2",
                    params![parent, position],
                )?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Attributes

    /// Set an attribute, replacing any existing value. The lowercased copy
    /// used for case-insensitive comparison is maintained here.
    pub fn set_attribute(&mut self, object: ObjectId, name: &str, value: &str) -> Result<()> {
        assert!(self.in_transaction, "no open transaction");
        self.ensure_object(object)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO attribute (object, name, value, lcvalue) \
             VALUES (?1, ?2, ?3, ?4)",
            params![object, name, value, value.to_lowercase()],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Get an attribute value, or `None` if the object has no attribute
    /// with that name.
    pub fn get_attribute(&self, object: ObjectId, name: &str) -> Result<Option<String>> {
        assert!(self.in_transaction, "no open transaction");
        self.ensure_object(object)?;
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM attribute WHERE object = ?1 AND name = ?2",
                params![object, name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// All attributes of an object.
    pub fn attribute_map(&self, object: ObjectId) -> Result<BTreeMap<String, String>> {
        assert!(self.in_transaction, "no open transaction");
        self.ensure_object(object)?;
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM attribute WHERE object = ?1")?;
        let rows = stmt.query_map([object], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (name, value): (String, String) = row?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Delete an attribute. Deleting a missing attribute is a no-op.
    pub fn delete_attribute(&mut self, object: ObjectId, name: &str) -> Result<()> {
        assert!(self.in_transaction, "no open transaction");
        self.ensure_object(object)?;
        self.conn.execute(
            "DELETE FROM attribute WHERE object = ?1 AND name = ?2",
            params![object, name],
        )?;
        self.set_modified();
        Ok(())
    }

    /// All attribute names in use anywhere in the shelf, sorted.
    pub fn all_attribute_names(&self) -> Result<Vec<String>> {
        assert!(self.in_transaction, "no open transaction");
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT name FROM attribute ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    // ---------------------------------------------------------------
    // Categories

    /// Create a category.
    pub fn create_category(&mut self, tag: &str, description: &str) -> Result<Category> {
        assert!(self.in_transaction, "no open transaction");
        verify_category_tag(tag)?;
        let inserted = self.conn.execute(
            "INSERT INTO category (tag, description) VALUES (?1, ?2)",
            params![tag, description],
        );
        match inserted {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                if let Some(dag) = self.category_dag.as_mut() {
                    dag.add(id);
                }
                self.set_modified();
                self.category(id)
            }
            Err(err) if is_constraint_violation(&err) => {
                Err(ShelfError::CategoryExists(tag.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Get a category by id.
    pub fn category(&self, id: CategoryId) -> Result<Category> {
        assert!(self.in_transaction, "no open transaction");
        self.conn
            .query_row(
                "SELECT id, tag, description FROM category WHERE id = ?1",
                [id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        tag: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(ShelfError::CategoryNotFound(format!("id {id}")))
    }

    /// Get a category by its unique tag.
    pub fn category_by_tag(&self, tag: &str) -> Result<Category> {
        assert!(self.in_transaction, "no open transaction");
        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM category WHERE tag = ?1", [tag], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => self.category(id),
            None => Err(ShelfError::CategoryNotFound(tag.to_owned())),
        }
    }

    /// All categories, unsorted.
    pub fn all_categories(&self) -> Result<Vec<Category>> {
        assert!(self.in_transaction, "no open transaction");
        let mut stmt = self
            .conn
            .prepare("SELECT id, tag, description FROM category")?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                tag: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        let mut categories = Vec::new();
        for row in rows {
            categories.push(row?);
        }
        Ok(categories)
    }

    /// Delete a category, its edges on both sides and its object
    /// assignments.
    pub fn delete_category(&mut self, id: CategoryId) -> Result<()> {
        self.category(id)?;
        self.conn
            .execute("DELETE FROM category_child WHERE parent = ?1", [id])?;
        self.conn
            .execute("DELETE FROM category_child WHERE child = ?1", [id])?;
        self.conn
            .execute("DELETE FROM object_category WHERE category = ?1", [id])?;
        self.conn.execute("DELETE FROM category WHERE id = ?1", [id])?;
        if let Some(dag) = self.category_dag.as_mut() {
            dag.remove(id);
        }
        self.set_modified();
        Ok(())
    }

    /// Rename a category.
    pub fn set_category_tag(&mut self, id: CategoryId, tag: &str) -> Result<()> {
        verify_category_tag(tag)?;
        self.category(id)?;
        let updated = self.conn.execute(
            "UPDATE category SET tag = ?1 WHERE id = ?2",
            params![tag, id],
        );
        match updated {
            Ok(_) => {
                self.set_modified();
                Ok(())
            }
            Err(err) if is_constraint_violation(&err) => {
                Err(ShelfError::CategoryExists(tag.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Change a category's description.
    pub fn set_category_description(&mut self, id: CategoryId, description: &str) -> Result<()> {
        self.category(id)?;
        self.conn.execute(
            "UPDATE category SET description = ?1 WHERE id = ?2",
            params![description, id],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Make a parent-child link between two categories.
    ///
    /// The loop check runs against the in-memory DAG before the edge table
    /// is touched; a refused edge leaves both untouched.
    pub fn connect_categories(&mut self, parent: CategoryId, child: CategoryId) -> Result<()> {
        self.category(parent)?;
        self.category(child)?;
        self.category_dag()?;
        let dag = self.category_dag.as_mut().unwrap();
        if dag.connected(parent, child) {
            return Err(ShelfError::AlreadyConnected { parent, child });
        }
        dag.connect(parent, child)?;
        self.conn.execute(
            "INSERT INTO category_child (parent, child) VALUES (?1, ?2)",
            params![parent, child],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Remove a parent-child link. Removing a non-existent link is a
    /// no-op.
    pub fn disconnect_categories(&mut self, parent: CategoryId, child: CategoryId) -> Result<()> {
        self.category(parent)?;
        self.category(child)?;
        self.category_dag()?;
        self.category_dag.as_mut().unwrap().disconnect(parent, child);
        self.conn.execute(
            "DELETE FROM category_child WHERE parent = ?1 AND child = ?2",
            params![parent, child],
        )?;
        self.set_modified();
        Ok(())
    }

    /// Immediate parent categories.
    pub fn category_parents(&mut self, id: CategoryId) -> Result<Vec<CategoryId>> {
        self.category(id)?;
        Ok(self.category_dag()?.get_parents(id))
    }

    /// Immediate child categories.
    pub fn category_children(&mut self, id: CategoryId) -> Result<Vec<CategoryId>> {
        self.category(id)?;
        Ok(self.category_dag()?.get_children(id))
    }

    /// All ancestor categories, the category itself included.
    pub fn category_ancestors(&mut self, id: CategoryId) -> Result<Vec<CategoryId>> {
        self.category(id)?;
        Ok(self.category_dag()?.get_ancestors(id))
    }

    /// All descendant categories, the category itself included.
    pub fn category_descendants(&mut self, id: CategoryId) -> Result<Vec<CategoryId>> {
        self.category(id)?;
        Ok(self.category_dag()?.get_descendants(id))
    }

    /// Categories without parents.
    pub fn root_categories(&mut self) -> Result<Vec<CategoryId>> {
        Ok(self.category_dag()?.get_roots())
    }

    /// Assign a category to an object. Assigning one that is already
    /// present fails with `CategoryPresent`.
    pub fn add_object_category(&mut self, object: ObjectId, category: CategoryId) -> Result<()> {
        self.ensure_object(object)?;
        let tag = self.category(category)?.tag;
        let inserted = self.conn.execute(
            "INSERT INTO object_category (object, category) VALUES (?1, ?2)",
            params![object, category],
        );
        match inserted {
            Ok(_) => {
                self.set_modified();
                Ok(())
            }
            Err(err) if is_constraint_violation(&err) => {
                Err(ShelfError::CategoryPresent { object, tag })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a category assignment. Removing a missing assignment is a
    /// no-op.
    pub fn remove_object_category(&mut self, object: ObjectId, category: CategoryId) -> Result<()> {
        self.ensure_object(object)?;
        self.category(category)?;
        self.conn.execute(
            "DELETE FROM object_category WHERE object = ?1 AND category = ?2",
            params![object, category],
        )?;
        self.set_modified();
        Ok(())
    }

    /// The categories assigned to an object. With `recursive`, ancestor
    /// categories reachable from the assigned ones are included.
    pub fn object_categories(&mut self, object: ObjectId, recursive: bool) -> Result<Vec<CategoryId>> {
        self.ensure_object(object)?;
        let mut stmt = self
            .conn
            .prepare("SELECT category FROM object_category WHERE object = ?1")?;
        let rows = stmt.query_map([object], |row| row.get(0))?;
        let direct: Vec<i64> = rows.collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        if !recursive {
            return Ok(direct);
        }
        let dag = self.category_dag()?;
        let mut all = std::collections::HashSet::new();
        for category in direct {
            all.extend(dag.get_ancestors(category));
        }
        Ok(all.into_iter().collect())
    }

    /// The category DAG, built from the edge table on first use within a
    /// transaction.
    pub(crate) fn category_dag(&mut self) -> Result<&Dag> {
        assert!(self.in_transaction, "no open transaction");
        if self.category_dag.is_none() {
            let mut stmt = self.conn.prepare("SELECT id FROM category")?;
            let ids = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            let mut dag = Dag::new();
            for id in ids {
                dag.add(id?);
            }
            drop(stmt);
            let mut stmt = self
                .conn
                .prepare("SELECT parent, child FROM category_child")?;
            let edges = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for edge in edges {
                let (parent, child): (i64, i64) = edge?;
                // Persisted edges are acyclic by construction.
                dag.connect(parent, child)?;
            }
            drop(stmt);
            self.category_dag = Some(dag);
        }
        Ok(self.category_dag.as_ref().unwrap())
    }

    // ---------------------------------------------------------------
    // Search and statistics

    /// Parse and evaluate a search expression, returning the matching
    /// object ids in ascending order.
    pub fn search(&mut self, expression: &str) -> Result<Vec<ObjectId>> {
        let expr = search::parse(expression)?;
        self.search_expr(&expr)
    }

    /// Evaluate an already parsed search expression.
    pub fn search_expr(&mut self, expr: &search::Expr) -> Result<Vec<ObjectId>> {
        assert!(self.in_transaction, "no open transaction");
        search::evaluate(self, expr)
    }

    /// Counts of albums, images, image versions and categories.
    pub fn statistics(&self) -> Result<Statistics> {
        assert!(self.in_transaction, "no open transaction");
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };
        Ok(Statistics {
            albums: count("album")?,
            images: count("image")?,
            image_versions: count("image_version")?,
            categories: count("category")?,
        })
    }
}

impl std::fmt::Debug for Shelf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shelf")
            .field("location", &self.location)
            .field("in_transaction", &self.in_transaction)
            .field("modified", &self.modified)
            .finish()
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn file_mtime(location: &Path) -> Result<i64> {
    let mtime = std::fs::metadata(location)?
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(mtime)
}

fn album_from_row(row: &rusqlite::Row) -> rusqlite::Result<Result<Album>> {
    let id: i64 = row.get(0)?;
    let tag: String = row.get(1)?;
    let deletable: i64 = row.get(2)?;
    let kind: String = row.get(3)?;
    Ok(AlbumKind::parse(&kind).map(|kind| Album {
        id,
        tag,
        deletable: deletable != 0,
        kind,
    }))
}

fn version_from_row(row: &rusqlite::Row) -> rusqlite::Result<Result<ImageVersion>> {
    let id: i64 = row.get(0)?;
    let image: i64 = row.get(1)?;
    let kind: String = row.get(2)?;
    let comment: String = row.get(3)?;
    let hash: String = row.get(4)?;
    let directory: String = row.get(5)?;
    let filename: String = row.get(6)?;
    let mtime: i64 = row.get(7)?;
    let width: u32 = row.get(8)?;
    let height: u32 = row.get(9)?;
    Ok(VersionKind::parse(&kind).map(|kind| ImageVersion {
        id,
        image,
        kind,
        hash,
        directory: PathBuf::from(directory),
        filename,
        mtime,
        width,
        height,
        comment,
    }))
}
