//! On-disk schema of the metadata store.

/// Current format version, stored in `dbinfo`.
pub const FORMAT_VERSION: i64 = 3;

/// The oldest legacy format `store::upgrade` can migrate from.
pub const OLDEST_UPGRADABLE_VERSION: i64 = 2;

/// Object id of the root album, created together with the store.
pub const ROOT_ALBUM_ID: i64 = 0;

/// Schema DDL. `object` is the superclass table; `album` and `image` share
/// its primary key.
pub const SCHEMA: &str = "
    -- Administrative information about the database.
    CREATE TABLE dbinfo (
        version     INTEGER NOT NULL
    );

    -- Superclass of objects in an album.
    CREATE TABLE object (
        id          INTEGER NOT NULL,
        PRIMARY KEY (id)
    );

    -- Albums. Subclass of object.
    CREATE TABLE album (
        -- Shared primary key with object.
        id          INTEGER NOT NULL,
        -- Human-memorizable tag.
        tag         TEXT NOT NULL,
        -- Whether it is possible to delete the album.
        deletable   INTEGER NOT NULL,
        -- Album kind (plain, orphans or search).
        type        TEXT NOT NULL,

        UNIQUE      (tag),
        FOREIGN KEY (id) REFERENCES object,
        PRIMARY KEY (id)
    );

    -- Images. Subclass of object.
    CREATE TABLE image (
        -- Shared primary key with object.
        id          INTEGER NOT NULL,
        -- The primary version. NULL if no such version exists.
        primary_version INTEGER,

        FOREIGN KEY (id) REFERENCES object,
        FOREIGN KEY (primary_version) REFERENCES image_version,
        PRIMARY KEY (id)
    );

    -- Image versions.
    CREATE TABLE image_version (
        id          INTEGER NOT NULL,
        -- The image this version belongs to.
        image       INTEGER NOT NULL,
        -- Kind (original, important or other).
        type        TEXT NOT NULL,
        -- Arbitrary comment about the version.
        comment     TEXT NOT NULL,
        -- Content hash of the image file data, in hex. Unique across the
        -- whole store.
        hash        TEXT NOT NULL,
        -- Directory part of the last known location.
        directory   TEXT NOT NULL,
        -- Filename part of the last known location.
        filename    TEXT NOT NULL,
        -- Last known modification time (UNIX epoch seconds).
        mtime       INTEGER NOT NULL,
        width       INTEGER NOT NULL,
        height      INTEGER NOT NULL,

        FOREIGN KEY (image) REFERENCES image,
        UNIQUE      (hash),
        PRIMARY KEY (id)
    );

    CREATE INDEX image_version_image_index
        ON image_version (image);
    CREATE INDEX image_version_location_index
        ON image_version (directory, filename);

    -- Ordered members of an album. The same object may appear at several
    -- positions.
    CREATE TABLE member (
        album       INTEGER NOT NULL,
        -- Member position, from 0 and up.
        position    INTEGER NOT NULL,
        object      INTEGER NOT NULL,

        FOREIGN KEY (album) REFERENCES album,
        FOREIGN KEY (object) REFERENCES object,
        PRIMARY KEY (album, position)
    );

    CREATE INDEX member_object_index ON member (object);

    -- Attributes for objects.
    CREATE TABLE attribute (
        object      INTEGER NOT NULL,
        name        TEXT NOT NULL,
        value       TEXT NOT NULL,
        -- Lowercased value, kept for case-insensitive comparison without
        -- runtime folding.
        lcvalue     TEXT NOT NULL,

        FOREIGN KEY (object) REFERENCES object,
        PRIMARY KEY (object, name)
    );

    -- Categories.
    CREATE TABLE category (
        id          INTEGER NOT NULL,
        tag         TEXT NOT NULL,
        description TEXT NOT NULL,

        UNIQUE      (tag),
        PRIMARY KEY (id)
    );

    -- Parent-child relations between categories. Kept acyclic at
    -- edge-insertion time.
    CREATE TABLE category_child (
        parent      INTEGER NOT NULL,
        child       INTEGER NOT NULL,

        FOREIGN KEY (parent) REFERENCES category,
        FOREIGN KEY (child) REFERENCES category,
        PRIMARY KEY (parent, child)
    );

    CREATE INDEX category_child_child ON category_child (child);

    -- Category-object mapping.
    CREATE TABLE object_category (
        object      INTEGER NOT NULL,
        category    INTEGER NOT NULL,

        FOREIGN KEY (object) REFERENCES object,
        FOREIGN KEY (category) REFERENCES category,
        PRIMARY KEY (object, category)
    );

    CREATE INDEX object_category_category ON object_category (category);
";
