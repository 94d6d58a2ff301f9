// src/db/schema.rs

//! SQLite schema for the package catalogue
//!
//! One table per entity plus the category tree. Package versions are stored
//! with their original XML payload in the CONTENT column and parsed on
//! demand; DETECT_FILE_COUNT is maintained on insert so the file-hash scan
//! can select candidate versions without parsing.

use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// Create all tables and indexes if they do not exist yet. Idempotent.
pub fn create(conn: &Connection) -> Result<()> {
    debug!("Ensuring catalogue schema");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS PACKAGE(
            NAME TEXT NOT NULL,
            TITLE TEXT,
            URL TEXT,
            ICON TEXT,
            DESCRIPTION TEXT,
            LICENSE TEXT,
            FULLTEXT TEXT,
            STATUS INTEGER,
            SHORT_NAME TEXT,
            REPOSITORY INTEGER,
            CATEGORY0 INTEGER,
            CATEGORY1 INTEGER,
            CATEGORY2 INTEGER,
            CATEGORY3 INTEGER,
            CATEGORY4 INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS PACKAGE_NAME ON PACKAGE(NAME);
        CREATE INDEX IF NOT EXISTS PACKAGE_FULLTEXT ON PACKAGE(FULLTEXT);
        CREATE INDEX IF NOT EXISTS PACKAGE_SHORT_NAME ON PACKAGE(SHORT_NAME);

        CREATE TABLE IF NOT EXISTS PACKAGE_VERSION(
            NAME TEXT NOT NULL,
            PACKAGE TEXT NOT NULL,
            CONTENT BLOB,
            MSIGUID TEXT,
            DETECT_FILE_COUNT INTEGER
        );

        CREATE INDEX IF NOT EXISTS PACKAGE_VERSION_PACKAGE
            ON PACKAGE_VERSION(PACKAGE);
        CREATE UNIQUE INDEX IF NOT EXISTS PACKAGE_VERSION_PACKAGE_NAME
            ON PACKAGE_VERSION(PACKAGE, NAME);
        CREATE INDEX IF NOT EXISTS PACKAGE_VERSION_MSIGUID
            ON PACKAGE_VERSION(MSIGUID);
        CREATE INDEX IF NOT EXISTS PACKAGE_VERSION_DETECT_FILE_COUNT
            ON PACKAGE_VERSION(DETECT_FILE_COUNT);

        CREATE TABLE IF NOT EXISTS LICENSE(
            NAME TEXT NOT NULL,
            TITLE TEXT,
            DESCRIPTION TEXT,
            URL TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS LICENSE_NAME ON LICENSE(NAME);

        CREATE TABLE IF NOT EXISTS CATEGORY(
            ID INTEGER PRIMARY KEY ASC,
            NAME TEXT,
            PARENT INTEGER,
            LEVEL INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS CATEGORY_PARENT_LEVEL_NAME
            ON CATEGORY(PARENT, LEVEL, NAME);

        CREATE TABLE IF NOT EXISTS REPOSITORY(
            ID INTEGER PRIMARY KEY ASC,
            URL TEXT
        );
        ",
    )?;

    Ok(())
}
