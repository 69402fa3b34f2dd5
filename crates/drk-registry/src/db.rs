//! SQLite store for packages and their versions.
//!
//! Version strings are unique per package through a table constraint, so two
//! concurrent registrations of the same version cannot both succeed.

use std::path::{Path, PathBuf};

use drk_schema::version::is_newer;
use drk_schema::{PackageManifest, PackageType};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::de::DeserializeOwned;

use crate::error::{RegistryError, RegistryResult};
use crate::model::{CreateVersion, NewPackage, Package, PackageVersion};

const PACKAGE_COLUMNS: &str = "id, name, description, category, current_version, \
     latest_stable_version, is_active, metadata, maintainer, tags, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, package_id, version, type, description, file_path, \
     file_size, file_hash, manifest, change_log, is_published, is_deprecated, parent_version, \
     target_version, download_count, created_at, updated_at";

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> RegistryResult<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RegistryError::Validation(format!("cannot serialize value: {e}")))
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        current_version: row.get(4)?,
        latest_stable_version: row.get(5)?,
        is_active: row.get(6)?,
        metadata: json_column(row, 7)?,
        maintainer: row.get(8)?,
        tags: json_column(row, 9)?.unwrap_or_default(),
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PackageVersion> {
    let package_type: String = row.get(3)?;
    let file_path: String = row.get(5)?;
    let file_size: i64 = row.get(6)?;
    let download_count: i64 = row.get(14)?;
    Ok(PackageVersion {
        id: row.get(0)?,
        package_id: row.get(1)?,
        version: row.get(2)?,
        package_type: package_type
            .parse::<PackageType>()
            .map_err(|e| conversion_error(3, e))?,
        description: row.get(4)?,
        file_path: PathBuf::from(file_path),
        file_size: u64::try_from(file_size).unwrap_or_default(),
        file_hash: row.get(7)?,
        manifest: json_column(row, 8)?,
        change_log: json_column(row, 9)?,
        is_published: row.get(10)?,
        is_deprecated: row.get(11)?,
        parent_version: row.get(12)?,
        target_version: row.get(13)?,
        download_count: u64::try_from(download_count).unwrap_or_default(),
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

/// Map a UNIQUE violation to a conflict, anything else to a store error.
fn unique_violation(err: rusqlite::Error, what: impl FnOnce() -> String) -> RegistryError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            RegistryError::Conflict(what())
        }
        other => RegistryError::Store(other),
    }
}

/// Connection to the registry database.
#[derive(Debug)]
pub struct RegistryDb {
    conn: Connection,
}

impl RegistryDb {
    /// Open or create the database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open_at(path: &Path) -> RegistryResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // WAL lets readers proceed while a registration is being written.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> RegistryResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> RegistryResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> RegistryResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS packages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                category TEXT NOT NULL,
                current_version TEXT,
                latest_stable_version TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                metadata TEXT,
                maintainer TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS package_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
                version TEXT NOT NULL,
                type TEXT NOT NULL CHECK (type IN ('full', 'delta')),
                description TEXT,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_hash TEXT NOT NULL,
                manifest TEXT,
                change_log TEXT,
                is_published INTEGER NOT NULL DEFAULT 0,
                is_deprecated INTEGER NOT NULL DEFAULT 0,
                parent_version TEXT,
                target_version TEXT,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (package_id, version)
            );

            CREATE INDEX IF NOT EXISTS idx_versions_target
                ON package_versions(package_id, target_version);
            ",
        )?;
        Ok(())
    }

    /// Insert a package.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] if the name is taken.
    pub fn insert_package(&self, new: &NewPackage) -> RegistryResult<Package> {
        let now = now_millis();
        self.conn
            .execute(
                "INSERT INTO packages
                    (name, description, category, metadata, maintainer, tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    new.name,
                    new.description,
                    new.category,
                    to_json(new.metadata.as_ref())?,
                    new.maintainer,
                    to_json(Some(&new.tags))?,
                    now
                ],
            )
            .map_err(|e| unique_violation(e, || format!("package '{}' already exists", new.name)))?;

        let id = self.conn.last_insert_rowid();
        self.get_package(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("package {id}")))
    }

    /// Look a package up by id.
    pub fn get_package(&self, id: i64) -> RegistryResult<Option<Package>> {
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], package_from_row)
            .optional()?)
    }

    /// Look a package up by name.
    pub fn find_package(&self, name: &str) -> RegistryResult<Option<Package>> {
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE name = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![name], package_from_row)
            .optional()?)
    }

    /// All packages by name.
    pub fn list_packages(&self) -> RegistryResult<Vec<Package>> {
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages ORDER BY name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], package_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Move a package's version pointers forward to the full `version`.
    ///
    /// The pointers are read and written in one immediate transaction and
    /// only ever advance, so concurrent registrations cannot roll them back.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the package does not exist.
    pub fn advance_versions(
        &self,
        package_id: i64,
        version: &str,
        current: bool,
        stable: bool,
    ) -> RegistryResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let (current_version, stable_version): (Option<String>, Option<String>) = tx
            .query_row(
                "SELECT current_version, latest_stable_version FROM packages WHERE id = ?1",
                params![package_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| RegistryError::NotFound(format!("package {package_id}")))?;

        let advances = |pointer: Option<&str>| pointer.is_none_or(|p| is_newer(p, version));
        if current && advances(current_version.as_deref()) {
            tx.execute(
                "UPDATE packages SET current_version = ?2, updated_at = ?3 WHERE id = ?1",
                params![package_id, version, now_millis()],
            )?;
        }
        if stable && advances(stable_version.as_deref()) {
            tx.execute(
                "UPDATE packages SET latest_stable_version = ?2, updated_at = ?3 WHERE id = ?1",
                params![package_id, version, now_millis()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert a version row.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] if the package already has this
    /// version.
    pub fn insert_version(
        &self,
        request: &CreateVersion,
        file_size: u64,
        file_hash: &str,
        manifest: Option<&PackageManifest>,
    ) -> RegistryResult<PackageVersion> {
        let now = now_millis();
        self.conn
            .execute(
                "INSERT INTO package_versions
                    (package_id, version, type, description, file_path, file_size, file_hash,
                     manifest, change_log, is_published, parent_version, target_version,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    request.package_id,
                    request.version,
                    request.package_type.as_str(),
                    request.description,
                    request.file_path.to_string_lossy().into_owned(),
                    i64::try_from(file_size).unwrap_or(i64::MAX),
                    file_hash,
                    to_json(manifest)?,
                    to_json(request.change_log.as_ref())?,
                    request.published,
                    request.parent_version,
                    request.target_version,
                    now
                ],
            )
            .map_err(|e| {
                unique_violation(e, || format!("version {} already exists", request.version))
            })?;

        let id = self.conn.last_insert_rowid();
        self.version_by_id(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("version row {id}")))
    }

    fn version_by_id(&self, id: i64) -> RegistryResult<Option<PackageVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM package_versions WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], version_from_row)
            .optional()?)
    }

    /// Look a version up by its string.
    pub fn get_version(&self, package_id: i64, version: &str) -> RegistryResult<Option<PackageVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM package_versions WHERE package_id = ?1 AND version = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, params![package_id, version], version_from_row)
            .optional()?)
    }

    fn query_versions(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> RegistryResult<Vec<PackageVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM package_versions WHERE {filter}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, version_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every version of a package in creation order.
    pub fn list_versions(&self, package_id: i64) -> RegistryResult<Vec<PackageVersion>> {
        self.query_versions(
            "package_id = ?1 ORDER BY created_at, id",
            params![package_id],
        )
    }

    /// Deltas landing on `target_version`, in creation order.
    pub fn delta_chain(&self, package_id: i64, target_version: &str) -> RegistryResult<Vec<PackageVersion>> {
        self.query_versions(
            "package_id = ?1 AND type = 'delta' AND target_version = ?2 ORDER BY created_at, id",
            params![package_id, target_version],
        )
    }

    /// Deprecated versions, newest first.
    pub fn deprecated_versions(&self, package_id: i64) -> RegistryResult<Vec<PackageVersion>> {
        self.query_versions(
            "package_id = ?1 AND is_deprecated = 1 ORDER BY created_at DESC, id DESC",
            params![package_id],
        )
    }

    /// Set or clear the published flag.
    pub fn set_published(&self, id: i64, published: bool) -> RegistryResult<()> {
        self.conn.execute(
            "UPDATE package_versions SET is_published = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, published, now_millis()],
        )?;
        Ok(())
    }

    /// Set or clear the deprecated flag.
    pub fn set_deprecated(&self, id: i64, deprecated: bool) -> RegistryResult<()> {
        self.conn.execute(
            "UPDATE package_versions SET is_deprecated = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, deprecated, now_millis()],
        )?;
        Ok(())
    }

    /// Increment the download counter in a single statement.
    ///
    /// Returns the number of rows updated (0 if the version does not exist).
    pub fn increment_downloads(&self, package_id: i64, version: &str) -> RegistryResult<usize> {
        Ok(self.conn.execute(
            "UPDATE package_versions SET download_count = download_count + 1
             WHERE package_id = ?1 AND version = ?2",
            params![package_id, version],
        )?)
    }

    /// Remove a version row.
    pub fn delete_version(&self, id: i64) -> RegistryResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM package_versions WHERE id = ?1", params![id])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_package() -> (RegistryDb, Package) {
        let db = RegistryDb::open_in_memory().unwrap();
        let pkg = db
            .insert_package(&NewPackage {
                name: "manuals".into(),
                category: "docs".into(),
                tags: vec!["bridge".into()],
                ..NewPackage::default()
            })
            .unwrap();
        (db, pkg)
    }

    #[test]
    fn test_package_round_trip() {
        let (db, pkg) = db_with_package();
        assert_eq!(pkg.name, "manuals");
        assert!(pkg.is_active);
        assert_eq!(pkg.tags, vec!["bridge".to_string()]);
        assert_eq!(db.find_package("manuals").unwrap(), Some(pkg.clone()));
        assert!(db.get_package(pkg.id + 1).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_package_name_conflicts() {
        let (db, _) = db_with_package();
        let err = db
            .insert_package(&NewPackage {
                name: "manuals".into(),
                category: "other".into(),
                ..NewPackage::default()
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[test]
    fn test_duplicate_version_conflicts() {
        let (db, pkg) = db_with_package();
        let req = CreateVersion::full(pkg.id, "1.0.0", "/tmp/a.drkpack");
        db.insert_version(&req, 10, "00", None).unwrap();
        let err = db.insert_version(&req, 10, "00", None).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[test]
    fn test_version_columns_round_trip() {
        let (db, pkg) = db_with_package();
        let mut req = CreateVersion::delta(pkg.id, "1.1.0-d", "/tmp/d.drkdelta", "1.0.0", "1.1.0");
        req.change_log = Some(serde_json::json!({"added": ["C.pdf"]}));
        let row = db.insert_version(&req, 42, "ab", None).unwrap();
        assert_eq!(row.package_type, PackageType::Delta);
        assert_eq!(row.file_size, 42);
        assert_eq!(row.target_version.as_deref(), Some("1.1.0"));
        assert_eq!(row.change_log, req.change_log);
        assert_eq!(row.download_count, 0);

        assert_eq!(db.increment_downloads(pkg.id, "1.1.0-d").unwrap(), 1);
        assert_eq!(db.increment_downloads(pkg.id, "missing").unwrap(), 0);
        let row = db.get_version(pkg.id, "1.1.0-d").unwrap().unwrap();
        assert_eq!(row.download_count, 1);
    }

    #[test]
    fn test_version_pointers_only_advance() {
        let (db, pkg) = db_with_package();
        let pointers = || {
            let p = db.get_package(pkg.id).unwrap().unwrap();
            (p.current_version, p.latest_stable_version)
        };

        db.advance_versions(pkg.id, "2.0.0", true, false).unwrap();
        db.advance_versions(pkg.id, "1.5.0", true, true).unwrap();
        assert_eq!(pointers(), (Some("2.0.0".into()), Some("1.5.0".into())));

        db.advance_versions(pkg.id, "1.0.0", true, true).unwrap();
        assert_eq!(pointers(), (Some("2.0.0".into()), Some("1.5.0".into())));

        let err = db.advance_versions(pkg.id + 1, "3.0.0", true, true).unwrap_err();
        assert!(err.is_not_found());
    }
}
