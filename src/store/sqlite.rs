use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, ffi, params};

use super::schema::{MIGRATIONS, MIGRATIONS_TABLE};
use super::{Store, Transaction};
use crate::error::{Error, Result};
use crate::types::*;

/// How long a writer waits on a database locked by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::configure(Connection::open(db_path)?)
    }

    /// A private catalog that lives as long as the store.
    pub fn in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    /// Opens `db_path`, or an in-memory catalog when no path is given.
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        match db_path {
            Some(path) => Self::new(path),
            None => Self::in_memory(),
        }
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Maps unique-key failures to `ConstraintViolation`. Foreign-key and
/// not-null failures stay database errors: retrying a read cannot fix them.
fn insert_error(table: &str, e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    err.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            Error::ConstraintViolation(format!("duplicate row in {table}"))
        }
        e => Error::from(e),
    }
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
    Ok(Target {
        id: row.get(0)?,
        repo: row.get(1)?,
        commit: row.get(2)?,
    })
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<Analysis> {
    Ok(Analysis {
        id: row.get(0)?,
        target_id: row.get(1)?,
        started: parse_datetime(&row.get::<_, String>(2)?),
        finished: row.get::<_, Option<String>>(3)?.map(|s| parse_datetime(&s)),
        status: row.get(4)?,
        notify: row.get(5)?,
    })
}

fn installed_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<InstalledDependency> {
    Ok(InstalledDependency {
        id: row.get(offset)?,
        package_name: row.get(offset + 1)?,
        version: row.get(offset + 2)?,
        installer: row.get(offset + 3)?,
        cpe: row.get(offset + 4)?,
    })
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn();
        conn.execute_batch(MIGRATIONS_TABLE)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            tx.execute_batch(migration.sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![
                    migration.version,
                    migration.name,
                    format_datetime(&Utc::now())
                ],
            )?;
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applied migration"
            );
        }

        tx.commit()?;
        Ok(())
    }

    fn schema_version(&self) -> Result<u32> {
        let conn = self.conn();
        conn.execute_batch(MIGRATIONS_TABLE)?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        let conn = self.conn();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction { conn }))
    }

    fn begin_read(&self) -> Result<Box<dyn Transaction + '_>> {
        let conn = self.conn();
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Box::new(SqliteTransaction { conn }))
    }
}

/// An open transaction holding the store's connection.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("Failed to roll back transaction: {e}");
            }
        }
    }
}

impl Transaction for SqliteTransaction<'_> {
    // Target operations

    fn get_target(&self, id: &str) -> Result<Option<Target>> {
        self.conn
            .query_row(
                r#"SELECT id, repo, "commit" FROM targets WHERE id = ?1"#,
                params![id],
                target_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn find_target(&self, repo: &str, commit: &str) -> Result<Option<Target>> {
        self.conn
            .query_row(
                r#"SELECT id, repo, "commit" FROM targets WHERE repo = ?1 AND "commit" = ?2"#,
                params![repo, commit],
                target_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_target(&self, target: &Target) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO targets (id, repo, "commit") VALUES (?1, ?2, ?3)"#,
                params![target.id, target.repo, target.commit],
            )
            .map_err(|e| insert_error("targets", e))?;
        Ok(())
    }

    // Analysis operations

    fn get_analysis(&self, id: &str) -> Result<Option<Analysis>> {
        self.conn
            .query_row(
                "SELECT id, target_id, started, finished, status, notify
                 FROM analyses WHERE id = ?1",
                params![id],
                analysis_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_analysis(&self, analysis: &Analysis) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO analyses (id, target_id, started, finished, status, notify)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    analysis.id,
                    analysis.target_id,
                    format_datetime(&analysis.started),
                    analysis.finished.as_ref().map(format_datetime),
                    analysis.status,
                    analysis.notify,
                ],
            )
            .map_err(|e| insert_error("analyses", e))?;
        Ok(())
    }

    fn update_analysis(&self, analysis: &Analysis) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE analyses SET finished = ?1, status = ?2, notify = ?3 WHERE id = ?4",
            params![
                analysis.finished.as_ref().map(format_datetime),
                analysis.status,
                analysis.notify,
                analysis.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Requested dependency operations

    fn find_requested_dependency(
        &self,
        spec: &str,
        installer: &str,
    ) -> Result<Option<RequestedDependency>> {
        self.conn
            .query_row(
                "SELECT id, spec, installer FROM requested_dependencies
                 WHERE spec = ?1 AND installer = ?2",
                params![spec, installer],
                |row| {
                    Ok(RequestedDependency {
                        id: row.get(0)?,
                        spec: row.get(1)?,
                        installer: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_requested_dependency(&self, dep: &RequestedDependency) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO requested_dependencies (id, spec, installer) VALUES (?1, ?2, ?3)",
                params![dep.id, dep.spec, dep.installer],
            )
            .map_err(|e| insert_error("requested_dependencies", e))?;
        Ok(())
    }

    // Installed dependency operations

    fn get_installed_dependency(&self, id: &str) -> Result<Option<InstalledDependency>> {
        self.conn
            .query_row(
                "SELECT id, package_name, version, installer, cpe
                 FROM installed_dependencies WHERE id = ?1",
                params![id],
                |row| installed_from_row(row, 0),
            )
            .optional()
            .map_err(Error::from)
    }

    fn find_installed_dependency(
        &self,
        package_name: &str,
        version: &str,
        installer: &str,
    ) -> Result<Option<InstalledDependency>> {
        self.conn
            .query_row(
                "SELECT id, package_name, version, installer, cpe
                 FROM installed_dependencies
                 WHERE package_name = ?1 AND version = ?2 AND installer = ?3",
                params![package_name, version, installer],
                |row| installed_from_row(row, 0),
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_installed_dependency(&self, dep: &InstalledDependency) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO installed_dependencies (id, package_name, version, installer, cpe)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dep.id,
                    dep.package_name,
                    dep.version,
                    dep.installer,
                    dep.cpe
                ],
            )
            .map_err(|e| insert_error("installed_dependencies", e))?;
        Ok(())
    }

    fn set_installed_dependency_cpe(&self, id: &str, cpe: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE installed_dependencies SET cpe = ?1 WHERE id = ?2",
            params![cpe, id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Analysis-dependency links

    fn find_analysis_dependency(
        &self,
        analysis_id: &str,
        requested_dependency_id: &str,
        installed_dependency_id: &str,
    ) -> Result<Option<AnalysisDependency>> {
        self.conn
            .query_row(
                "SELECT id, analysis_id, requested_dependency_id, installed_dependency_id
                 FROM analysis_dependencies
                 WHERE analysis_id = ?1 AND requested_dependency_id = ?2
                   AND installed_dependency_id = ?3",
                params![analysis_id, requested_dependency_id, installed_dependency_id],
                |row| {
                    Ok(AnalysisDependency {
                        id: row.get(0)?,
                        analysis_id: row.get(1)?,
                        requested_dependency_id: row.get(2)?,
                        installed_dependency_id: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_analysis_dependency(&self, link: &AnalysisDependency) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO analysis_dependencies
                    (id, analysis_id, requested_dependency_id, installed_dependency_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    link.id,
                    link.analysis_id,
                    link.requested_dependency_id,
                    link.installed_dependency_id,
                ],
            )
            .map_err(|e| insert_error("analysis_dependencies", e))?;
        Ok(())
    }

    fn list_analysis_dependencies(&self, analysis_id: &str) -> Result<Vec<LinkedDependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.spec, r.installer,
                    i.id, i.package_name, i.version, i.installer, i.cpe
             FROM analysis_dependencies ad
             JOIN requested_dependencies r ON r.id = ad.requested_dependency_id
             JOIN installed_dependencies i ON i.id = ad.installed_dependency_id
             WHERE ad.analysis_id = ?1
             ORDER BY i.installer, i.package_name, i.version, r.spec",
        )?;

        let rows = stmt.query_map(params![analysis_id], |row| {
            Ok(LinkedDependency {
                requested: RequestedDependency {
                    id: row.get(0)?,
                    spec: row.get(1)?,
                    installer: row.get(2)?,
                },
                installed: installed_from_row(row, 3)?,
                vulnerabilities: Vec::new(),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Vulnerability operations

    fn find_vulnerability(&self, cve: &str) -> Result<Option<Vulnerability>> {
        self.conn
            .query_row(
                "SELECT id, cve FROM vulnerabilities WHERE cve = ?1",
                params![cve],
                |row| {
                    Ok(Vulnerability {
                        id: row.get(0)?,
                        cve: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_vulnerability(&self, vulnerability: &Vulnerability) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO vulnerabilities (id, cve) VALUES (?1, ?2)",
                params![vulnerability.id, vulnerability.cve],
            )
            .map_err(|e| insert_error("vulnerabilities", e))?;
        Ok(())
    }

    fn find_vulnerable_dependency(
        &self,
        dependency_id: &str,
        vulnerability_id: &str,
    ) -> Result<Option<VulnerableDependency>> {
        self.conn
            .query_row(
                "SELECT id, dependency_id, vulnerability_id FROM vulnerable_dependencies
                 WHERE dependency_id = ?1 AND vulnerability_id = ?2",
                params![dependency_id, vulnerability_id],
                |row| {
                    Ok(VulnerableDependency {
                        id: row.get(0)?,
                        dependency_id: row.get(1)?,
                        vulnerability_id: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn create_vulnerable_dependency(&self, link: &VulnerableDependency) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO vulnerable_dependencies (id, dependency_id, vulnerability_id)
                 VALUES (?1, ?2, ?3)",
                params![link.id, link.dependency_id, link.vulnerability_id],
            )
            .map_err(|e| insert_error("vulnerable_dependencies", e))?;
        Ok(())
    }

    fn list_dependency_vulnerabilities(&self, dependency_id: &str) -> Result<Vec<Vulnerability>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.id, v.cve
             FROM vulnerable_dependencies vd
             JOIN vulnerabilities v ON v.id = vd.vulnerability_id
             WHERE vd.dependency_id = ?1
             ORDER BY v.cve",
        )?;

        let rows = stmt.query_map(params![dependency_id], |row| {
            Ok(Vulnerability {
                id: row.get(0)?,
                cve: row.get(1)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::latest_version;
    use tempfile::TempDir;

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    fn target(repo: &str, commit: &str) -> Target {
        Target {
            id: new_id(),
            repo: repo.to_string(),
            commit: commit.to_string(),
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"schema_migrations".to_string()));
        assert!(tables.contains(&"targets".to_string()));
        assert!(tables.contains(&"analyses".to_string()));
        assert!(tables.contains(&"requested_dependencies".to_string()));
        assert!(tables.contains(&"installed_dependencies".to_string()));
        assert!(tables.contains(&"vulnerabilities".to_string()));
        assert!(tables.contains(&"vulnerable_dependencies".to_string()));
        assert!(tables.contains(&"analysis_dependencies".to_string()));
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), 0);
        store.initialize().unwrap();
        store.initialize().unwrap();
        drop(store);

        let reopened = SqliteStore::new(&path).unwrap();
        reopened.initialize().unwrap();
        assert_eq!(reopened.schema_version().unwrap(), latest_version());
        assert_eq!(count(&reopened, "schema_migrations"), MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_duplicate_target_is_constraint_violation() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();

        let tx = store.begin().unwrap();
        tx.create_target(&target("acme/widget", "abc123")).unwrap();
        let result = tx.create_target(&target("acme/widget", "abc123"));
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));

        // The failed statement does not poison the transaction.
        tx.create_target(&target("acme/widget", "def456")).unwrap();
        tx.commit().unwrap();

        assert_eq!(count(&store, "targets"), 2);
    }

    #[test]
    fn test_foreign_key_failure_is_not_constraint_violation() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();

        let tx = store.begin().unwrap();
        let result = tx.create_analysis(&Analysis::start("no-such-target", "http://hooks/x"));
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();

        {
            let tx = store.begin().unwrap();
            tx.create_target(&target("acme/widget", "abc123")).unwrap();
        }
        assert_eq!(count(&store, "targets"), 0);

        let tx = store.begin().unwrap();
        tx.create_target(&target("acme/widget", "abc123")).unwrap();
        tx.rollback().unwrap();
        assert_eq!(count(&store, "targets"), 0);
    }

    #[test]
    fn test_analysis_roundtrip_and_update() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();

        let t = target("acme/widget", "abc123");
        let mut analysis = Analysis::start(&t.id, "http://hooks/x");

        let tx = store.begin().unwrap();
        tx.create_target(&t).unwrap();
        tx.create_analysis(&analysis).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        let fetched = tx.get_analysis(&analysis.id).unwrap().unwrap();
        assert_eq!(fetched.status, STATUS_IN_PROGRESS);
        assert!(fetched.finished.is_none());
        assert_eq!(fetched.target_id, t.id);

        analysis.status = "SUCCESS".to_string();
        analysis.finished = Some(Utc::now());
        tx.update_analysis(&analysis).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        let fetched = tx.get_analysis(&analysis.id).unwrap().unwrap();
        assert_eq!(fetched.status, "SUCCESS");
        assert!(fetched.finished.is_some());

        let missing = Analysis::start(&t.id, "http://hooks/x");
        assert!(matches!(tx.update_analysis(&missing), Err(Error::NotFound)));
    }

    #[test]
    fn test_installed_dependency_cpe() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();

        let dep = InstalledDependency {
            id: new_id(),
            package_name: "requests".to_string(),
            version: "2.31.0".to_string(),
            installer: "pip".to_string(),
            cpe: None,
        };

        let tx = store.begin().unwrap();
        tx.create_installed_dependency(&dep).unwrap();
        tx.set_installed_dependency_cpe(&dep.id, "cpe:2.3:a:python:requests:2.31.0")
            .unwrap();

        let fetched = tx
            .find_installed_dependency("requests", "2.31.0", "pip")
            .unwrap()
            .unwrap();
        assert_eq!(
            fetched.cpe.as_deref(),
            Some("cpe:2.3:a:python:requests:2.31.0")
        );
        assert!(matches!(
            tx.set_installed_dependency_cpe("missing", "cpe"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_second_connection_sees_only_committed_rows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");

        let writer = SqliteStore::new(&path).unwrap();
        writer.initialize().unwrap();
        let reader = SqliteStore::new(&path).unwrap();

        let tx = writer.begin().unwrap();
        tx.create_target(&target("acme/widget", "abc123")).unwrap();
        assert_eq!(count(&reader, "targets"), 0);
        tx.commit().unwrap();

        assert_eq!(count(&reader, "targets"), 1);
    }

    #[test]
    fn test_read_transaction_does_not_block_writer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");

        let writer = SqliteStore::new(&path).unwrap();
        writer.initialize().unwrap();
        let reader = SqliteStore::new(&path).unwrap();

        let read = reader.begin_read().unwrap();
        assert!(read.find_target("acme/widget", "abc123").unwrap().is_none());

        let tx = writer.begin().unwrap();
        tx.create_target(&target("acme/widget", "abc123")).unwrap();
        tx.commit().unwrap();

        // The snapshot taken by the first read is kept until the transaction ends.
        assert!(read.find_target("acme/widget", "abc123").unwrap().is_none());
        read.rollback().unwrap();

        let read = reader.begin_read().unwrap();
        assert!(read.find_target("acme/widget", "abc123").unwrap().is_some());
    }
}
