//! SQLite artifact store.
//!
//! The store is append-only per run: ingestion writes one `runs` row plus
//! its failure/finding rows in a single transaction and never touches prior
//! runs. Deltas are pure set differences over `stable_id` between the two
//! most recent runs of a `(workspace_id, package_scope)` pair.
//!
//! # Migrations
//!
//! The schema is managed by forward-only numbered migrations tracked in
//! `PRAGMA user_version`. Each migration is additive; already-applied
//! versions are skipped on startup.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, Transaction};
use thiserror::Error;

use zax_core::manifest::DeltaSummary;
use zax_core::cache::STATE_DB_FILE;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any SQLite-level failure, including failed migrations.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One test failure to persist.
#[derive(Debug, Clone)]
pub struct TestFailureRow {
    pub stable_id: String,
    pub test_id: String,
    pub file: String,
    pub message: String,
}

/// One lint finding to persist.
#[derive(Debug, Clone)]
pub struct FindingRow {
    pub stable_id: String,
    pub tool: String,
    pub rule: String,
    pub file: String,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
    pub message: String,
}

/// Numbered forward-only migrations. Never reorder or edit a shipped entry;
/// append a new version instead.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE runs (
            run_id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL
        );
        CREATE TABLE test_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            stable_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            file TEXT NOT NULL,
            message TEXT NOT NULL
        );
        CREATE INDEX idx_test_failures_run_stable
            ON test_failures(run_id, stable_id);
        CREATE TABLE findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            stable_id TEXT NOT NULL,
            tool TEXT NOT NULL,
            rule TEXT NOT NULL,
            file TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            start_column INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_column INTEGER NOT NULL,
            message TEXT NOT NULL
        );
        CREATE INDEX idx_findings_run_stable
            ON findings(run_id, stable_id);",
    ),
    (
        2,
        "ALTER TABLE runs ADD COLUMN workspace_id TEXT NOT NULL DEFAULT '';
        CREATE INDEX idx_runs_workspace_started
            ON runs(workspace_id, started_at DESC);",
    ),
    (
        3,
        "ALTER TABLE runs ADD COLUMN package_scope TEXT NOT NULL DEFAULT '';
        ALTER TABLE test_failures ADD COLUMN package TEXT NOT NULL DEFAULT '';
        ALTER TABLE findings ADD COLUMN package TEXT NOT NULL DEFAULT '';
        CREATE INDEX idx_test_failures_run_package
            ON test_failures(run_id, package);
        CREATE INDEX idx_findings_run_package
            ON findings(run_id, package);
        CREATE TABLE dirty_files (
            workspace_id TEXT NOT NULL,
            path TEXT NOT NULL,
            observed_at INTEGER NOT NULL,
            PRIMARY KEY (workspace_id, path)
        );",
    ),
];

/// SQLite-backed store for runs, failures, and findings.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if needed) the store at `<cache_dir>/state.db`.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or a migration
    /// fails. Migration failure is fatal for the backend.
    pub fn open(cache_dir: &Path) -> Result<Self, StoreError> {
        Self::open_at(&cache_dir.join(STATE_DB_FILE))
    }

    /// Opens the store at an explicit database path.
    ///
    /// # Errors
    ///
    /// Same as [`Store::open`].
    pub fn open_at(db_path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "wal", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        apply_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    /// Ingests one run: the `runs` row plus all failure/finding rows, in a
    /// single transaction.
    ///
    /// `started_at` is bumped to stay strictly above the workspace's
    /// previous run so consecutive checks always order deterministically.
    ///
    /// # Errors
    ///
    /// Returns an error on any SQLite failure; nothing is committed then.
    pub fn ingest_run(
        &mut self,
        workspace_id: &str,
        run_id: &str,
        package_scope: &str,
        now_ms: i64,
        failures: &[TestFailureRow],
        findings: &[FindingRow],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        let prev_started: i64 = tx.query_row(
            "SELECT COALESCE(MAX(started_at), 0) FROM runs WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )?;
        let started_at = now_ms.max(prev_started + 1);

        tx.execute(
            "INSERT INTO runs (run_id, started_at, workspace_id, package_scope)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, started_at, workspace_id, package_scope],
        )?;
        insert_failures(&tx, run_id, package_scope, failures)?;
        insert_findings(&tx, run_id, package_scope, findings)?;

        tx.commit()?;
        Ok(())
    }

    /// Computes the delta for `(workspace_id, package_scope)`.
    ///
    /// With no runs at all every count is zero; with exactly one run it is a
    /// baseline (`fixed = 0`, `new = |A|`); otherwise new/fixed are the set
    /// differences between the latest run and its predecessor.
    ///
    /// # Errors
    ///
    /// Returns an error on query failure.
    pub fn delta_summary(
        &self,
        workspace_id: &str,
        package_scope: &str,
    ) -> Result<DeltaSummary, StoreError> {
        let runs = self.recent_runs(workspace_id, package_scope, 2)?;
        let Some(current) = runs.first() else {
            return Ok(DeltaSummary::default());
        };
        let previous = runs.get(1);
        let package = (!package_scope.is_empty()).then_some(package_scope);

        let (new_test_failures, fixed_test_failures) =
            self.kind_delta("test_failures", current, previous, package)?;
        let (new_findings, fixed_findings) =
            self.kind_delta("findings", current, previous, package)?;

        Ok(DeltaSummary {
            new_test_failures,
            fixed_test_failures,
            new_findings,
            fixed_findings,
        })
    }

    /// Records files observed dirty for a workspace (audit trail for the
    /// affected-test selection).
    ///
    /// # Errors
    ///
    /// Returns an error on insert failure.
    pub fn record_dirty_files(
        &mut self,
        workspace_id: &str,
        paths: &[String],
        observed_at: i64,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO dirty_files (workspace_id, path, observed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(workspace_id, path) DO UPDATE SET observed_at = ?3",
            )?;
            for path in paths {
                stmt.execute(params![workspace_id, path, observed_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Latest run ids for a `(workspace_id, package_scope)` pair, newest
    /// first.
    fn recent_runs(
        &self,
        workspace_id: &str,
        package_scope: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id FROM runs
             WHERE workspace_id = ?1 AND package_scope = ?2
             ORDER BY started_at DESC
             LIMIT ?3",
        )?;
        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(params![workspace_id, package_scope, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn kind_delta(
        &self,
        table: &str,
        current: &str,
        previous: Option<&String>,
        package: Option<&str>,
    ) -> Result<(u64, u64), StoreError> {
        let current_ids = self.stable_ids(table, current, package)?;
        let Some(previous) = previous else {
            return Ok((current_ids.len() as u64, 0));
        };
        let previous_ids = self.stable_ids(table, previous, package)?;
        let new = current_ids.difference(&previous_ids).count() as u64;
        let fixed = previous_ids.difference(&current_ids).count() as u64;
        Ok((new, fixed))
    }

    /// Stable-id set for one run, optionally restricted by the `package`
    /// column. `table` is one of the two fixed names, never user input.
    fn stable_ids(
        &self,
        table: &str,
        run_id: &str,
        package: Option<&str>,
    ) -> Result<HashSet<String>, StoreError> {
        let ids = match package {
            Some(package) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT stable_id FROM {table} WHERE run_id = ?1 AND package = ?2"
                ))?;
                let rows = stmt.query_map(params![run_id, package], |row| row.get(0))?;
                rows.collect::<Result<HashSet<String>, _>>()?
            },
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT stable_id FROM {table} WHERE run_id = ?1"))?;
                let rows = stmt.query_map(params![run_id], |row| row.get(0))?;
                rows.collect::<Result<HashSet<String>, _>>()?
            },
        };
        Ok(ids)
    }
}

/// Applies pending migrations in ascending version order.
fn apply_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let mut current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", *version)?;
        tx.commit()?;
        current = *version;
    }
    Ok(())
}

fn insert_failures(
    tx: &Transaction<'_>,
    run_id: &str,
    package: &str,
    failures: &[TestFailureRow],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO test_failures (run_id, stable_id, test_id, file, message, package)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for f in failures {
        stmt.execute(params![run_id, f.stable_id, f.test_id, f.file, f.message, package])?;
    }
    Ok(())
}

fn insert_findings(
    tx: &Transaction<'_>,
    run_id: &str,
    package: &str,
    findings: &[FindingRow],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO findings (run_id, stable_id, tool, rule, file,
                               start_line, start_column, end_line, end_column,
                               message, package)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for f in findings {
        stmt.execute(params![
            run_id,
            f.stable_id,
            f.tool,
            f.rule,
            f.file,
            f.start_line,
            f.start_column,
            f.end_line,
            f.end_column,
            f.message,
            package
        ])?;
    }
    Ok(())
}
