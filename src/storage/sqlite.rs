//! SQLite-backed storage.
//!
//! Datetimes are stored as RFC 3339 TEXT with second precision and a `Z` suffix,
//! so lexical order matches chronological order.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Decode, Row, Sqlite, SqlitePool, Type};

use super::{Result, Storage, StorageError};
use crate::types::{
    AuthorCommitCount, Commit, NewCommit, NewRepository, RowRange, RepoName, Repository,
    RepositoryId, RepositoryMetadata, Sha,
};

#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens (creating if missing) a database file and applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::backend("sqlite mkdir", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| StorageError::backend("sqlite connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| StorageError::backend("sqlite connect", e))?;

        Self::with_pool(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// Uses a single connection: every connection to `sqlite::memory:` is a
    /// separate database.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::backend("sqlite connect options", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| StorageError::backend("sqlite connect", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::backend("sqlite schema", e))?;
        Ok(Self { pool })
    }

    /// Interprets a DSN from configuration: `sqlite::memory:`, a `sqlite://` URL
    /// or a plain file path.
    pub async fn connect(dsn: &str) -> Result<Self> {
        if dsn == "sqlite::memory:" || dsn == ":memory:" {
            return Self::in_memory().await;
        }
        let path = dsn
            .strip_prefix("sqlite://")
            .or_else(|| dsn.strip_prefix("sqlite:"))
            .unwrap_or(dsn);
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        Self::open(path).await
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  full_name TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL,
  description TEXT NOT NULL,
  url TEXT NOT NULL,
  language TEXT NOT NULL,
  forks_count INTEGER NOT NULL,
  stars_count INTEGER NOT NULL,
  open_issues_count INTEGER NOT NULL,
  watchers_count INTEGER NOT NULL,
  repo_created_at TEXT NULL,
  repo_updated_at TEXT NULL,
  fetched_at TEXT NOT NULL,
  last_commit_sha TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS commits (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  repo_id INTEGER NOT NULL REFERENCES repositories(id),
  hash TEXT NOT NULL UNIQUE,
  message TEXT NOT NULL,
  author TEXT NOT NULL,
  author_email TEXT NOT NULL,
  date TEXT NOT NULL,
  url TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS commits_repo_date_idx ON commits(repo_id, date DESC);
CREATE INDEX IF NOT EXISTS commits_author_idx ON commits(author);
"#;

const REPOSITORY_COLUMNS: &str = "id, full_name, name, description, url, language, forks_count, \
     stars_count, open_issues_count, watchers_count, repo_created_at, repo_updated_at, \
     fetched_at, last_commit_sha";

const COMMIT_COLUMNS: &str =
    "id, repo_id, hash, message, author, author_email, date, url, created_at, updated_at";

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_repository(&self, repo: NewRepository) -> Result<Repository> {
        let full_name = repo.full_name.full_name();
        let m = &repo.metadata;
        let result = sqlx::query(
            r#"
INSERT INTO repositories
  (full_name, name, description, url, language, forks_count, stars_count,
   open_issues_count, watchers_count, repo_created_at, repo_updated_at, fetched_at,
   last_commit_sha)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, '')
"#,
        )
        .bind(&full_name)
        .bind(&m.name)
        .bind(&m.description)
        .bind(&m.url)
        .bind(&m.language)
        .bind(m.forks_count)
        .bind(m.stars_count)
        .bind(m.open_issues_count)
        .bind(m.watchers_count)
        .bind(m.created_at.map(format_dt))
        .bind(m.updated_at.map(format_dt))
        .bind(format_dt(repo.fetched_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Conflict(format!("repository {full_name} already exists"))
            }
            other => StorageError::backend("insert repository", other),
        })?;

        Ok(Repository {
            id: RepositoryId(result.last_insert_rowid()),
            full_name: repo.full_name,
            metadata: repo.metadata,
            fetched_at: repo.fetched_at,
            last_commit_sha: Sha::empty(),
        })
    }

    async fn find_repository(&self, full_name: &RepoName) -> Result<Option<Repository>> {
        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE full_name = ?1");
        let row = sqlx::query(&sql)
            .bind(full_name.full_name())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::backend("find repository", e))?;
        row.as_ref().map(row_to_repository).transpose()
    }

    async fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>> {
        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::backend("get repository", e))?;
        row.as_ref().map(row_to_repository).transpose()
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::backend("list repositories", e))?;
        rows.iter().map(row_to_repository).collect()
    }

    async fn advance_checkpoint(
        &self,
        id: RepositoryId,
        expected: &Sha,
        next: &Sha,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE repositories SET last_commit_sha = ?1 WHERE id = ?2 AND last_commit_sha = ?3",
        )
        .bind(next.as_str())
        .bind(id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::backend("advance checkpoint", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM repositories WHERE id = ?1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::backend("advance checkpoint lookup", e))?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(format!("repository {id}"))),
        }
    }

    async fn upsert_commits(&self, commits: &[NewCommit]) -> Result<u64> {
        if commits.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::backend("begin upsert", e))?;
        let now = format_dt(Utc::now());
        let mut written = 0u64;

        for commit in commits {
            let result = sqlx::query(
                r#"
INSERT INTO commits
  (repo_id, hash, message, author, author_email, date, url, created_at, updated_at)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
ON CONFLICT(hash) DO UPDATE SET
  message = excluded.message,
  author = excluded.author,
  author_email = excluded.author_email,
  date = excluded.date,
  url = excluded.url,
  updated_at = excluded.updated_at
"#,
            )
            .bind(commit.repo_id.0)
            .bind(commit.hash.as_str())
            .bind(&commit.message)
            .bind(&commit.author)
            .bind(&commit.author_email)
            .bind(format_dt(commit.date))
            .bind(&commit.url)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    StorageError::NotFound(format!("repository {}", commit.repo_id))
                }
                other => StorageError::backend("upsert commit", other),
            })?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::backend("commit upsert", e))?;
        Ok(written)
    }

    async fn find_commit(&self, hash: &Sha) -> Result<Option<Commit>> {
        let sql = format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE hash = ?1");
        let row = sqlx::query(&sql)
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::backend("find commit", e))?;
        row.as_ref().map(row_to_commit).transpose()
    }

    async fn count_commits(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM commits")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::backend("count commits", e))?;
        let n: i64 = column(&row, "n")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn commits_for_repository(
        &self,
        id: RepositoryId,
        range: RowRange,
    ) -> Result<Vec<Commit>> {
        let sql = format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE repo_id = ?1 \
             ORDER BY date DESC, id DESC LIMIT ?2 OFFSET ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(id.0)
            .bind(to_i64(range.limit))
            .bind(to_i64(range.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::backend("list commits", e))?;
        rows.iter().map(row_to_commit).collect()
    }

    async fn top_commit_authors(&self, range: RowRange) -> Result<Vec<AuthorCommitCount>> {
        let rows = sqlx::query(
            r#"
SELECT author, COUNT(*) AS commit_count
FROM commits
GROUP BY author
ORDER BY commit_count DESC, author ASC
LIMIT ?1 OFFSET ?2
"#,
        )
        .bind(to_i64(range.limit))
        .bind(to_i64(range.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::backend("top commit authors", e))?;

        rows.iter()
            .map(|row| {
                Ok(AuthorCommitCount {
                    author: column(row, "author")?,
                    commit_count: column(row, "commit_count")?,
                })
            })
            .collect()
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn format_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_dt(column: &str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("{column}: {e}")))
}

/// Reads one column, reporting type mismatches and NULLs as corruption.
fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StorageError::Corrupt(format!("{name}: {e}")))
}

fn dt_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>> {
    parse_dt(name, &column::<String>(row, name)?)
}

fn opt_dt_column(row: &SqliteRow, name: &str) -> Result<Option<DateTime<Utc>>> {
    column::<Option<String>>(row, name)?
        .map(|s| parse_dt(name, &s))
        .transpose()
}

fn row_to_repository(row: &SqliteRow) -> Result<Repository> {
    let full_name: String = column(row, "full_name")?;
    let full_name = RepoName::parse(&full_name)
        .map_err(|e| StorageError::Corrupt(format!("full_name: {e}")))?;

    Ok(Repository {
        id: RepositoryId(column(row, "id")?),
        full_name,
        metadata: RepositoryMetadata {
            name: column(row, "name")?,
            description: column(row, "description")?,
            url: column(row, "url")?,
            language: column(row, "language")?,
            forks_count: column(row, "forks_count")?,
            stars_count: column(row, "stars_count")?,
            open_issues_count: column(row, "open_issues_count")?,
            watchers_count: column(row, "watchers_count")?,
            created_at: opt_dt_column(row, "repo_created_at")?,
            updated_at: opt_dt_column(row, "repo_updated_at")?,
        },
        fetched_at: dt_column(row, "fetched_at")?,
        last_commit_sha: Sha::new(column::<String>(row, "last_commit_sha")?),
    })
}

fn row_to_commit(row: &SqliteRow) -> Result<Commit> {
    Ok(Commit {
        id: column(row, "id")?,
        repo_id: RepositoryId(column(row, "repo_id")?),
        hash: Sha::new(column::<String>(row, "hash")?),
        message: column(row, "message")?,
        author: column(row, "author")?,
        author_email: column(row, "author_email")?,
        date: dt_column(row, "date")?,
        url: column(row, "url")?,
        created_at: dt_column(row, "created_at")?,
        updated_at: dt_column(row, "updated_at")?,
    })
}
