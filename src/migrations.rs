//! Versioned schema changes, applied in order.
//!
//! Each [`Migration`] is one link in a linear revision chain: its
//! `down_revision` names the link it builds on. The revision the
//! database is currently at lives in the single-row `schema_revision`
//! table, and every step (forward or backward) runs in one transaction
//! together with the marker update.

use sqlx::{Row, SqlitePool};

pub struct Migration {
    pub revision: &'static str,
    pub down_revision: Option<&'static str>,
    pub name: &'static str,
    pub upgrade_sql: &'static [&'static str],
    pub downgrade_sql: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        revision: "41cf27f62f9a",
        down_revision: None,
        name: "user table",
        upgrade_sql: &[
            "CREATE TABLE user (
                id INTEGER NOT NULL PRIMARY KEY,
                username VARCHAR(64),
                email VARCHAR(120),
                password_hash VARCHAR(128)
            )",
            "CREATE UNIQUE INDEX ix_user_username ON user (username)",
            "CREATE UNIQUE INDEX ix_user_email ON user (email)",
        ],
        downgrade_sql: &[
            "DROP INDEX ix_user_email",
            "DROP INDEX ix_user_username",
            "DROP TABLE user",
        ],
    },
    Migration {
        revision: "ece9164d0908",
        down_revision: Some("41cf27f62f9a"),
        name: "new fields in user model",
        // SQLite does not enforce VARCHAR lengths, so the 140-char bound
        // needs an explicit CHECK.
        upgrade_sql: &[
            "ALTER TABLE user ADD COLUMN about_me VARCHAR(140)
                CHECK (about_me IS NULL OR length(about_me) <= 140)",
            "ALTER TABLE user ADD COLUMN last_seen TIMESTAMP",
        ],
        downgrade_sql: &[
            "ALTER TABLE user DROP COLUMN last_seen",
            "ALTER TABLE user DROP COLUMN about_me",
        ],
    },
];

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration chain is not linear at revision {revision}")]
    BrokenChain { revision: &'static str },
    #[error("database is at unknown revision {0}")]
    UnknownRevision(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Revision the database is currently at, `None` for a fresh database.
pub async fn current_revision(pool: &SqlitePool) -> Result<Option<String>, MigrationError> {
    ensure_marker_table(pool).await?;
    let row = sqlx::query("SELECT revision FROM schema_revision")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("revision")))
}

/// Apply every migration newer than the current revision, oldest first.
pub async fn upgrade(pool: &SqlitePool) -> Result<(), MigrationError> {
    validate_chain()?;
    let start = match current_revision(pool).await? {
        None => 0,
        Some(rev) => position_of(&rev).ok_or(MigrationError::UnknownRevision(rev))? + 1,
    };
    for migration in &MIGRATIONS[start..] {
        apply(pool, migration).await?;
    }
    Ok(())
}

/// Revert the most recently applied migration, moving the marker back
/// to its predecessor.
pub async fn downgrade(pool: &SqlitePool) -> Result<(), MigrationError> {
    validate_chain()?;
    let Some(rev) = current_revision(pool).await? else {
        tracing::warn!("no migration applied, nothing to downgrade");
        return Ok(());
    };
    let position = position_of(&rev).ok_or(MigrationError::UnknownRevision(rev))?;
    let migration = &MIGRATIONS[position];

    let mut tx = pool.begin().await?;
    for statement in migration.downgrade_sql {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query("DELETE FROM schema_revision")
        .execute(&mut *tx)
        .await?;
    if let Some(down) = migration.down_revision {
        sqlx::query("INSERT INTO schema_revision (revision) VALUES (?)")
            .bind(down)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(
        revision = migration.revision,
        name = migration.name,
        "reverted migration"
    );
    Ok(())
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<(), MigrationError> {
    let mut tx = pool.begin().await?;
    for statement in migration.upgrade_sql {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query("DELETE FROM schema_revision")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO schema_revision (revision) VALUES (?)")
        .bind(migration.revision)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(
        revision = migration.revision,
        name = migration.name,
        "applied migration"
    );
    Ok(())
}

async fn ensure_marker_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_revision (revision VARCHAR(32) NOT NULL PRIMARY KEY)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn validate_chain() -> Result<(), MigrationError> {
    let mut prev: Option<&'static str> = None;
    for migration in MIGRATIONS {
        if migration.down_revision != prev {
            return Err(MigrationError::BrokenChain {
                revision: migration.revision,
            });
        }
        prev = Some(migration.revision);
    }
    Ok(())
}

fn position_of(revision: &str) -> Option<usize> {
    MIGRATIONS.iter().position(|m| m.revision == revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use time::OffsetDateTime;

    // max_connections(1): each new connection to `sqlite::memory:` gets
    // its own empty database.
    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite")
    }

    async fn user_columns(pool: &SqlitePool) -> Vec<String> {
        sqlx::query("PRAGMA table_info(user)")
            .fetch_all(pool)
            .await
            .expect("pragma table_info")
            .iter()
            .map(|row| row.get("name"))
            .collect()
    }

    #[test]
    fn chain_is_linear() {
        assert!(validate_chain().is_ok());
        assert_eq!(MIGRATIONS[0].down_revision, None);
    }

    #[tokio::test]
    async fn upgrade_adds_profile_columns() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("upgrade");

        let columns = user_columns(&pool).await;
        assert!(columns.contains(&"about_me".to_string()));
        assert!(columns.contains(&"last_seen".to_string()));
        assert_eq!(
            current_revision(&pool).await.unwrap().as_deref(),
            Some("ece9164d0908")
        );
    }

    #[tokio::test]
    async fn upgrade_twice_is_a_no_op() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("first upgrade");
        upgrade(&pool).await.expect("second upgrade");
    }

    #[tokio::test]
    async fn new_columns_accept_null() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("upgrade");

        sqlx::query(
            "INSERT INTO user (username, email, about_me, last_seen)
             VALUES ('susan', 'susan@example.com', NULL, NULL)",
        )
        .execute(&pool)
        .await
        .expect("insert with nulls");
    }

    #[tokio::test]
    async fn about_me_is_bounded_to_140_chars() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("upgrade");

        sqlx::query("INSERT INTO user (username, about_me) VALUES ('ok', ?)")
            .bind("a".repeat(140))
            .execute(&pool)
            .await
            .expect("140 chars fit");

        let too_long = sqlx::query("INSERT INTO user (username, about_me) VALUES ('nope', ?)")
            .bind("a".repeat(141))
            .execute(&pool)
            .await;
        assert!(too_long.is_err());
    }

    #[tokio::test]
    async fn last_seen_stores_a_timestamp() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("upgrade");

        sqlx::query("INSERT INTO user (username, last_seen) VALUES ('susan', ?)")
            .bind(OffsetDateTime::now_utc())
            .execute(&pool)
            .await
            .expect("insert timestamp");
    }

    #[tokio::test]
    async fn downgrade_restores_previous_schema() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("upgrade");
        downgrade(&pool).await.expect("downgrade");

        let columns = user_columns(&pool).await;
        assert_eq!(columns, ["id", "username", "email", "password_hash"]);
        assert_eq!(
            current_revision(&pool).await.unwrap().as_deref(),
            Some("41cf27f62f9a")
        );
    }

    #[tokio::test]
    async fn downgrading_everything_leaves_a_fresh_database() {
        let pool = memory_pool().await;
        upgrade(&pool).await.expect("upgrade");
        downgrade(&pool).await.expect("first downgrade");
        downgrade(&pool).await.expect("second downgrade");

        let user_table = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'user'",
        )
        .fetch_optional(&pool)
        .await
        .expect("sqlite_master");
        assert!(user_table.is_none());
        assert_eq!(current_revision(&pool).await.unwrap(), None);

        // One more is a no-op, not an error.
        downgrade(&pool).await.expect("extra downgrade");
    }

    #[tokio::test]
    async fn unknown_stored_revision_is_rejected() {
        let pool = memory_pool().await;
        ensure_marker_table(&pool).await.unwrap();
        sqlx::query("INSERT INTO schema_revision (revision) VALUES ('deadbeef')")
            .execute(&pool)
            .await
            .unwrap();

        let err = upgrade(&pool).await.unwrap_err();
        assert!(matches!(err, MigrationError::UnknownRevision(_)));
    }
}
