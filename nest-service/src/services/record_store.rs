use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::db::{execute_async, DbPool};
use crate::services::host_lock::HostLocks;
use crate::types::{EnrollmentRecord, EnrollmentState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An enrollment record for {0} already exists")]
    AlreadyExists(String),

    #[error("No enrollment record for {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Persistent per-hostname enrollment records.
///
/// The store is the only writer of enrollment records. `create`, `get` and
/// `complete` on the same hostname never interleave.
#[derive(Clone)]
pub struct RecordStore {
    db: DbPool,
    locks: HostLocks,
}

impl RecordStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            locks: HostLocks::new(),
        }
    }

    /// Open a Pending record for a newly accepted application.
    pub async fn create(&self, hostname: &str) -> Result<EnrollmentRecord, StoreError> {
        let host = hostname.to_string();
        let created = self
            .locked(hostname, move |conn| {
                insert_pending(conn, &host, OffsetDateTime::now_utc())
            })
            .await?;

        let record = created.ok_or_else(|| StoreError::AlreadyExists(hostname.to_string()))?;
        info!("Enrollment record created: hostname={}", hostname);
        Ok(record)
    }

    /// Read a record. A Completed record whose certificate has expired is
    /// flipped to Expired and persisted before it is returned.
    pub async fn get(&self, hostname: &str) -> Result<EnrollmentRecord, StoreError> {
        let host = hostname.to_string();
        let record = self
            .locked(hostname, move |conn| {
                load_with_expiry(conn, &host, OffsetDateTime::now_utc())
            })
            .await?;

        record.ok_or_else(|| StoreError::NotFound(hostname.to_string()))
    }

    /// Mark a hostname as holding a certificate valid until `not_after`.
    pub async fn complete(
        &self,
        hostname: &str,
        not_after: OffsetDateTime,
    ) -> Result<EnrollmentRecord, StoreError> {
        let host = hostname.to_string();
        let record = self
            .locked(hostname, move |conn| {
                mark_completed(conn, &host, not_after, OffsetDateTime::now_utc())
            })
            .await?;

        let record = record.ok_or_else(|| StoreError::NotFound(hostname.to_string()))?;
        info!(
            "Enrollment completed: hostname={}, not_after={}",
            hostname, not_after
        );
        Ok(record)
    }

    /// Run `f` on a pooled connection while holding `hostname`. The guard
    /// travels into the blocking task and is released only when `f` returns,
    /// even if the caller stops waiting.
    async fn locked<F, T>(&self, hostname: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.locks.lock(hostname).await;

        execute_async(&self.db, move |conn| {
            let result = f(conn);
            drop(guard);
            result
        })
        .await
    }
}

fn insert_pending(
    conn: &mut Connection,
    hostname: &str,
    now: OffsetDateTime,
) -> Result<Option<EnrollmentRecord>> {
    let now = now.unix_timestamp();
    let rows = conn
        .execute(
            "INSERT INTO enrollments (hostname, status, cert_not_after, created_at, updated_at)
             VALUES (?1, 'Pending', NULL, ?2, ?2)
             ON CONFLICT(hostname) DO NOTHING",
            rusqlite::params![hostname, now],
        )
        .context("Failed to insert enrollment record")?;

    if rows == 0 {
        return Ok(None);
    }

    Ok(Some(EnrollmentRecord {
        hostname: hostname.to_string(),
        state: EnrollmentState::Pending,
        created_at: now,
        updated_at: now,
    }))
}

fn load_with_expiry(
    conn: &mut Connection,
    hostname: &str,
    now: OffsetDateTime,
) -> Result<Option<EnrollmentRecord>> {
    let tx = conn.transaction().context("Failed to begin transaction")?;

    let Some(mut record) = select_record(&tx, hostname)? else {
        return Ok(None);
    };

    if let EnrollmentState::Completed { not_after } = record.state {
        if not_after < now {
            let updated_at = now.unix_timestamp();
            tx.execute(
                "UPDATE enrollments SET status = 'Expired', updated_at = ?1 WHERE hostname = ?2",
                rusqlite::params![updated_at, hostname],
            )
            .context("Failed to mark enrollment expired")?;

            record.state = EnrollmentState::Expired { not_after };
            record.updated_at = updated_at;
            info!("Certificate expired: hostname={}, not_after={}", hostname, not_after);
        }
    }

    tx.commit().context("Failed to commit transaction")?;
    Ok(Some(record))
}

fn mark_completed(
    conn: &mut Connection,
    hostname: &str,
    not_after: OffsetDateTime,
    now: OffsetDateTime,
) -> Result<Option<EnrollmentRecord>> {
    let tx = conn.transaction().context("Failed to begin transaction")?;

    let rows = tx
        .execute(
            "UPDATE enrollments SET status = 'Completed', cert_not_after = ?1, updated_at = ?2
             WHERE hostname = ?3",
            rusqlite::params![not_after.unix_timestamp(), now.unix_timestamp(), hostname],
        )
        .context("Failed to update enrollment record")?;

    if rows == 0 {
        return Ok(None);
    }

    let record = select_record(&tx, hostname)?;
    tx.commit().context("Failed to commit transaction")?;
    Ok(record)
}

fn select_record(conn: &Connection, hostname: &str) -> Result<Option<EnrollmentRecord>> {
    let row = conn
        .query_row(
            "SELECT status, cert_not_after, created_at, updated_at FROM enrollments WHERE hostname = ?1",
            rusqlite::params![hostname],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()
        .context("Failed to query enrollment record")?;

    let Some((status, not_after, created_at, updated_at)) = row else {
        return Ok(None);
    };

    Ok(Some(EnrollmentRecord {
        hostname: hostname.to_string(),
        state: parse_state(&status, not_after)
            .with_context(|| format!("Corrupt enrollment record for {}", hostname))?,
        created_at,
        updated_at,
    }))
}

fn parse_state(status: &str, not_after: Option<i64>) -> Result<EnrollmentState> {
    let not_after = not_after
        .map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .context("Invalid certificate expiry")?;

    match (status, not_after) {
        ("Pending", None) => Ok(EnrollmentState::Pending),
        ("Completed", Some(not_after)) => Ok(EnrollmentState::Completed { not_after }),
        ("Expired", Some(not_after)) => Ok(EnrollmentState::Expired { not_after }),
        (status, not_after) => anyhow::bail!(
            "status {} with cert_not_after {:?}",
            status,
            not_after
        ),
    }
}
