//! Persistence layer: every mutation is a single-statement conditional
//! update keyed on the pre-transition state, so concurrent recipients,
//! owner actions, and retries linearize on the row instead of racing
//! read-then-write in memory.
//!
//! Status guards (`WHERE status IN (...)`) are derived from the transition
//! table in `inkflow_core::transition`; this module never hand-writes a
//! status list.

use chrono::{DateTime, SecondsFormat, Utc};
use inkflow_core::{BatchCounts, SessionAction, SessionStatus, MAX_ATTEMPTS};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::models::{DbBatch, DbBatchRecipient, DbEnvelope, DbSession, DbSessionDocument};

const SESSION_COLUMNS: &str = "id, envelope_id, batch_id, owner_token, recipient_name, \
     recipient_email, status, signing_order, due_date, access_code_hash, access_code_type, \
     access_code_hint, failed_attempts, lockout_until, verified_at, draft_values_json, \
     signed_pdf_url, view_count, cancel_reason, archived, created_at, updated_at, completed_at";

/// Timestamps are stored as fixed-width RFC 3339 UTC text so SQLite's
/// lexicographic comparison orders them correctly.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct NewSession<'a> {
    pub id: &'a str,
    pub envelope_id: Option<&'a str>,
    pub batch_id: Option<&'a str>,
    pub owner_token: &'a str,
    pub recipient_name: &'a str,
    pub recipient_email: &'a str,
    pub status: SessionStatus,
    pub signing_order: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub access_code_hash: Option<String>,
    pub access_code_type: Option<&'a str>,
    pub access_code_hint: Option<&'a str>,
}

pub async fn insert_session(pool: &SqlitePool, new: &NewSession<'_>) -> sqlx::Result<()> {
    let now = ts(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO sessions (id, envelope_id, batch_id, owner_token, recipient_name,
            recipient_email, status, signing_order, due_date, access_code_hash,
            access_code_type, access_code_hint, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.id)
    .bind(new.envelope_id)
    .bind(new.batch_id)
    .bind(new.owner_token)
    .bind(new.recipient_name)
    .bind(new.recipient_email)
    .bind(new.status.as_str())
    .bind(new.signing_order)
    .bind(new.due_date.map(ts))
    .bind(&new.access_code_hash)
    .bind(new.access_code_type)
    .bind(new.access_code_hint)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_session_document(
    pool: &SqlitePool,
    session_id: &str,
    document_id: &str,
    document_name: &str,
    fields_json: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO session_documents (session_id, document_id, document_name, fields_json)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(session_id)
    .bind(document_id)
    .bind(document_name)
    .bind(fields_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_session(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<DbSession>> {
    sqlx::query_as(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ? AND archived = 0"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Lazy expiry: persisted on the first read that observes the due date has
/// passed. The conditional update makes concurrent observers converge.
pub async fn expire_if_due(
    pool: &SqlitePool,
    session: DbSession,
    now: DateTime<Utc>,
) -> sqlx::Result<DbSession> {
    let status: SessionStatus = match session.status.parse() {
        Ok(s) => s,
        Err(_) => return Ok(session),
    };
    let Some(due) = session.due_date else {
        return Ok(session);
    };
    if status.is_terminal() || due >= now {
        return Ok(session);
    }

    sqlx::query(&format!(
        "UPDATE sessions SET status = 'expired', updated_at = ? \
         WHERE id = ? AND status IN ({}) AND due_date < ?",
        SessionAction::Expire.permitted_sql_list()
    ))
    .bind(ts(now))
    .bind(&session.id)
    .bind(ts(now))
    .execute(pool)
    .await?;

    // Re-read: either this update or a concurrent transition won.
    Ok(fetch_session(pool, &session.id).await?.unwrap_or(session))
}

/// First view commits pending -> viewed; every view bumps the counter.
pub async fn record_view(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> sqlx::Result<()> {
    let transitioned = sqlx::query(&format!(
        "UPDATE sessions SET status = 'viewed', view_count = view_count + 1, updated_at = ? \
         WHERE id = ? AND status IN ({})",
        SessionAction::View.permitted_sql_list()
    ))
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;

    if transitioned.rows_affected() == 0 {
        sqlx::query(
            "UPDATE sessions SET view_count = view_count + 1, updated_at = ? \
             WHERE id = ? AND status IN ('viewed', 'awaiting_turn')",
        )
        .bind(ts(now))
        .bind(id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Wholesale draft replacement, rejected once the session is terminal.
/// Returns the number of affected rows; zero on a live id means terminal.
pub async fn update_draft(
    pool: &SqlitePool,
    id: &str,
    draft_json: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE sessions SET draft_values_json = ?, updated_at = ? \
         WHERE id = ? AND status IN ('pending', 'awaiting_turn', 'viewed')",
    )
    .bind(draft_json)
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------
// Access codes
// ---------------------------------------------------------------

/// Success path: reset counters and stamp `verified_at`, conditional on the
/// hash matching and no active lockout. One affected row means VERIFIED.
pub async fn access_verify_success(
    pool: &SqlitePool,
    id: &str,
    candidate_hash: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE sessions SET failed_attempts = 0, lockout_until = NULL, verified_at = ?, \
             updated_at = ? \
         WHERE id = ? AND access_code_hash = ? \
           AND (lockout_until IS NULL OR lockout_until <= ?)",
    )
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .bind(candidate_hash)
    .bind(ts(now))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Failure path: one atomic increment-then-maybe-lock. Returns the
/// post-increment counter and lockout, or `None` when the lockout guard
/// held (a concurrent attempt already locked the session).
pub async fn access_verify_failure(
    pool: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<Option<(u32, Option<DateTime<Utc>>)>> {
    let lockout_at = ts(now + inkflow_core::lockout_duration());
    let row = sqlx::query(
        "UPDATE sessions SET \
             failed_attempts = failed_attempts + 1, \
             lockout_until = CASE WHEN failed_attempts + 1 >= ? THEN ? ELSE lockout_until END, \
             updated_at = ? \
         WHERE id = ? AND (lockout_until IS NULL OR lockout_until <= ?) \
         RETURNING failed_attempts, lockout_until",
    )
    .bind(MAX_ATTEMPTS as i64)
    .bind(lockout_at)
    .bind(ts(now))
    .bind(id)
    .bind(ts(now))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| {
        let attempts: i64 = r.get("failed_attempts");
        let until: Option<DateTime<Utc>> = r.get("lockout_until");
        (attempts as u32, until)
    }))
}

// ---------------------------------------------------------------
// Signing
// ---------------------------------------------------------------

pub async fn list_session_documents(
    pool: &SqlitePool,
    session_id: &str,
) -> sqlx::Result<Vec<DbSessionDocument>> {
    sqlx::query_as(
        "SELECT session_id, document_id, document_name, fields_json, signed, \
                field_values_json, signed_at \
         FROM session_documents WHERE session_id = ? ORDER BY document_id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}

/// Record one document's signed values. The `signed = 0` guard makes a
/// duplicate submission a no-op instead of an overwrite.
pub async fn mark_document_signed(
    pool: &SqlitePool,
    session_id: &str,
    document_id: &str,
    field_values_json: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE session_documents SET signed = 1, field_values_json = ?, signed_at = ? \
         WHERE session_id = ? AND document_id = ? AND signed = 0",
    )
    .bind(field_values_json)
    .bind(ts(now))
    .bind(session_id)
    .bind(document_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn unsigned_document_count(pool: &SqlitePool, session_id: &str) -> sqlx::Result<i64> {
    let row =
        sqlx::query("SELECT COUNT(*) AS n FROM session_documents WHERE session_id = ? AND signed = 0")
            .bind(session_id)
            .fetch_one(pool)
            .await?;
    Ok(row.get("n"))
}

/// The terminal CAS: exactly one concurrent sign (or a racing cancel) wins.
pub async fn commit_signed(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> sqlx::Result<u64> {
    let result = sqlx::query(&format!(
        "UPDATE sessions SET status = 'signed', completed_at = ?, updated_at = ? \
         WHERE id = ? AND status IN ({})",
        SessionAction::Sign.permitted_sql_list()
    ))
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Persist the artifact reference (NULL-guarded, so generation is invoked at
/// most once effectively) and promote signed -> completed. Returns the URL
/// that actually stuck, which may be a concurrent winner's.
pub async fn persist_artifact(
    pool: &SqlitePool,
    id: &str,
    url: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<String> {
    sqlx::query(
        "UPDATE sessions SET signed_pdf_url = ?, updated_at = ? \
         WHERE id = ? AND signed_pdf_url IS NULL",
    )
    .bind(url)
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "UPDATE sessions SET status = 'completed', updated_at = ? \
         WHERE id = ? AND status IN ({}) AND signed_pdf_url IS NOT NULL",
        SessionAction::StoreArtifact.permitted_sql_list()
    ))
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT signed_pdf_url FROM sessions WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    let stored: Option<String> = row.get("signed_pdf_url");
    Ok(stored.unwrap_or_else(|| url.to_string()))
}

/// Cancel every non-terminal session in the scope. Returns the count.
pub async fn cancel_sessions(
    pool: &SqlitePool,
    scope_column: &str,
    scope_value: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    // scope_column is one of the fixed literals below, never user input.
    debug_assert!(matches!(scope_column, "id" | "envelope_id" | "batch_id"));
    let result = sqlx::query(&format!(
        "UPDATE sessions SET status = 'cancelled', cancel_reason = ?, updated_at = ? \
         WHERE {} = ? AND status IN ({})",
        scope_column,
        SessionAction::Cancel.permitted_sql_list()
    ))
    .bind(reason)
    .bind(ts(now))
    .bind(scope_value)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Soft archival of a terminal session.
pub async fn archive_session(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE sessions SET archived = 1, updated_at = ? \
         WHERE id = ? AND status IN ('signed', 'completed', 'cancelled', 'expired')",
    )
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Sequential signing: promote the next waiting recipient to pending.
pub async fn activate_next_recipient(
    pool: &SqlitePool,
    envelope_id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<Option<String>> {
    let next: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM sessions \
         WHERE envelope_id = ? AND status = 'awaiting_turn' AND archived = 0 \
         ORDER BY signing_order LIMIT 1",
    )
    .bind(envelope_id)
    .fetch_optional(pool)
    .await?;

    let Some((next_id,)) = next else {
        return Ok(None);
    };

    let result = sqlx::query(&format!(
        "UPDATE sessions SET status = 'pending', updated_at = ? \
         WHERE id = ? AND status IN ({})",
        SessionAction::Activate.permitted_sql_list()
    ))
    .bind(ts(now))
    .bind(&next_id)
    .execute(pool)
    .await?;

    Ok((result.rows_affected() > 0).then_some(next_id))
}

// ---------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------

pub async fn insert_envelope(
    pool: &SqlitePool,
    id: &str,
    owner_token: &str,
    sequential: bool,
    due_date: Option<DateTime<Utc>>,
) -> sqlx::Result<()> {
    let now = ts(Utc::now());
    sqlx::query(
        "INSERT INTO envelopes (id, owner_token, status, sequential, due_date, created_at, updated_at) \
         VALUES (?, ?, 'sent', ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(owner_token)
    .bind(sequential as i64)
    .bind(due_date.map(ts))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_envelope_document(
    pool: &SqlitePool,
    envelope_id: &str,
    document_id: &str,
    name: &str,
    position: i64,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO envelope_documents (envelope_id, document_id, name, position) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(envelope_id)
    .bind(document_id)
    .bind(name)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_envelope(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<DbEnvelope>> {
    sqlx::query_as(
        "SELECT id, owner_token, status, sequential, due_date, completed_at, created_at, updated_at \
         FROM envelopes WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_envelope_sessions(
    pool: &SqlitePool,
    envelope_id: &str,
) -> sqlx::Result<Vec<DbSession>> {
    sqlx::query_as(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions \
         WHERE envelope_id = ? AND archived = 0 ORDER BY signing_order, recipient_email"
    ))
    .bind(envelope_id)
    .fetch_all(pool)
    .await
}

/// Envelope completion CAS: one affected row means this caller owns the
/// completion side effects (notifier), everyone else observes it done.
pub async fn complete_envelope(
    pool: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE envelopes SET status = 'completed', completed_at = ?, updated_at = ? \
         WHERE id = ? AND status != 'completed'",
    )
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn cancel_envelope(
    pool: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE envelopes SET status = 'cancelled', updated_at = ? \
         WHERE id = ? AND status = 'sent'",
    )
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------
// Bulk send batches
// ---------------------------------------------------------------

pub async fn insert_batch(
    pool: &SqlitePool,
    id: &str,
    owner_token: &str,
    document_id: &str,
    document_name: &str,
    fields_json: &str,
    due_date: Option<DateTime<Utc>>,
) -> sqlx::Result<()> {
    let now = ts(Utc::now());
    sqlx::query(
        "INSERT INTO batches (id, owner_token, document_id, document_name, fields_json, due_date, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(owner_token)
    .bind(document_id)
    .bind(document_name)
    .bind(fields_json)
    .bind(due_date.map(ts))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_batch(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<DbBatch>> {
    sqlx::query_as(
        "SELECT id, owner_token, document_id, document_name, fields_json, due_date, created_at, updated_at \
         FROM batches WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn insert_batch_recipient(
    pool: &SqlitePool,
    batch_id: &str,
    email: &str,
    name: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO batch_recipients (batch_id, email, name, state, updated_at) \
         VALUES (?, ?, ?, 'failed', ?)",
    )
    .bind(batch_id)
    .bind(email)
    .bind(name)
    .bind(ts(now))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_recipient_sent(
    pool: &SqlitePool,
    batch_id: &str,
    email: &str,
    session_id: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE batch_recipients SET state = 'sent', error = NULL, session_id = ?, updated_at = ? \
         WHERE batch_id = ? AND email = ? AND state = 'failed'",
    )
    .bind(session_id)
    .bind(ts(now))
    .bind(batch_id)
    .bind(email)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Record (or replace) a recipient's failure. Retries overwrite the error
/// in place; history is not kept.
pub async fn mark_recipient_failed(
    pool: &SqlitePool,
    batch_id: &str,
    email: &str,
    session_id: Option<&str>,
    error: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE batch_recipients SET state = 'failed', error = ?, \
             session_id = COALESCE(?, session_id), updated_at = ? \
         WHERE batch_id = ? AND email = ? AND state = 'failed'",
    )
    .bind(error)
    .bind(session_id)
    .bind(ts(now))
    .bind(batch_id)
    .bind(email)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_failed_recipients(
    pool: &SqlitePool,
    batch_id: &str,
) -> sqlx::Result<Vec<DbBatchRecipient>> {
    sqlx::query_as(
        "SELECT batch_id, email, name, session_id, state, error, updated_at \
         FROM batch_recipients WHERE batch_id = ? AND state = 'failed' ORDER BY email",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await
}

/// Counts are derived from recipient row states, never cached.
pub async fn batch_counts(pool: &SqlitePool, batch_id: &str) -> sqlx::Result<BatchCounts> {
    let row = sqlx::query(
        "SELECT \
             COUNT(*) AS total, \
             COALESCE(SUM(CASE WHEN state = 'sent' THEN 1 ELSE 0 END), 0) AS sent, \
             COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0) AS failed \
         FROM batch_recipients WHERE batch_id = ?",
    )
    .bind(batch_id)
    .fetch_one(pool)
    .await?;
    let total: i64 = row.get("total");
    let sent: i64 = row.get("sent");
    let failed: i64 = row.get("failed");
    Ok(BatchCounts {
        total: total as u32,
        sent: sent as u32,
        failed: failed as u32,
    })
}

/// Idempotency check for retry: reuse the session already minted for this
/// batch + email instead of creating another.
pub async fn find_batch_session(
    pool: &SqlitePool,
    batch_id: &str,
    email: &str,
) -> sqlx::Result<Option<DbSession>> {
    sqlx::query_as(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions \
         WHERE batch_id = ? AND recipient_email = ? AND archived = 0 LIMIT 1"
    ))
    .bind(batch_id)
    .bind(email)
    .fetch_optional(pool)
    .await
}
