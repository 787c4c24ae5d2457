//! HTTP handlers for the Inkflow API.
//!
//! Handlers validate input, pre-classify the action against the transition
//! table, and then rely on the store's conditional updates for the actual
//! linearization. External side effects (artifact generation, notification
//! dispatch) always run after the state commit they belong to.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use inkflow_core::{
    access_code, envelope_outcome, transition, EnvelopeOutcome, EnvelopeStatus, Normalization,
    Progress, SessionAction, SessionStatus, TransitionError, TransitionOutcome, VerifyOutcome,
};

use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;
use crate::store::{self, NewSession};

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------

fn parse_status(session: &DbSession) -> Result<SessionStatus, ApiError> {
    session
        .status
        .parse()
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("corrupt status for {}", session.id)))
}

/// Load a session, persisting expiry lazily if the due date has passed.
async fn load_session(state: &AppState, id: &str) -> Result<DbSession, ApiError> {
    let session = store::fetch_session(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session", id.to_string()))?;
    Ok(store::expire_if_due(&state.db, session, Utc::now()).await?)
}

/// Recipient-facing operations are gated on access-code verification when a
/// code is attached to the session.
fn require_verified(session: &DbSession) -> Result<(), ApiError> {
    if session.access_code_required() && session.verified_at.is_none() {
        return Err(ApiError::Forbidden(
            "access code verification required".to_string(),
        ));
    }
    Ok(())
}

fn require_owner(headers: &HeaderMap, session_owner_token: &str) -> Result<(), ApiError> {
    let presented = headers
        .get("x-owner-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Forbidden("owner token required".to_string()))?;
    if presented != session_owner_token {
        return Err(ApiError::Forbidden("owner token mismatch".to_string()));
    }
    Ok(())
}

fn required_field_ids(documents: &[DbSessionDocument]) -> Vec<String> {
    documents
        .iter()
        .flat_map(|d| d.fields())
        .filter(|f| f.required)
        .map(|f| f.id)
        .collect()
}

fn hash_for(code: &str, code_type: &str) -> String {
    access_code::hash_code(code, Normalization::for_code_type(code_type))
}

/// Gather the committed field values of every signed document, the payload
/// handed to the artifact generator.
fn signed_fields_payload(documents: &[DbSessionDocument]) -> serde_json::Value {
    let mut by_document = serde_json::Map::new();
    for doc in documents {
        if doc.signed != 0 {
            let values: serde_json::Value = doc
                .field_values_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok())
                .unwrap_or_else(|| json!({}));
            by_document.insert(doc.document_id.clone(), values);
        }
    }
    serde_json::Value::Object(by_document)
}

/// Generate and persist the signed artifact if it is still missing, then
/// promote `signed -> completed`. Safe to call repeatedly: the NULL guard on
/// the URL column makes generation effectively once.
async fn ensure_artifact(state: &AppState, session: &DbSession) -> Result<String, ApiError> {
    if let Some(url) = &session.signed_pdf_url {
        return Ok(url.clone());
    }

    let documents = store::list_session_documents(&state.db, &session.id).await?;
    let payload = signed_fields_payload(&documents);
    let url = state
        .artifacts
        .generate(&session.id, &payload)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    Ok(store::persist_artifact(&state.db, &session.id, &url, Utc::now()).await?)
}

/// Artifact plus the envelope bookkeeping that hangs off a completion.
/// Every path that finishes a session goes through here, including retries,
/// so a failed generation can never strand a sequential successor in
/// `awaiting_turn`.
async fn finish_completion(
    state: &AppState,
    session: &DbSession,
) -> Result<(String, Option<String>), ApiError> {
    let url = ensure_artifact(state, session).await?;
    let mut envelope_status = None;
    if let Some(envelope_id) = session.envelope_id.as_deref() {
        store::activate_next_recipient(&state.db, envelope_id, Utc::now()).await?;
        let status = recompute_envelope(state, envelope_id).await?;
        envelope_status = Some(status.to_string());
    }
    Ok((url, envelope_status))
}

/// Recompute envelope completion after a recipient reached `completed`.
/// The envelope CAS makes the completion notification exactly-once; the
/// partial-progress notification is fire-and-forget.
async fn recompute_envelope(
    state: &AppState,
    envelope_id: &str,
) -> Result<EnvelopeStatus, ApiError> {
    let sessions = store::list_envelope_sessions(&state.db, envelope_id).await?;
    let statuses: Vec<SessionStatus> = sessions
        .iter()
        .filter_map(|s| s.status.parse().ok())
        .collect();

    match envelope_outcome(statuses) {
        EnvelopeOutcome::Complete => {
            let won = store::complete_envelope(&state.db, envelope_id, Utc::now()).await?;
            if won > 0 {
                tracing::info!("envelope {} fully executed", envelope_id);
                for session in &sessions {
                    if let Err(e) = state
                        .notifier
                        .send(
                            &session.recipient_email,
                            "All parties have signed",
                            &json!({ "envelopeId": envelope_id, "event": "completed" }),
                        )
                        .await
                    {
                        tracing::warn!("completion notification failed: {}", e);
                    }
                }
            }
            Ok(EnvelopeStatus::Completed)
        }
        EnvelopeOutcome::InProgress { done, total } => {
            // Partial completion is expected, not an error.
            if let Err(e) = state
                .notifier
                .send(
                    "owner",
                    "Signing progress update",
                    &json!({ "envelopeId": envelope_id, "done": done, "total": total }),
                )
                .await
            {
                tracing::debug!("progress notification failed: {}", e);
            }
            Ok(EnvelopeStatus::Sent)
        }
    }
}

async fn session_view(state: &AppState, session: &DbSession) -> Result<SessionView, ApiError> {
    let documents = store::list_session_documents(&state.db, &session.id).await?;
    let draft = session.draft();
    let progress = Progress::compute(&required_field_ids(&documents), &draft);
    Ok(SessionView {
        session_id: session.id.clone(),
        recipient: RecipientInput {
            name: session.recipient_name.clone(),
            email: session.recipient_email.clone(),
        },
        status: session.status.clone(),
        due_date: session.due_date,
        documents: documents
            .into_iter()
            .map(|d| SessionDocumentView {
                fields: d.fields(),
                document_id: d.document_id,
                document_name: d.document_name,
                signed: d.signed != 0,
            })
            .collect(),
        draft_field_values: draft,
        progress,
        view_count: session.view_count,
        access_code_required: session.access_code_required(),
        signed_pdf_url: session.signed_pdf_url.clone(),
    })
}

// ---------------------------------------------------------------
// Single-recipient sends
// ---------------------------------------------------------------

pub async fn create_signature(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSignatureRequest>,
) -> Result<Json<CreateSignatureResponse>, ApiError> {
    if req.recipient.email.trim().is_empty() {
        return Err(ApiError::Validation("recipient email is required".into()));
    }
    if req.fields.is_empty() {
        return Err(ApiError::Validation(
            "at least one field is required".into(),
        ));
    }

    let session_id = Uuid::new_v4().to_string();
    let owner_token = Uuid::new_v4().to_string();

    let new = NewSession {
        id: &session_id,
        envelope_id: None,
        batch_id: None,
        owner_token: &owner_token,
        recipient_name: &req.recipient.name,
        recipient_email: &req.recipient.email,
        status: SessionStatus::Pending,
        signing_order: 0,
        due_date: req.due_date,
        access_code_hash: req
            .access_code
            .as_ref()
            .map(|ac| hash_for(&ac.code, &ac.code_type)),
        access_code_type: req.access_code.as_ref().map(|ac| ac.code_type.as_str()),
        access_code_hint: req.access_code.as_ref().and_then(|ac| ac.hint.as_deref()),
    };
    store::insert_session(&state.db, &new).await?;

    let fields_json = serde_json::to_string(&req.fields)
        .map_err(|e| ApiError::Validation(format!("invalid fields: {e}")))?;
    store::insert_session_document(
        &state.db,
        &session_id,
        &req.document_id,
        &req.document_name,
        &fields_json,
    )
    .await?;

    let signing_url = state.signing_url(&session_id);
    if let Err(e) = state
        .notifier
        .send(
            &req.recipient.email,
            &format!("Signature requested: {}", req.document_name),
            &json!({ "signingUrl": signing_url, "documentName": req.document_name }),
        )
        .await
    {
        tracing::warn!("invite dispatch failed for {}: {}", session_id, e);
    }

    tracing::info!("Created session: {}", session_id);
    Ok(Json(CreateSignatureResponse {
        session_id,
        owner_token,
        status: SessionStatus::Pending.to_string(),
        signing_url,
    }))
}

/// Recipient content fetch. The first successful fetch commits
/// pending -> viewed; later ones only bump the view counter.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = load_session(&state, &id).await?;
    require_verified(&session)?;

    // Terminal sessions remain readable; the counter just stops moving.
    let status = parse_status(&session)?;
    if !status.is_terminal() {
        store::record_view(&state.db, &id, Utc::now()).await?;
    }

    let session = store::fetch_session(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session", id))?;
    Ok(Json(session_view(&state, &session).await?))
}

// ---------------------------------------------------------------
// Access codes
// ---------------------------------------------------------------

pub async fn verify_access_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<VerifyAccessCodeRequest>,
) -> Result<(StatusCode, Json<VerifyAccessCodeResponse>), ApiError> {
    if req.access_code.trim().is_empty() {
        return Err(ApiError::Validation("access code is required".into()));
    }

    let session = load_session(&state, &id).await?;
    if !session.access_code_required() {
        return Err(ApiError::Validation(
            "session does not require an access code".into(),
        ));
    }
    let code_type = session.access_code_type.as_deref().unwrap_or("pin");

    let now = Utc::now();

    // An active lockout fails fast and consumes nothing.
    if let Some(until) = session.lockout_until {
        if until > now {
            return Err(ApiError::Locked {
                until,
                retry_after_seconds: (until - now).num_seconds().max(0),
            });
        }
    }

    let candidate = hash_for(&req.access_code, code_type);
    if store::access_verify_success(&state.db, &id, &candidate, now).await? > 0 {
        tracing::info!("access code verified for session {}", id);
        return Ok((
            StatusCode::OK,
            Json(VerifyAccessCodeResponse::Verified { verified_at: now }),
        ));
    }

    // Mismatch, or a concurrent attempt locked the session first. The
    // failure path is one atomic increment-and-maybe-lock statement.
    match store::access_verify_failure(&state.db, &id, now).await? {
        Some((attempts, lockout_until)) => {
            match inkflow_core::failure_outcome(attempts, lockout_until) {
                VerifyOutcome::Locked { until } => Err(ApiError::Locked {
                    until,
                    retry_after_seconds: (until - now).num_seconds().max(0),
                }),
                VerifyOutcome::Invalid { attempts_remaining } => Ok((
                    StatusCode::UNAUTHORIZED,
                    Json(VerifyAccessCodeResponse::Invalid { attempts_remaining }),
                )),
                VerifyOutcome::Verified => unreachable!("failure path never verifies"),
            }
        }
        None => {
            // Lockout guard held: re-read for the countdown.
            let session = load_session(&state, &id).await?;
            let until = session.lockout_until.unwrap_or(now);
            Err(ApiError::Locked {
                until,
                retry_after_seconds: (until - now).num_seconds().max(0),
            })
        }
    }
}

pub async fn access_code_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccessCodeStateResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    let now = Utc::now();
    let is_locked = session.lockout_until.is_some_and(|u| u > now);
    Ok(Json(AccessCodeStateResponse {
        access_code_required: session.access_code_required(),
        hint: session.access_code_hint.clone(),
        verified: session.verified_at.is_some(),
        is_locked,
        lockout_until: session.lockout_until.filter(|u| *u > now),
        attempts_remaining: inkflow_core::MAX_ATTEMPTS
            .saturating_sub(session.failed_attempts as u32),
    }))
}

// ---------------------------------------------------------------
// Autosave
// ---------------------------------------------------------------

pub async fn autosave(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AutosaveRequest>,
) -> Result<Json<AutosaveResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    require_verified(&session)?;

    let status = parse_status(&session)?;
    if status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "ALREADY_COMPLETED: session is {status}"
        )));
    }

    let draft = req.into_draft();
    let draft_json = serde_json::to_string(&draft)
        .map_err(|e| ApiError::Validation(format!("invalid field values: {e}")))?;

    // The status guard re-checks under the update; a sign racing past the
    // read above loses nothing.
    if store::update_draft(&state.db, &id, &draft_json, Utc::now()).await? == 0 {
        return Err(ApiError::Conflict(
            "ALREADY_COMPLETED: session reached a terminal state".into(),
        ));
    }

    let documents = store::list_session_documents(&state.db, &id).await?;
    let progress = Progress::compute(&required_field_ids(&documents), &draft);
    Ok(Json(AutosaveResponse { progress }))
}

// ---------------------------------------------------------------
// Signing
// ---------------------------------------------------------------

pub async fn sign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    if req.signed_documents.is_empty() {
        return Err(ApiError::Validation(
            "signedDocuments must not be empty".into(),
        ));
    }

    let session = load_session(&state, &id).await?;
    require_verified(&session)?;
    let status = parse_status(&session)?;

    match transition::apply(status, SessionAction::Sign) {
        Ok(TransitionOutcome::Move(_)) => {}
        // Retried completion: hand back the stored result, regenerating the
        // artifact if the previous attempt failed upstream.
        Ok(TransitionOutcome::PriorResult(_)) => {
            let (url, envelope_status) = finish_completion(&state, &session).await?;
            let session = load_session(&state, &id).await?;
            return Ok(Json(SignResponse {
                status: session.status,
                download_link: Some(format!("{url}?download=1")),
                signed_pdf_url: Some(url),
                remaining_documents: 0,
                envelope_status,
            }));
        }
        Ok(TransitionOutcome::Noop(s)) => {
            return Err(ApiError::Conflict(format!("cannot sign from {s}")))
        }
        Err(TransitionError::AwaitingTurn) => {
            return Err(ApiError::Conflict(
                "predecessors have not finished signing".into(),
            ))
        }
        Err(e) => return Err(ApiError::Conflict(e.to_string())),
    }

    let documents = store::list_session_documents(&state.db, &id).await?;
    let by_id: HashMap<&str, &DbSessionDocument> = documents
        .iter()
        .map(|d| (d.document_id.as_str(), d))
        .collect();

    // Validate before mutating anything: unknown documents and missing
    // required values are both VALIDATION.
    for submitted in &req.signed_documents {
        let doc = by_id.get(submitted.document_id.as_str()).ok_or_else(|| {
            ApiError::Validation(format!("unknown document: {}", submitted.document_id))
        })?;
        for field in doc.fields() {
            if field.required {
                let filled = submitted
                    .field_values
                    .get(&field.id)
                    .is_some_and(|v| !v.trim().is_empty());
                if !filled && doc.signed == 0 {
                    return Err(ApiError::Validation(format!(
                        "missing required field {} on document {}",
                        field.id, submitted.document_id
                    )));
                }
            }
        }
    }

    let now = Utc::now();
    for submitted in &req.signed_documents {
        let values_json = serde_json::to_string(&submitted.field_values)
            .map_err(|e| ApiError::Validation(format!("invalid field values: {e}")))?;
        store::mark_document_signed(&state.db, &id, &submitted.document_id, &values_json, now)
            .await?;
    }

    let remaining = store::unsigned_document_count(&state.db, &id).await?;
    if remaining > 0 {
        tracing::info!("session {}: {} documents still unsigned", id, remaining);
        let session = load_session(&state, &id).await?;
        return Ok(Json(SignResponse {
            status: session.status,
            signed_pdf_url: None,
            download_link: None,
            remaining_documents: remaining,
            envelope_status: None,
        }));
    }

    // All documents covered: take the terminal CAS. Exactly one of a
    // concurrent sign/cancel pair wins.
    if store::commit_signed(&state.db, &id, now).await? == 0 {
        let session = load_session(&state, &id).await?;
        let status = parse_status(&session)?;
        if status.is_terminal_success() {
            let (url, envelope_status) = finish_completion(&state, &session).await?;
            return Ok(Json(SignResponse {
                status: session.status,
                download_link: Some(format!("{url}?download=1")),
                signed_pdf_url: Some(url),
                remaining_documents: 0,
                envelope_status,
            }));
        }
        return Err(ApiError::Conflict(format!("session is {status}")));
    }

    tracing::info!("session {} signed by {}", id, session.recipient_email);

    // Side effects strictly after the commit. Artifact failure surfaces as
    // UPSTREAM_FAILURE; the session stays `signed` and regenerates later.
    let session = load_session(&state, &id).await?;
    let (url, envelope_status) = finish_completion(&state, &session).await?;

    Ok(Json(SignResponse {
        status: SessionStatus::Completed.to_string(),
        download_link: Some(format!("{url}?download=1")),
        signed_pdf_url: Some(url),
        remaining_documents: 0,
        envelope_status,
    }))
}

// ---------------------------------------------------------------
// Cancel / archive
// ---------------------------------------------------------------

/// Owner cancels every live session tied to the same envelope or batch;
/// a standalone session cancels alone.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    require_owner(&headers, &session.owner_token)?;

    let status = parse_status(&session)?;
    if let Err(TransitionError::Terminal(s)) = transition::apply(status, SessionAction::Cancel) {
        if s.is_terminal_success() {
            return Err(ApiError::Conflict(format!(
                "cannot cancel: session already {s}"
            )));
        }
    }

    let now = Utc::now();
    let reason = req.reason.as_deref();
    let cancelled = if let Some(envelope_id) = session.envelope_id.as_deref() {
        let n = store::cancel_sessions(&state.db, "envelope_id", envelope_id, reason, now).await?;
        store::cancel_envelope(&state.db, envelope_id, now).await?;
        n
    } else if let Some(batch_id) = session.batch_id.as_deref() {
        store::cancel_sessions(&state.db, "batch_id", batch_id, reason, now).await?
    } else {
        store::cancel_sessions(&state.db, "id", &id, reason, now).await?
    };

    tracing::info!("cancelled {} session(s) via {}", cancelled, id);
    Ok(Json(CancelResponse {
        cancelled_count: cancelled,
    }))
}

pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ArchiveResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    require_owner(&headers, &session.owner_token)?;

    if store::archive_session(&state.db, &id, Utc::now()).await? == 0 {
        return Err(ApiError::Conflict(
            "only terminal sessions can be archived".into(),
        ));
    }
    Ok(Json(ArchiveResponse { archived: true }))
}

// ---------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------

pub async fn create_envelope(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEnvelopeRequest>,
) -> Result<Json<CreateEnvelopeResponse>, ApiError> {
    if req.documents.is_empty() {
        return Err(ApiError::Validation("envelope needs documents".into()));
    }
    if req.recipients.is_empty() {
        return Err(ApiError::Validation("envelope needs recipients".into()));
    }
    let emails: Vec<&str> = req.recipients.iter().map(|r| r.email.as_str()).collect();
    for doc in &req.documents {
        for field in &doc.fields {
            if !emails.contains(&field.recipient_email.as_str()) {
                return Err(ApiError::Validation(format!(
                    "field {} references unknown recipient {}",
                    field.id, field.recipient_email
                )));
            }
        }
    }

    let envelope_id = Uuid::new_v4().to_string();
    let owner_token = Uuid::new_v4().to_string();
    store::insert_envelope(
        &state.db,
        &envelope_id,
        &owner_token,
        req.sequential,
        req.due_date,
    )
    .await?;
    for (position, doc) in req.documents.iter().enumerate() {
        store::insert_envelope_document(
            &state.db,
            &envelope_id,
            &doc.id,
            &doc.name,
            position as i64,
        )
        .await?;
    }

    let mut recipients = Vec::with_capacity(req.recipients.len());
    for (order, recipient) in req.recipients.iter().enumerate() {
        // Sequential envelopes open only the first recipient's turn.
        let status = if req.sequential && order > 0 {
            SessionStatus::AwaitingTurn
        } else {
            SessionStatus::Pending
        };
        let session_id = Uuid::new_v4().to_string();
        let new = NewSession {
            id: &session_id,
            envelope_id: Some(&envelope_id),
            batch_id: None,
            owner_token: &owner_token,
            recipient_name: &recipient.name,
            recipient_email: &recipient.email,
            status,
            signing_order: order as i64,
            due_date: req.due_date,
            access_code_hash: recipient
                .access_code
                .as_ref()
                .map(|ac| hash_for(&ac.code, &ac.code_type)),
            access_code_type: recipient.access_code.as_ref().map(|ac| ac.code_type.as_str()),
            access_code_hint: recipient
                .access_code
                .as_ref()
                .and_then(|ac| ac.hint.as_deref()),
        };
        store::insert_session(&state.db, &new).await?;

        // Each recipient signs the documents that carry their fields.
        let mut any_fields = false;
        for doc in &req.documents {
            let fields: Vec<FieldSpec> = doc
                .fields
                .iter()
                .filter(|f| f.recipient_email == recipient.email)
                .map(|f| FieldSpec {
                    id: f.id.clone(),
                    field_type: f.field_type.clone(),
                    required: f.required,
                })
                .collect();
            if fields.is_empty() {
                continue;
            }
            any_fields = true;
            let fields_json = serde_json::to_string(&fields)
                .map_err(|e| ApiError::Validation(format!("invalid fields: {e}")))?;
            store::insert_session_document(
                &state.db,
                &session_id,
                &doc.id,
                &doc.name,
                &fields_json,
            )
            .await?;
        }
        if !any_fields {
            return Err(ApiError::Validation(format!(
                "recipient {} has no fields in any document",
                recipient.email
            )));
        }

        if status == SessionStatus::Pending {
            if let Err(e) = state
                .notifier
                .send(
                    &recipient.email,
                    "You have documents to sign",
                    &json!({ "signingUrl": state.signing_url(&session_id) }),
                )
                .await
            {
                tracing::warn!("envelope invite dispatch failed: {}", e);
            }
        }

        recipients.push(EnvelopeRecipientView {
            session_id,
            name: recipient.name.clone(),
            email: recipient.email.clone(),
            status: status.to_string(),
            signed_pdf_url: None,
        });
    }

    tracing::info!(
        "Created envelope {} with {} recipients",
        envelope_id,
        recipients.len()
    );
    Ok(Json(CreateEnvelopeResponse {
        envelope_id,
        owner_token,
        status: EnvelopeStatus::Sent.to_string(),
        recipients,
    }))
}

/// Envelope status is recomputed from the recipient sessions on every read;
/// completion observed here is persisted through the same CAS as the
/// sign-time path.
pub async fn get_envelope(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EnvelopeStatusResponse>, ApiError> {
    let envelope = store::fetch_envelope(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("envelope", id.clone()))?;

    let sessions = store::list_envelope_sessions(&state.db, &id).await?;
    let statuses: Vec<SessionStatus> = sessions
        .iter()
        .filter_map(|s| s.status.parse().ok())
        .collect();

    let derived = if envelope.status == EnvelopeStatus::Cancelled.as_str() {
        EnvelopeStatus::Cancelled
    } else {
        match envelope_outcome(statuses) {
            EnvelopeOutcome::Complete => {
                store::complete_envelope(&state.db, &id, Utc::now()).await?;
                EnvelopeStatus::Completed
            }
            EnvelopeOutcome::InProgress { .. } => EnvelopeStatus::Sent,
        }
    };

    let envelope = store::fetch_envelope(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("envelope", id.clone()))?;

    Ok(Json(EnvelopeStatusResponse {
        envelope_id: envelope.id,
        status: derived.to_string(),
        completed_at: envelope.completed_at,
        recipients: sessions
            .into_iter()
            .map(|s| EnvelopeRecipientView {
                session_id: s.id,
                name: s.recipient_name,
                email: s.recipient_email,
                status: s.status,
                signed_pdf_url: s.signed_pdf_url,
            })
            .collect(),
    }))
}

// ---------------------------------------------------------------
// Bulk send
// ---------------------------------------------------------------

/// Create one session per recipient and dispatch each independently: a
/// failed dispatch is recorded against the recipient and never aborts the
/// batch.
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkSendRequest>,
) -> Result<Json<BulkSendResponse>, ApiError> {
    if req.recipients.is_empty() {
        return Err(ApiError::Validation("batch needs recipients".into()));
    }

    // One accounting row per address: reject duplicates before any insert.
    let mut seen = HashSet::new();
    for recipient in &req.recipients {
        if !seen.insert(recipient.email.as_str()) {
            return Err(ApiError::Validation(format!(
                "duplicate recipient: {}",
                recipient.email
            )));
        }
    }

    let batch_id = Uuid::new_v4().to_string();
    let owner_token = Uuid::new_v4().to_string();
    let fields_json = serde_json::to_string(&req.fields)
        .map_err(|e| ApiError::Validation(format!("invalid fields: {e}")))?;
    store::insert_batch(
        &state.db,
        &batch_id,
        &owner_token,
        &req.document_id,
        &req.document_name,
        &fields_json,
        req.due_date,
    )
    .await?;

    let now = Utc::now();
    for recipient in &req.recipients {
        store::insert_batch_recipient(&state.db, &batch_id, &recipient.email, &recipient.name, now)
            .await?;
        dispatch_batch_recipient(&state, &batch_id, &owner_token, &req, recipient).await?;
    }

    let counts = store::batch_counts(&state.db, &batch_id).await?;
    let failed = store::list_failed_recipients(&state.db, &batch_id).await?;
    tracing::info!(
        "batch {}: {} sent, {} failed",
        batch_id,
        counts.sent,
        counts.failed
    );
    Ok(Json(BulkSendResponse {
        batch_id,
        owner_token,
        sent_count: counts.sent,
        failed_recipients: failed.into_iter().map(to_failed_recipient).collect(),
    }))
}

fn to_failed_recipient(row: DbBatchRecipient) -> inkflow_core::FailedRecipient {
    inkflow_core::FailedRecipient {
        email: row.email,
        name: row.name,
        error: row.error.unwrap_or_else(|| "dispatch failed".to_string()),
    }
}

/// One recipient's create-session + dispatch attempt. Reuses an existing
/// session for this batch+email (retry idempotency) before minting one.
async fn dispatch_batch_recipient(
    state: &AppState,
    batch_id: &str,
    owner_token: &str,
    req: &BulkSendRequest,
    recipient: &RecipientInput,
) -> Result<(), ApiError> {
    let now = Utc::now();

    let session_id = match store::find_batch_session(&state.db, batch_id, &recipient.email).await? {
        Some(existing) => existing.id,
        None => {
            let session_id = Uuid::new_v4().to_string();
            let new = NewSession {
                id: &session_id,
                envelope_id: None,
                batch_id: Some(batch_id),
                owner_token,
                recipient_name: &recipient.name,
                recipient_email: &recipient.email,
                status: SessionStatus::Pending,
                signing_order: 0,
                due_date: req.due_date,
                access_code_hash: None,
                access_code_type: None,
                access_code_hint: None,
            };
            store::insert_session(&state.db, &new).await?;
            let fields_json = serde_json::to_string(&req.fields)
                .map_err(|e| ApiError::Validation(format!("invalid fields: {e}")))?;
            store::insert_session_document(
                &state.db,
                &session_id,
                &req.document_id,
                &req.document_name,
                &fields_json,
            )
            .await?;
            session_id
        }
    };

    match state
        .notifier
        .send(
            &recipient.email,
            &format!("Signature requested: {}", req.document_name),
            &json!({ "signingUrl": state.signing_url(&session_id) }),
        )
        .await
    {
        Ok(()) => {
            store::mark_recipient_sent(&state.db, batch_id, &recipient.email, &session_id, now)
                .await?;
        }
        Err(e) => {
            tracing::warn!("batch {} dispatch to {} failed: {}", batch_id, recipient.email, e);
            store::mark_recipient_failed(
                &state.db,
                batch_id,
                &recipient.email,
                Some(&session_id),
                &e.to_string(),
                now,
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let batch = store::fetch_batch(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("batch", id.clone()))?;
    let counts = store::batch_counts(&state.db, &id).await?;
    let failed = store::list_failed_recipients(&state.db, &id).await?;
    Ok(Json(BatchStatusResponse {
        batch_id: batch.id,
        document_id: batch.document_id,
        counts,
        failed_recipients: failed.into_iter().map(to_failed_recipient).collect(),
    }))
}

/// Retry is purely incremental over the current failure set: recipients
/// already counted as sent are never touched, so repeated calls are safe.
pub async fn retry_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let batch = store::fetch_batch(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("batch", id.clone()))?;

    let failed_before = store::list_failed_recipients(&state.db, &id).await?;
    let request = BulkSendRequest {
        document_id: batch.document_id.clone(),
        document_name: batch.document_name.clone(),
        recipients: Vec::new(),
        fields: batch.fields(),
        due_date: batch.due_date,
    };

    for row in &failed_before {
        let recipient = RecipientInput {
            name: row.name.clone(),
            email: row.email.clone(),
        };
        dispatch_batch_recipient(&state, &id, &batch.owner_token, &request, &recipient).await?;
    }

    let counts = store::batch_counts(&state.db, &id).await?;
    let remaining = store::list_failed_recipients(&state.db, &id).await?;
    let retried = (failed_before.len() as u32).saturating_sub(remaining.len() as u32);
    tracing::info!(
        "batch {} retry: {} recovered, {} still failing",
        id,
        retried,
        remaining.len()
    );
    Ok(Json(RetryResponse {
        retried_count: retried,
        still_failed_count: counts.failed,
        remaining_failures: remaining.into_iter().map(to_failed_recipient).collect(),
    }))
}
