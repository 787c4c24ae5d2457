//! Data models for the Inkflow API.
//!
//! Wire DTOs are camelCase (the shape recipient clients consume); database
//! rows are plain `FromRow` structs with TEXT timestamps.

use chrono::{DateTime, Utc};
use inkflow_core::{BatchCounts, FailedRecipient, Progress};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// A field a recipient must fill on one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub id: String,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> String {
    "signature".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientInput {
    pub name: String,
    pub email: String,
}

/// Optional access code attached to a recipient at send time.
/// Only a hash of the normalized code is ever stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCodeInput {
    pub code: String,
    #[serde(default = "default_code_type")]
    pub code_type: String,
    #[serde(default)]
    pub hint: Option<String>,
}

fn default_code_type() -> String {
    "pin".to_string()
}

// ---------------------------------------------------------------
// Single-recipient sends
// ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureRequest {
    pub document_id: String,
    pub document_name: String,
    pub recipient: RecipientInput,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_code: Option<AccessCodeInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureResponse {
    pub session_id: String,
    pub owner_token: String,
    pub status: String,
    pub signing_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocumentView {
    pub document_id: String,
    pub document_name: String,
    pub fields: Vec<FieldSpec>,
    pub signed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub recipient: RecipientInput,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub documents: Vec<SessionDocumentView>,
    pub draft_field_values: HashMap<String, String>,
    pub progress: Progress,
    pub view_count: i64,
    pub access_code_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_pdf_url: Option<String>,
}

// ---------------------------------------------------------------
// Access codes
// ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessCodeRequest {
    pub access_code: String,
}

/// Verification outcome on the wire. An invalid code is an outcome carrying
/// the remaining-attempts hint, not an opaque error; lockouts surface as the
/// LOCKED error with the retry countdown.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerifyAccessCodeResponse {
    #[serde(rename_all = "camelCase")]
    Verified { verified_at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    Invalid { attempts_remaining: u32 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCodeStateResponse {
    pub access_code_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub verified: bool,
    pub is_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,
    pub attempts_remaining: u32,
}

// ---------------------------------------------------------------
// Autosave
// ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutosaveRequest {
    /// Signature-type values keyed by field id.
    #[serde(default)]
    pub signatures: HashMap<String, String>,
    /// Plain field values keyed by field id.
    #[serde(default)]
    pub field_values: HashMap<String, String>,
}

impl AutosaveRequest {
    /// Autosave replaces the draft wholesale, so both maps fold into one.
    pub fn into_draft(self) -> HashMap<String, String> {
        let mut draft = self.field_values;
        draft.extend(self.signatures);
        draft
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutosaveResponse {
    pub progress: Progress,
}

// ---------------------------------------------------------------
// Signing
// ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDocumentInput {
    pub document_id: String,
    pub field_values: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub signed_documents: Vec<SignedDocumentInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    /// Documents in this session still awaiting signature.
    pub remaining_documents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_status: Option<String>,
}

// ---------------------------------------------------------------
// Cancel / archive
// ---------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResponse {
    pub archived: bool,
}

// ---------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeFieldInput {
    pub id: String,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    pub recipient_email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeDocumentInput {
    pub id: String,
    pub name: String,
    pub fields: Vec<EnvelopeFieldInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRecipientInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub access_code: Option<AccessCodeInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvelopeRequest {
    pub documents: Vec<EnvelopeDocumentInput>,
    pub recipients: Vec<EnvelopeRecipientInput>,
    /// Enforce signing order: later recipients start in `awaiting_turn`.
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRecipientView {
    pub session_id: String,
    pub name: String,
    pub email: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_pdf_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvelopeResponse {
    pub envelope_id: String,
    pub owner_token: String,
    pub status: String,
    pub recipients: Vec<EnvelopeRecipientView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeStatusResponse {
    pub envelope_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub recipients: Vec<EnvelopeRecipientView>,
}

// ---------------------------------------------------------------
// Bulk send
// ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendRequest {
    pub document_id: String,
    pub document_name: String,
    pub recipients: Vec<RecipientInput>,
    /// Fields stamped onto every recipient's copy of the document.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendResponse {
    pub batch_id: String,
    pub owner_token: String,
    pub sent_count: u32,
    pub failed_recipients: Vec<FailedRecipient>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub document_id: String,
    pub counts: BatchCounts,
    pub failed_recipients: Vec<FailedRecipient>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub retried_count: u32,
    pub still_failed_count: u32,
    pub remaining_failures: Vec<FailedRecipient>,
}

// ---------------------------------------------------------------
// Database rows
// ---------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct DbSession {
    pub id: String,
    pub envelope_id: Option<String>,
    pub batch_id: Option<String>,
    pub owner_token: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub status: String,
    pub signing_order: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub access_code_hash: Option<String>,
    pub access_code_type: Option<String>,
    pub access_code_hint: Option<String>,
    pub failed_attempts: i64,
    pub lockout_until: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub draft_values_json: String,
    pub signed_pdf_url: Option<String>,
    pub view_count: i64,
    pub cancel_reason: Option<String>,
    pub archived: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DbSession {
    pub fn access_code_required(&self) -> bool {
        self.access_code_hash.is_some()
    }

    pub fn draft(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.draft_values_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSessionDocument {
    pub session_id: String,
    pub document_id: String,
    pub document_name: String,
    pub fields_json: String,
    pub signed: i64,
    pub field_values_json: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl DbSessionDocument {
    pub fn fields(&self) -> Vec<FieldSpec> {
        serde_json::from_str(&self.fields_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbEnvelope {
    pub id: String,
    pub owner_token: String,
    pub status: String,
    pub sequential: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbBatch {
    pub id: String,
    pub owner_token: String,
    pub document_id: String,
    pub document_name: String,
    pub fields_json: String,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbBatch {
    pub fn fields(&self) -> Vec<FieldSpec> {
        serde_json::from_str(&self.fields_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbBatchRecipient {
    pub batch_id: String,
    pub email: String,
    pub name: String,
    pub session_id: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
