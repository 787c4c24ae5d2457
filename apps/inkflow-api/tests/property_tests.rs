//! Property-based tests for inkflow-api
//!
//! Tests the wire models and validation-adjacent logic using proptest.

use proptest::prelude::*;
use serde_json::json;

use inkflow_api::models::{AutosaveRequest, FieldSpec, VerifyAccessCodeResponse};
use inkflow_core::{hash_code, Normalization};

// ============================================================
// Identifier shapes
// ============================================================

/// Session, envelope, and batch ids are v4 UUIDs (36 chars with hyphens)
fn uuid_like() -> impl Strategy<Value = String> {
    "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ============================================================
    // Identifier Tests
    // ============================================================

    #[test]
    fn uuid_like_ids_are_36_chars(id in uuid_like()) {
        prop_assert_eq!(id.len(), 36);
        prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn minted_ids_match_the_uuid_pattern(_x in 0u8..5) {
        let pattern = regex::Regex::new(
            r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
        ).unwrap();
        prop_assert!(pattern.is_match(&uuid::Uuid::new_v4().to_string()));
    }

    // ============================================================
    // Access Code Hashing
    // ============================================================

    #[test]
    fn code_hashes_are_64_hex_chars(code in ".{0,64}") {
        let hash = hash_code(&code, Normalization::default());
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// The stored hash never contains the raw code. Codes are drawn outside
    /// the hex alphabet so a chance substring match is impossible.
    #[test]
    fn hash_does_not_leak_the_code(code in "[g-zG-Z]{6,20}") {
        let hash = hash_code(&code, Normalization::for_code_type("password"));
        prop_assert!(!hash.contains(&code));
    }

    #[test]
    fn pin_hashing_is_whitespace_and_case_insensitive(code in "[A-Za-z0-9]{4,12}") {
        let padded = format!("  {}  ", code.to_uppercase());
        prop_assert_eq!(
            hash_code(&code, Normalization::default()),
            hash_code(&padded, Normalization::default()),
        );
    }

    // ============================================================
    // Wire Model Tests
    // ============================================================

    /// Unspecified field type defaults to "signature", required to false.
    #[test]
    fn field_spec_defaults_apply(id in "[a-z0-9-]{1,20}") {
        let field: FieldSpec = serde_json::from_value(json!({ "id": id })).unwrap();
        prop_assert_eq!(field.field_type, "signature");
        prop_assert!(!field.required);
    }

    /// Draft folding: signature values win over plain values on key collision.
    #[test]
    fn autosave_signatures_override_field_values(
        key in "[a-z]{1,10}",
        sig in "[A-Za-z ]{1,30}",
        plain in "[A-Za-z ]{1,30}",
    ) {
        let req: AutosaveRequest = serde_json::from_value(json!({
            "signatures": { &key: sig.clone() },
            "fieldValues": { &key: plain },
        })).unwrap();
        let draft = req.into_draft();
        prop_assert_eq!(draft.get(&key), Some(&sig));
    }

    #[test]
    fn autosave_merges_disjoint_maps(
        sig_key in "[a-f]{1,6}",
        plain_key in "[g-z]{1,6}",
    ) {
        let req: AutosaveRequest = serde_json::from_value(json!({
            "signatures": { &sig_key: "x" },
            "fieldValues": { &plain_key: "y" },
        })).unwrap();
        let draft = req.into_draft();
        prop_assert_eq!(draft.len(), 2);
    }
}

// ============================================================
// Verification Response Serialization
// ============================================================

#[test]
fn verify_outcomes_tag_with_result() {
    let invalid = serde_json::to_value(VerifyAccessCodeResponse::Invalid {
        attempts_remaining: 3,
    })
    .unwrap();
    assert_eq!(invalid["result"], "invalid");
    assert_eq!(invalid["attemptsRemaining"], 3);

    let verified = serde_json::to_value(VerifyAccessCodeResponse::Verified {
        verified_at: chrono::Utc::now(),
    })
    .unwrap();
    assert_eq!(verified["result"], "verified");
    assert!(verified["verifiedAt"].is_string());
}
