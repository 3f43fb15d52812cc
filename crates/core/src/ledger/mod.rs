//! Hash-chained construction and verification of approval log rows.
//!
//! Every log row commits to its predecessor through `prev_hash`, so any edit
//! or deletion of a stored row breaks verification of the rows after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::workflow::{
    Actor, ApprovalLog, LogAction, LogEntryId, LogHead, StepId, WorkflowId, WorkflowStatus,
};

/// Fields of a log row supplied by the caller; the ledger fills in identity,
/// sequence and hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogDraft {
    pub step_id: Option<StepId>,
    pub action: LogAction,
    pub actor: Actor,
    pub previous_status: Option<WorkflowStatus>,
    pub new_status: WorkflowStatus,
    pub comments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub workflow_id: WorkflowId,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

pub fn append(
    workflow_id: &WorkflowId,
    head: Option<&LogHead>,
    draft: LogDraft,
    now: DateTime<Utc>,
) -> ApprovalLog {
    let sequence = head.map_or(1, |head| head.sequence.saturating_add(1));
    let prev_hash = head.map(|head| head.entry_hash.clone());

    let mut entry = ApprovalLog {
        id: LogEntryId(Uuid::new_v4().to_string()),
        workflow_id: workflow_id.clone(),
        step_id: draft.step_id,
        sequence,
        action: draft.action,
        actor: draft.actor,
        previous_status: draft.previous_status,
        new_status: draft.new_status,
        comments: draft.comments,
        prev_hash,
        entry_hash: String::new(),
        created_at: now,
    };
    entry.entry_hash = entry_hash(&entry);
    entry
}

pub fn head_of(entry: &ApprovalLog) -> LogHead {
    LogHead { sequence: entry.sequence, entry_hash: entry.entry_hash.clone() }
}

/// Re-derives the chain for one workflow. `entries` must be in sequence order.
pub fn verify_chain(workflow_id: &WorkflowId, entries: &[ApprovalLog]) -> VerificationResult {
    let fail = |index: usize, latest_hash: Option<String>, reason: String| VerificationResult {
        workflow_id: workflow_id.clone(),
        valid: false,
        verified_entries: index,
        latest_hash,
        failure_reason: Some(reason),
    };

    if entries.is_empty() {
        return fail(0, None, "no log entries found for workflow".to_string());
    }

    let mut previous_hash: Option<String> = None;
    for (index, entry) in entries.iter().enumerate() {
        if entry.workflow_id != *workflow_id {
            return fail(
                index,
                previous_hash,
                format!("entry {} belongs to workflow {}", entry.id.0, entry.workflow_id.0),
            );
        }

        let expected_sequence = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
        if entry.sequence != expected_sequence {
            return fail(
                index,
                previous_hash,
                format!(
                    "sequence gap at entry {}: expected {}, found {}",
                    entry.id.0, expected_sequence, entry.sequence
                ),
            );
        }

        if entry.prev_hash != previous_hash {
            return fail(index, previous_hash, format!("previous hash mismatch at entry {}", entry.id.0));
        }

        if entry_hash(entry) != entry.entry_hash {
            return fail(index, previous_hash, format!("entry hash mismatch at entry {}", entry.id.0));
        }

        previous_hash = Some(entry.entry_hash.clone());
    }

    VerificationResult {
        workflow_id: workflow_id.clone(),
        valid: true,
        verified_entries: entries.len(),
        latest_hash: previous_hash,
        failure_reason: None,
    }
}

/// Each field is length-prefixed and optional fields carry a presence byte,
/// so free text such as `comments` cannot shift content across fields.
fn entry_hash(entry: &ApprovalLog) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, &entry.workflow_id.0);
    hash_field(&mut hasher, &entry.sequence.to_string());
    hash_optional(&mut hasher, entry.step_id.as_ref().map(|id| id.0.as_str()));
    hash_field(&mut hasher, entry.action.as_str());
    hash_field(&mut hasher, entry.actor.kind());
    hash_optional(&mut hasher, entry.actor.employee_id().map(|id| id.0.as_str()));
    hash_optional(&mut hasher, entry.previous_status.map(|status| status.as_str()));
    hash_field(&mut hasher, entry.new_status.as_str());
    hash_field(&mut hasher, &entry.comments);
    hash_optional(&mut hasher, entry.prev_hash.as_deref());
    hash_field(&mut hasher, &entry.created_at.to_rfc3339());
    encode_hex(hasher.finalize().as_slice())
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([1u8]);
            hash_field(hasher, value);
        }
        None => hasher.update([0u8]),
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{append, entry_hash, head_of, verify_chain, LogDraft};
    use crate::domain::org::EmployeeId;
    use crate::domain::workflow::{Actor, ApprovalLog, LogAction, StepId, WorkflowId, WorkflowStatus};

    fn draft(action: LogAction, previous: Option<WorkflowStatus>, new: WorkflowStatus) -> LogDraft {
        LogDraft {
            step_id: None,
            action,
            actor: Actor::Employee(EmployeeId("EMP-1".to_string())),
            previous_status: previous,
            new_status: new,
            comments: String::new(),
        }
    }

    fn chain(workflow_id: &WorkflowId) -> Vec<ApprovalLog> {
        let first = append(
            workflow_id,
            None,
            draft(LogAction::Submitted, None, WorkflowStatus::Submitted),
            Utc::now(),
        );
        let second = append(
            workflow_id,
            Some(&head_of(&first)),
            draft(LogAction::Approved, Some(WorkflowStatus::Submitted), WorkflowStatus::Pending),
            Utc::now(),
        );
        vec![first, second]
    }

    #[test]
    fn append_links_previous_hash_and_sequence() {
        let workflow_id = WorkflowId("WF-1".to_string());
        let entries = chain(&workflow_id);

        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[0].prev_hash, None);
        assert_eq!(entries[1].sequence, 2);
        assert_eq!(entries[1].prev_hash.as_ref(), Some(&entries[0].entry_hash));
    }

    #[test]
    fn verify_chain_accepts_untampered_entries() {
        let workflow_id = WorkflowId("WF-2".to_string());
        let result = verify_chain(&workflow_id, &chain(&workflow_id));

        assert!(result.valid);
        assert_eq!(result.verified_entries, 2);
    }

    #[test]
    fn verify_chain_detects_edited_comment() {
        let workflow_id = WorkflowId("WF-3".to_string());
        let mut entries = chain(&workflow_id);
        entries[1].comments = "rewritten after the fact".to_string();

        let result = verify_chain(&workflow_id, &entries);
        assert!(!result.valid);
        assert_eq!(result.verified_entries, 1);
        assert!(result.failure_reason.unwrap_or_default().contains("entry hash mismatch"));
    }

    #[test]
    fn verify_chain_detects_deleted_row() {
        let workflow_id = WorkflowId("WF-4".to_string());
        let entries = chain(&workflow_id);

        let result = verify_chain(&workflow_id, &entries[1..]);
        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("sequence gap"));
    }

    #[test]
    fn entry_hash_keeps_field_boundaries_apart() {
        let workflow_id = WorkflowId("WF-5".to_string());
        let mut first = chain(&workflow_id).remove(0);
        first.comments = "note|abc".to_string();
        first.prev_hash = None;

        let mut second = first.clone();
        second.comments = "note".to_string();
        second.prev_hash = Some("abc|".to_string());

        assert_ne!(entry_hash(&first), entry_hash(&second));

        let mut blank_step = first.clone();
        blank_step.step_id = Some(StepId(String::new()));
        assert_ne!(entry_hash(&first), entry_hash(&blank_step));
    }
}
