//! Append-only claim audit trail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use super::access::Actor;
use super::claims::{Claim, ClaimStatus};
use super::domain::{AuditLogId, ClaimId, UserId};
use super::error::AdjudicationError;
use super::repository::{AuditLogRepository, RepositoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Created,
    StatusChanged,
    Approved,
    Rejected,
    Settled,
    Updated,
}

/// Flat view of a claim's status and financial fields at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSnapshot {
    pub claim_id: ClaimId,
    pub status: ClaimStatus,
    pub requested_amount: Decimal,
    pub approved_amount: Option<Decimal>,
    pub difference_amount: Option<Decimal>,
    pub reviewer_comment: Option<String>,
    pub version: u64,
}

impl From<&Claim> for ClaimSnapshot {
    fn from(claim: &Claim) -> Self {
        Self {
            claim_id: claim.id.clone(),
            status: claim.status,
            requested_amount: claim.requested_amount,
            approved_amount: claim.approved_amount,
            difference_amount: claim.difference_amount,
            reviewer_comment: claim.reviewer_comment.clone(),
            version: claim.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    pub user_id: Option<UserId>,
    pub username: String,
    pub role: String,
}

impl From<&Actor> for AuditActor {
    fn from(actor: &Actor) -> Self {
        Self {
            user_id: actor.user_id.clone(),
            username: actor.username.clone(),
            role: actor.audit_role(),
        }
    }
}

/// Immutable audit row; one per accepted claim change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimAuditLog {
    pub id: AuditLogId,
    pub claim_id: ClaimId,
    pub change_type: ChangeType,
    pub previous_status: Option<ClaimStatus>,
    pub new_status: ClaimStatus,
    pub previous_requested_amount: Option<Decimal>,
    pub new_requested_amount: Decimal,
    pub previous_approved_amount: Option<Decimal>,
    pub new_approved_amount: Option<Decimal>,
    pub actor: AuditActor,
    pub comment: Option<String>,
    pub before_snapshot: Option<Value>,
    pub after_snapshot: Value,
    pub recorded_at: DateTime<Utc>,
}

static AUDIT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_audit_id() -> AuditLogId {
    let id = AUDIT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AuditLogId(format!("AUD-{id:06}"))
}

/// Writes audit rows through the log repository, one independent write per call.
pub struct AuditTrailRecorder<L> {
    log: Arc<L>,
}

impl<L> AuditTrailRecorder<L>
where
    L: AuditLogRepository + 'static,
{
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }

    /// Record one change. Any failure comes back as a technical error so the caller can
    /// abandon the change it was auditing.
    pub fn record(
        &self,
        change_type: ChangeType,
        before: Option<ClaimSnapshot>,
        after: ClaimSnapshot,
        actor: &Actor,
        comment: Option<&str>,
    ) -> Result<ClaimAuditLog, AdjudicationError> {
        let before_snapshot = before.as_ref().map(to_json).transpose()?;
        let after_snapshot = to_json(&after)?;

        let entry = ClaimAuditLog {
            id: next_audit_id(),
            claim_id: after.claim_id.clone(),
            change_type,
            previous_status: before.as_ref().map(|snapshot| snapshot.status),
            new_status: after.status,
            previous_requested_amount: before.as_ref().map(|snapshot| snapshot.requested_amount),
            new_requested_amount: after.requested_amount,
            previous_approved_amount: before.as_ref().and_then(|snapshot| snapshot.approved_amount),
            new_approved_amount: after.approved_amount,
            actor: AuditActor::from(actor),
            comment: comment.map(str::to_string),
            before_snapshot,
            after_snapshot,
            recorded_at: Utc::now(),
        };

        self.log.append(entry).map_err(|err| {
            error!(
                claim_id = %after.claim_id,
                change = ?change_type,
                actor = %actor.username,
                error = %err,
                "audit write failed"
            );
            AdjudicationError::Technical(err)
        })
    }

    pub fn trail(&self, claim_id: &ClaimId) -> Result<Vec<ClaimAuditLog>, AdjudicationError> {
        Ok(self.log.for_claim(claim_id)?)
    }
}

fn to_json(snapshot: &ClaimSnapshot) -> Result<Value, AdjudicationError> {
    serde_json::to_value(snapshot)
        .map_err(|err| AdjudicationError::Technical(RepositoryError::Serialization(err.to_string())))
}
