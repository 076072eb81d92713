//! Claim lifecycle rules.
//!
//! `ClaimStateMachine` validates and applies a single status change in memory. Loading,
//! optimistic saving, and auditing happen in
//! [`AdjudicationService::transition_claim`](super::service::AdjudicationService::transition_claim).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::access::{roles, Actor, TransitionRoles};
use super::audit::ChangeType;
use super::domain::{
    BenefitPolicyId, ClaimId, MedicalServiceId, MemberId, PreAuthorizationId, ProviderId,
};
use super::error::{StateTransitionError, TransitionBlock, TransitionEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Draft,
    Submitted,
    UnderReview,
    ReturnedForInfo,
    Approved,
    Rejected,
    Settled,
}

impl ClaimStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ClaimStatus::Draft => "DRAFT",
            ClaimStatus::Submitted => "SUBMITTED",
            ClaimStatus::UnderReview => "UNDER_REVIEW",
            ClaimStatus::ReturnedForInfo => "RETURNED_FOR_INFO",
            ClaimStatus::Approved => "APPROVED",
            ClaimStatus::Rejected => "REJECTED",
            ClaimStatus::Settled => "SETTLED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ClaimStatus::Rejected | ClaimStatus::Settled)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub member_id: MemberId,
    pub benefit_policy_id: BenefitPolicyId,
    pub provider_id: Option<ProviderId>,
    pub service_id: Option<MedicalServiceId>,
    pub pre_authorization_id: Option<PreAuthorizationId>,
    pub service_date: NaiveDate,
    pub requested_amount: Decimal,
    pub approved_amount: Option<Decimal>,
    pub difference_amount: Option<Decimal>,
    pub status: ClaimStatus,
    pub diagnosis_code: Option<String>,
    pub diagnosis_description: Option<String>,
    pub reviewer_comment: Option<String>,
    pub attachments_count: u32,
    pub services_count: u32,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

static CLAIM_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_claim_id() -> ClaimId {
    let id = CLAIM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ClaimId(format!("CLM-{id:06}"))
}

/// Requested status change plus the data some targets need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTransition {
    pub target: ClaimStatus,
    pub comment: Option<String>,
    pub approved_amount: Option<Decimal>,
    pub rejection_reason: Option<String>,
}

impl ClaimTransition {
    pub fn to(target: ClaimStatus) -> Self {
        Self {
            target,
            comment: None,
            approved_amount: None,
            rejection_reason: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_approved_amount(mut self, amount: Decimal) -> Self {
        self.approved_amount = Some(amount);
        self
    }

    pub fn with_rejection_reason(mut self, reason: impl Into<String>) -> Self {
        self.rejection_reason = Some(reason.into());
        self
    }
}

/// What an accepted transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Unchanged,
    Changed(ChangeType),
}

pub struct ClaimStateMachine {
    roles: TransitionRoles<ClaimStatus>,
}

impl Default for ClaimStateMachine {
    fn default() -> Self {
        Self::new(claim_transition_roles())
    }
}

impl ClaimStateMachine {
    pub fn new(roles: TransitionRoles<ClaimStatus>) -> Self {
        Self { roles }
    }

    /// Validate `request` against `claim` and apply it.
    ///
    /// The claim is untouched unless the transition is accepted.
    pub fn apply(
        &self,
        claim: &mut Claim,
        request: &ClaimTransition,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StateTransitionError> {
        let from = claim.status;
        let to = request.target;
        if to == from {
            return Ok(TransitionOutcome::Unchanged);
        }

        let refuse = |block| {
            StateTransitionError::new(TransitionEntity::Claim, from.label(), to.label(), block)
        };

        if from.is_terminal() {
            return Err(refuse(TransitionBlock::Terminal));
        }
        self.roles.authorize(from, to, actor).map_err(refuse)?;
        check_preconditions(claim, request, to).map_err(refuse)?;

        claim.status = to;
        claim.updated_at = now;
        let change = match to {
            ClaimStatus::Approved => {
                let approved = request.approved_amount.unwrap_or_default();
                claim.approved_amount = Some(approved);
                claim.difference_amount = Some(claim.requested_amount - approved);
                stamp_reviewer(claim, actor, now);
                if let Some(comment) = &request.comment {
                    claim.reviewer_comment = Some(comment.clone());
                }
                ChangeType::Approved
            }
            ClaimStatus::Rejected => {
                claim.approved_amount = Some(Decimal::ZERO);
                claim.difference_amount = Some(claim.requested_amount);
                claim.reviewer_comment = request.rejection_reason.clone();
                stamp_reviewer(claim, actor, now);
                ChangeType::Rejected
            }
            ClaimStatus::ReturnedForInfo => {
                claim.reviewer_comment = request.comment.clone();
                stamp_reviewer(claim, actor, now);
                ChangeType::StatusChanged
            }
            ClaimStatus::UnderReview => {
                stamp_reviewer(claim, actor, now);
                ChangeType::StatusChanged
            }
            ClaimStatus::Settled => {
                claim.settled_at = Some(now);
                ChangeType::Settled
            }
            ClaimStatus::Draft | ClaimStatus::Submitted => ChangeType::StatusChanged,
        };

        Ok(TransitionOutcome::Changed(change))
    }
}

fn check_preconditions(
    claim: &Claim,
    request: &ClaimTransition,
    to: ClaimStatus,
) -> Result<(), TransitionBlock> {
    match to {
        ClaimStatus::Rejected => {
            let has_reason = request
                .rejection_reason
                .as_deref()
                .map(|reason| !reason.trim().is_empty())
                .unwrap_or(false);
            if !has_reason {
                return Err(TransitionBlock::Precondition(
                    "a rejection reason is required".to_string(),
                ));
            }
        }
        ClaimStatus::Approved => match request.approved_amount {
            None => {
                return Err(TransitionBlock::Precondition(
                    "an approved amount is required".to_string(),
                ))
            }
            Some(amount) if amount <= Decimal::ZERO => {
                return Err(TransitionBlock::Precondition(
                    "approved amount must be greater than zero".to_string(),
                ))
            }
            Some(amount) if amount > claim.requested_amount => {
                return Err(TransitionBlock::Precondition(format!(
                    "approved amount {amount} exceeds requested amount {}",
                    claim.requested_amount
                )))
            }
            Some(_) => {}
        },
        _ => {}
    }
    Ok(())
}

fn stamp_reviewer(claim: &mut Claim, actor: &Actor, now: DateTime<Utc>) {
    claim.reviewed_by = Some(actor.username.clone());
    claim.reviewed_at = Some(now);
}

/// Default claim edges and the roles allowed to take them.
pub fn claim_transition_roles() -> TransitionRoles<ClaimStatus> {
    use ClaimStatus::*;

    let submitters = [roles::EMPLOYER_ADMIN, roles::INSURANCE_ADMIN, roles::PROVIDER];
    let reviewers = [roles::INSURANCE_ADMIN, roles::REVIEWER];

    TransitionRoles::new()
        .allow(Draft, Submitted, &submitters)
        .allow(Submitted, UnderReview, &reviewers)
        .allow(UnderReview, Approved, &reviewers)
        .allow(UnderReview, Rejected, &reviewers)
        .allow(UnderReview, ReturnedForInfo, &reviewers)
        .allow(ReturnedForInfo, Submitted, &submitters)
        .allow(Approved, Settled, &[roles::INSURANCE_ADMIN, roles::FINANCE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjudication::domain::UserId;
    use rust_decimal_macros::dec;

    fn claim(status: ClaimStatus) -> Claim {
        let now = Utc::now();
        Claim {
            id: ClaimId::new("CLM-T1"),
            member_id: MemberId::new("mem-1"),
            benefit_policy_id: BenefitPolicyId::new("pol-1"),
            provider_id: None,
            service_id: None,
            pre_authorization_id: None,
            service_date: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
            requested_amount: dec!(500),
            approved_amount: None,
            difference_amount: None,
            status,
            diagnosis_code: None,
            diagnosis_description: None,
            reviewer_comment: None,
            attachments_count: 0,
            services_count: 1,
            reviewed_by: None,
            reviewed_at: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn reviewer() -> Actor {
        Actor::user(UserId::new("u-rev"), "rita", [roles::REVIEWER])
    }

    #[test]
    fn approval_records_amounts_and_reviewer() {
        let machine = ClaimStateMachine::default();
        let mut claim = claim(ClaimStatus::UnderReview);

        let outcome = machine
            .apply(
                &mut claim,
                &ClaimTransition::to(ClaimStatus::Approved).with_approved_amount(dec!(400)),
                &reviewer(),
                Utc::now(),
            )
            .expect("approval accepted");

        assert_eq!(outcome, TransitionOutcome::Changed(ChangeType::Approved));
        assert_eq!(claim.approved_amount, Some(dec!(400)));
        assert_eq!(claim.difference_amount, Some(dec!(100)));
        assert_eq!(claim.reviewed_by.as_deref(), Some("rita"));
    }

    #[test]
    fn approval_above_requested_amount_leaves_claim_untouched() {
        let machine = ClaimStateMachine::default();
        let mut claim = claim(ClaimStatus::UnderReview);
        let before = claim.clone();

        let err = machine
            .apply(
                &mut claim,
                &ClaimTransition::to(ClaimStatus::Approved).with_approved_amount(dec!(501)),
                &reviewer(),
                Utc::now(),
            )
            .expect_err("over-approval refused");

        assert!(matches!(err.block, TransitionBlock::Precondition(_)));
        assert_eq!(claim, before);
    }

    #[test]
    fn rejection_needs_a_non_blank_reason() {
        let machine = ClaimStateMachine::default();
        let mut claim = claim(ClaimStatus::UnderReview);

        let err = machine
            .apply(
                &mut claim,
                &ClaimTransition::to(ClaimStatus::Rejected).with_rejection_reason("   "),
                &reviewer(),
                Utc::now(),
            )
            .expect_err("blank reason refused");

        assert_eq!(err.to, "REJECTED");
        assert_eq!(claim.status, ClaimStatus::UnderReview);
    }

    #[test]
    fn settled_and_rejected_claims_are_terminal() {
        let machine = ClaimStateMachine::default();
        let admin = Actor::user(UserId::new("u-1"), "root", Vec::<String>::new())
            .with_super_admin(true);

        for status in [ClaimStatus::Settled, ClaimStatus::Rejected] {
            let mut claim = claim(status);
            let err = machine
                .apply(
                    &mut claim,
                    &ClaimTransition::to(ClaimStatus::UnderReview),
                    &admin,
                    Utc::now(),
                )
                .expect_err("terminal");
            assert_eq!(err.block, TransitionBlock::Terminal);
        }
    }

    #[test]
    fn same_status_is_a_no_op() {
        let machine = ClaimStateMachine::default();
        let mut claim = claim(ClaimStatus::Submitted);
        let before = claim.clone();

        let outcome = machine
            .apply(
                &mut claim,
                &ClaimTransition::to(ClaimStatus::Submitted),
                &Actor::system("noop"),
                Utc::now(),
            )
            .expect("no-op accepted");

        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(claim, before);
    }

    #[test]
    fn skipping_review_is_unreachable() {
        let machine = ClaimStateMachine::default();
        let mut claim = claim(ClaimStatus::Submitted);

        let err = machine
            .apply(
                &mut claim,
                &ClaimTransition::to(ClaimStatus::Settled),
                &reviewer(),
                Utc::now(),
            )
            .expect_err("unreachable");

        assert_eq!(err.block, TransitionBlock::Unreachable);
    }

    #[test]
    fn wrong_role_names_the_required_roles() {
        let machine = ClaimStateMachine::default();
        let mut claim = claim(ClaimStatus::Approved);

        let err = machine
            .apply(
                &mut claim,
                &ClaimTransition::to(ClaimStatus::Settled),
                &reviewer(),
                Utc::now(),
            )
            .expect_err("reviewers cannot settle");

        assert!(err.to_string().contains("FINANCE"));
    }
}
