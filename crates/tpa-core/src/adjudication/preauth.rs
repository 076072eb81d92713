//! Pre-authorization lifecycle rules and the approval validity window.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::access::{roles, Actor, TransitionRoles};
use super::audit::ChangeType;
use super::claims::TransitionOutcome;
use super::domain::{
    BenefitPolicyId, MedicalServiceId, MemberId, PreAuthorizationId, ProviderId, UserId,
};
use super::error::{StateTransitionError, TransitionBlock, TransitionEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreAuthStatus {
    Requested,
    UnderReview,
    MoreInfoRequired,
    Approved,
    Rejected,
    Expired,
}

impl PreAuthStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PreAuthStatus::Requested => "REQUESTED",
            PreAuthStatus::UnderReview => "UNDER_REVIEW",
            PreAuthStatus::MoreInfoRequired => "MORE_INFO_REQUIRED",
            PreAuthStatus::Approved => "APPROVED",
            PreAuthStatus::Rejected => "REJECTED",
            PreAuthStatus::Expired => "EXPIRED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, PreAuthStatus::Rejected | PreAuthStatus::Expired)
    }

    /// Targets that stamp the reviewer identity when reached.
    const fn is_review_step(self) -> bool {
        matches!(
            self,
            PreAuthStatus::UnderReview
                | PreAuthStatus::Approved
                | PreAuthStatus::Rejected
                | PreAuthStatus::MoreInfoRequired
        )
    }
}

impl fmt::Display for PreAuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerStamp {
    pub user_id: Option<UserId>,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAuthorization {
    pub id: PreAuthorizationId,
    pub member_id: MemberId,
    pub benefit_policy_id: BenefitPolicyId,
    pub provider_id: Option<ProviderId>,
    pub service_id: Option<MedicalServiceId>,
    pub service_date: NaiveDate,
    pub requested_amount: Option<Decimal>,
    pub status: PreAuthStatus,
    pub approved_amount: Option<Decimal>,
    pub approval_expiry_date: Option<NaiveDate>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub reviewer: Option<ReviewerStamp>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl PreAuthorization {
    /// Whether an APPROVED authorization has passed its expiry date on `today`.
    pub fn is_lapsed(&self, today: NaiveDate) -> bool {
        self.status == PreAuthStatus::Approved
            && self
                .approval_expiry_date
                .map(|expiry| expiry < today)
                .unwrap_or(false)
    }

    /// Whether the authorization can back a claim with the given service date.
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.status == PreAuthStatus::Approved
            && self
                .approval_expiry_date
                .map(|expiry| date <= expiry)
                .unwrap_or(false)
    }
}

static PRE_AUTH_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_pre_authorization_id() -> PreAuthorizationId {
    let id = PRE_AUTH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PreAuthorizationId(format!("PA-{id:06}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAuthTransition {
    pub target: PreAuthStatus,
    pub comment: Option<String>,
    pub approved_amount: Option<Decimal>,
    pub approval_expiry_date: Option<NaiveDate>,
    pub rejection_reason: Option<String>,
}

impl PreAuthTransition {
    pub fn to(target: PreAuthStatus) -> Self {
        Self {
            target,
            comment: None,
            approved_amount: None,
            approval_expiry_date: None,
            rejection_reason: None,
        }
    }

    pub fn approve(amount: Decimal, expires_on: NaiveDate) -> Self {
        Self {
            approved_amount: Some(amount),
            approval_expiry_date: Some(expires_on),
            ..Self::to(PreAuthStatus::Approved)
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            rejection_reason: Some(reason.into()),
            ..Self::to(PreAuthStatus::Rejected)
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

pub struct PreAuthStateMachine {
    roles: TransitionRoles<PreAuthStatus>,
}

impl Default for PreAuthStateMachine {
    fn default() -> Self {
        Self::new(pre_authorization_transition_roles())
    }
}

impl PreAuthStateMachine {
    pub fn new(roles: TransitionRoles<PreAuthStatus>) -> Self {
        Self { roles }
    }

    /// Validate `request` and apply it to `pre_auth`, which is untouched on refusal.
    pub fn apply(
        &self,
        pre_auth: &mut PreAuthorization,
        request: &PreAuthTransition,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StateTransitionError> {
        let from = pre_auth.status;
        let to = request.target;
        if to == from {
            return Ok(TransitionOutcome::Unchanged);
        }

        let refuse = |block| {
            StateTransitionError::new(
                TransitionEntity::PreAuthorization,
                from.label(),
                to.label(),
                block,
            )
        };

        if from.is_terminal() {
            return Err(refuse(TransitionBlock::Terminal));
        }
        if to == PreAuthStatus::Expired && from != PreAuthStatus::Approved {
            return Err(refuse(TransitionBlock::Unreachable));
        }
        self.roles.authorize(from, to, actor).map_err(refuse)?;
        check_preconditions(request).map_err(refuse)?;

        pre_auth.status = to;
        pre_auth.updated_at = now;
        match to {
            PreAuthStatus::Approved => {
                pre_auth.approved_amount = request.approved_amount;
                pre_auth.approval_expiry_date = request.approval_expiry_date;
                pre_auth.rejection_reason = None;
            }
            PreAuthStatus::Rejected => {
                pre_auth.rejection_reason = request.rejection_reason.clone();
            }
            _ => {}
        }
        if let Some(comment) = &request.comment {
            pre_auth.notes = Some(comment.clone());
        }
        if to.is_review_step() {
            pre_auth.reviewer = Some(ReviewerStamp {
                user_id: actor.user_id.clone(),
                username: actor.username.clone(),
            });
            pre_auth.reviewed_at = Some(now);
        }

        Ok(TransitionOutcome::Changed(match to {
            PreAuthStatus::Approved => ChangeType::Approved,
            PreAuthStatus::Rejected => ChangeType::Rejected,
            _ => ChangeType::StatusChanged,
        }))
    }
}

fn check_preconditions(request: &PreAuthTransition) -> Result<(), TransitionBlock> {
    match request.target {
        PreAuthStatus::Rejected => {
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
        PreAuthStatus::Approved => {
            let positive = request
                .approved_amount
                .map(|amount| amount > Decimal::ZERO)
                .unwrap_or(false);
            if !positive {
                return Err(TransitionBlock::Precondition(
                    "approved amount must be greater than zero".to_string(),
                ));
            }
            if request.approval_expiry_date.is_none() {
                return Err(TransitionBlock::Precondition(
                    "an approval expiry date is required".to_string(),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Default pre-authorization edges. EXPIRED is reserved for the system sweep.
pub fn pre_authorization_transition_roles() -> TransitionRoles<PreAuthStatus> {
    use PreAuthStatus::*;

    let deciders = [roles::INSURANCE_ADMIN, roles::REVIEWER];

    TransitionRoles::new()
        .allow(Requested, UnderReview, &deciders)
        .allow(UnderReview, Approved, &deciders)
        .allow(UnderReview, Rejected, &deciders)
        .allow(UnderReview, MoreInfoRequired, &[roles::REVIEWER])
        .allow(
            MoreInfoRequired,
            Requested,
            &[roles::EMPLOYER_ADMIN, roles::INSURANCE_ADMIN],
        )
        .system_only(Approved, Expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pre_auth(status: PreAuthStatus) -> PreAuthorization {
        let now = Utc::now();
        PreAuthorization {
            id: PreAuthorizationId::new("PA-T1"),
            member_id: MemberId::new("mem-1"),
            benefit_policy_id: BenefitPolicyId::new("pol-1"),
            provider_id: None,
            service_id: None,
            service_date: date(2025, 4, 1),
            requested_amount: Some(dec!(1200)),
            status,
            approved_amount: None,
            approval_expiry_date: None,
            rejection_reason: None,
            notes: None,
            reviewer: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn reviewer() -> Actor {
        Actor::user(UserId::new("u-rev"), "rita", [roles::REVIEWER])
    }

    #[test]
    fn system_sweep_expires_approved_authorizations() {
        let machine = PreAuthStateMachine::default();
        let mut pre_auth = pre_auth(PreAuthStatus::Approved);

        let outcome = machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::to(PreAuthStatus::Expired),
                &Actor::system("pre-auth-expiry"),
                Utc::now(),
            )
            .expect("system may expire");

        assert_eq!(outcome, TransitionOutcome::Changed(ChangeType::StatusChanged));
        assert_eq!(pre_auth.status, PreAuthStatus::Expired);
    }

    #[test]
    fn humans_cannot_expire_even_as_super_admin() {
        let machine = PreAuthStateMachine::default();
        let admin = Actor::user(UserId::new("u-1"), "root", [roles::INSURANCE_ADMIN])
            .with_super_admin(true);

        for actor in [reviewer(), admin] {
            let mut pre_auth = pre_auth(PreAuthStatus::Approved);
            let err = machine
                .apply(
                    &mut pre_auth,
                    &PreAuthTransition::to(PreAuthStatus::Expired),
                    &actor,
                    Utc::now(),
                )
                .expect_err("humans cannot expire");
            assert_eq!(err.block, TransitionBlock::SystemOnly);
            assert_eq!(pre_auth.status, PreAuthStatus::Approved);
        }
    }

    #[test]
    fn expiry_requires_an_approved_authorization() {
        let machine = PreAuthStateMachine::default();
        let mut pre_auth = pre_auth(PreAuthStatus::UnderReview);

        let err = machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::to(PreAuthStatus::Expired),
                &Actor::system("pre-auth-expiry"),
                Utc::now(),
            )
            .expect_err("only approved can expire");

        assert_eq!(err.block, TransitionBlock::Unreachable);
    }

    #[test]
    fn terminal_states_name_themselves() {
        let machine = PreAuthStateMachine::default();
        let mut pre_auth = pre_auth(PreAuthStatus::Rejected);

        let err = machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::to(PreAuthStatus::UnderReview),
                &reviewer(),
                Utc::now(),
            )
            .expect_err("rejected is terminal");

        assert_eq!(err.block, TransitionBlock::Terminal);
        assert!(err.to_string().contains("REJECTED"));
    }

    #[test]
    fn approval_needs_amount_and_expiry_date() {
        let machine = PreAuthStateMachine::default();
        let mut pre_auth = pre_auth(PreAuthStatus::UnderReview);
        let mut missing_expiry = PreAuthTransition::to(PreAuthStatus::Approved);
        missing_expiry.approved_amount = Some(dec!(900));

        let err = machine
            .apply(&mut pre_auth, &missing_expiry, &reviewer(), Utc::now())
            .expect_err("expiry required");
        assert!(err.to_string().contains("expiry"));

        let err = machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::approve(Decimal::ZERO, date(2025, 6, 30)),
                &reviewer(),
                Utc::now(),
            )
            .expect_err("positive amount required");
        assert!(matches!(err.block, TransitionBlock::Precondition(_)));
        assert_eq!(pre_auth.status, PreAuthStatus::UnderReview);
    }

    #[test]
    fn review_steps_stamp_the_reviewer() {
        let machine = PreAuthStateMachine::default();
        let mut pre_auth = pre_auth(PreAuthStatus::UnderReview);

        machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::approve(dec!(900), date(2025, 6, 30)),
                &reviewer(),
                Utc::now(),
            )
            .expect("approved");

        let stamp = pre_auth.reviewer.as_ref().expect("reviewer stamped");
        assert_eq!(stamp.username, "rita");
        assert!(pre_auth.reviewed_at.is_some());
        assert!(pre_auth.is_valid_on(date(2025, 6, 30)));
        assert!(pre_auth.is_lapsed(date(2025, 7, 1)));
    }

    #[test]
    fn only_reviewers_request_more_info() {
        let machine = PreAuthStateMachine::default();
        let admin = Actor::user(UserId::new("u-ia"), "ian", [roles::INSURANCE_ADMIN]);
        let mut pre_auth = pre_auth(PreAuthStatus::UnderReview);

        let err = machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::to(PreAuthStatus::MoreInfoRequired),
                &admin,
                Utc::now(),
            )
            .expect_err("insurance admins cannot ask for more info");

        assert_eq!(
            err.block,
            TransitionBlock::RoleRequired {
                required: vec![crate::adjudication::access::Role::new(roles::REVIEWER)],
            }
        );
    }

    #[test]
    fn no_op_leaves_reviewer_fields_alone() {
        let machine = PreAuthStateMachine::default();
        let mut pre_auth = pre_auth(PreAuthStatus::UnderReview);
        let before = pre_auth.clone();

        let outcome = machine
            .apply(
                &mut pre_auth,
                &PreAuthTransition::to(PreAuthStatus::UnderReview),
                &reviewer(),
                Utc::now(),
            )
            .expect("no-op");

        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(pre_auth, before);
    }
}
