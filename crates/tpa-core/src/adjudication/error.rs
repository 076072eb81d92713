use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::access::Role;
use super::domain::{BenefitPolicyId, EmployerId, PolicyStatus, PreAuthorizationId, RuleTarget};
use super::eligibility::ReasonCode;
use super::repository::RepositoryError;

/// Entity whose lifecycle a state machine governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEntity {
    Claim,
    PreAuthorization,
    BenefitPolicy,
}

impl fmt::Display for TransitionEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionEntity::Claim => f.write_str("claim"),
            TransitionEntity::PreAuthorization => f.write_str("pre-authorization"),
            TransitionEntity::BenefitPolicy => f.write_str("benefit policy"),
        }
    }
}

/// Why a requested transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionBlock {
    Unreachable,
    Terminal,
    RoleRequired { required: Vec<Role> },
    SystemOnly,
    Precondition(String),
    ConcurrentModification,
}

impl fmt::Display for TransitionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionBlock::Unreachable => f.write_str("transition is not allowed"),
            TransitionBlock::Terminal => f.write_str("current status is terminal"),
            TransitionBlock::RoleRequired { required } => {
                let names: Vec<&str> = required.iter().map(|role| role.0.as_str()).collect();
                write!(f, "requires one of roles [{}]", names.join(", "))
            }
            TransitionBlock::SystemOnly => {
                f.write_str("only a system process may perform this transition")
            }
            TransitionBlock::Precondition(message) => f.write_str(message),
            TransitionBlock::ConcurrentModification => {
                f.write_str("the record was changed by a concurrent request")
            }
        }
    }
}

/// Refused move of a claim, pre-authorization, or policy between two statuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move {entity} from {from} to {to}: {block}")]
pub struct StateTransitionError {
    pub entity: TransitionEntity,
    pub from: &'static str,
    pub to: &'static str,
    pub block: TransitionBlock,
}

impl StateTransitionError {
    pub fn new(
        entity: TransitionEntity,
        from: &'static str,
        to: &'static str,
        block: TransitionBlock,
    ) -> Self {
        Self {
            entity,
            from,
            to,
            block,
        }
    }
}

/// A domain invariant would be broken by the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusinessRuleViolation {
    #[error(transparent)]
    StateTransition(#[from] StateTransitionError),
    #[error("policy start date {start} must be before end date {end}")]
    InvalidPolicyPeriod { start: NaiveDate, end: NaiveDate },
    #[error("coverage percent {0} must be between 0 and 100")]
    InvalidCoveragePercent(u8),
    #[error("{field} must not be negative (found {value})")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("a policy rule must target exactly one medical category or medical service")]
    InvalidRuleTarget,
    #[error("policy {policy} already has a rule for {target}")]
    DuplicateRuleTarget {
        policy: BenefitPolicyId,
        target: RuleTarget,
    },
    #[error("policy {policy} overlaps active policy {conflicting} of employer {employer}")]
    OverlappingPolicy {
        policy: BenefitPolicyId,
        conflicting: BenefitPolicyId,
        employer: EmployerId,
    },
    #[error("policy in status {0} can no longer be changed")]
    PolicyLocked(PolicyStatus),
    #[error("member is not eligible: {message}")]
    MemberNotEligible {
        reason: Option<ReasonCode>,
        message: String,
    },
    #[error("pre-authorization {id} cannot back this claim: {detail}")]
    PreAuthorizationUnusable {
        id: PreAuthorizationId,
        detail: &'static str,
    },
    #[error("service is not covered by the benefit policy")]
    ServiceNotCovered,
    #[error("automatic calculation needs a service on the claim")]
    MissingServiceForCalculation,
    #[error("requested amount must be greater than zero")]
    InvalidRequestedAmount,
    #[error("requested amount {requested} exceeds the ceiling of {ceiling}")]
    RequestedAmountTooLarge { requested: Decimal, ceiling: Decimal },
    #[error("payable amount for {requested} cannot be represented")]
    PayableOverflow { requested: Decimal },
    #[error("waiting period of {days} days exceeds the maximum of {max}")]
    InvalidWaitingPeriod { days: u32, max: u32 },
}

impl BusinessRuleViolation {
    pub fn code(&self) -> &'static str {
        match self {
            BusinessRuleViolation::StateTransition(_) => "STATE_TRANSITION_INVALID",
            BusinessRuleViolation::InvalidPolicyPeriod { .. } => "POLICY_PERIOD_INVALID",
            BusinessRuleViolation::InvalidCoveragePercent(_) => "COVERAGE_PERCENT_INVALID",
            BusinessRuleViolation::NegativeAmount { .. } => "AMOUNT_NEGATIVE",
            BusinessRuleViolation::InvalidRuleTarget => "RULE_TARGET_INVALID",
            BusinessRuleViolation::DuplicateRuleTarget { .. } => "RULE_TARGET_DUPLICATE",
            BusinessRuleViolation::OverlappingPolicy { .. } => "POLICY_OVERLAP",
            BusinessRuleViolation::PolicyLocked(_) => "POLICY_LOCKED",
            BusinessRuleViolation::MemberNotEligible { .. } => "MEMBER_NOT_ELIGIBLE",
            BusinessRuleViolation::PreAuthorizationUnusable { .. } => "PRE_AUTHORIZATION_UNUSABLE",
            BusinessRuleViolation::ServiceNotCovered => "SERVICE_NOT_COVERED",
            BusinessRuleViolation::MissingServiceForCalculation => "SERVICE_REQUIRED",
            BusinessRuleViolation::InvalidRequestedAmount => "REQUESTED_AMOUNT_INVALID",
            BusinessRuleViolation::RequestedAmountTooLarge { .. } => "REQUESTED_AMOUNT_TOO_LARGE",
            BusinessRuleViolation::PayableOverflow { .. } => "PAYABLE_AMOUNT_OVERFLOW",
            BusinessRuleViolation::InvalidWaitingPeriod { .. } => "WAITING_PERIOD_INVALID",
        }
    }
}

/// Error surfaced by the adjudication services.
#[derive(Debug, thiserror::Error)]
pub enum AdjudicationError {
    #[error(transparent)]
    BusinessRule(#[from] BusinessRuleViolation),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("technical failure: {0}")]
    Technical(#[from] RepositoryError),
}

impl AdjudicationError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AdjudicationError::BusinessRule(violation) => violation.code(),
            AdjudicationError::NotFound { .. } => "NOT_FOUND",
            AdjudicationError::Technical(_) => "TECHNICAL_FAILURE",
        }
    }

    /// Message safe to return to callers; technical details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AdjudicationError::Technical(_) => {
                "the request could not be completed, please retry later".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_technical(&self) -> bool {
        matches!(self, AdjudicationError::Technical(_))
    }

    pub fn as_transition(&self) -> Option<&StateTransitionError> {
        match self {
            AdjudicationError::BusinessRule(BusinessRuleViolation::StateTransition(error)) => {
                Some(error)
            }
            _ => None,
        }
    }
}

impl From<StateTransitionError> for AdjudicationError {
    fn from(value: StateTransitionError) -> Self {
        Self::BusinessRule(BusinessRuleViolation::StateTransition(value))
    }
}
