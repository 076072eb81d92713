//! Claims and pre-authorization adjudication for a third-party health-insurance
//! administrator.
//!
//! The pieces compose bottom-up: the eligibility pipeline and coverage resolver are pure
//! functions of already-resolved records, the two state machines validate one status change
//! in memory, and [`AdjudicationService`] wires them to the repositories with optimistic
//! saves and the audit trail. [`PolicyService`] owns the benefit policy lifecycle.

pub mod access;
pub mod audit;
pub mod claims;
pub mod coverage;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod memory;
pub mod policies;
pub mod preauth;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use access::{roles, Actor, ActorKind, EdgeAuthorization, Role, TransitionRoles};
pub use audit::{AuditActor, AuditTrailRecorder, ChangeType, ClaimAuditLog, ClaimSnapshot};
pub use claims::{
    claim_transition_roles, Claim, ClaimStateMachine, ClaimStatus, ClaimTransition,
    TransitionOutcome,
};
pub use coverage::{
    find_overlap, has_overlap, is_effective_on, CoverageMatch, CoverageResolver, CoverageResult,
    DEFAULT_COVERAGE_PERCENT,
};
pub use domain::{
    BenefitPolicy, BenefitPolicyId, BenefitPolicyRule, BenefitPolicyRuleId, ClaimId, Employer,
    EmployerId, MedicalCategory, MedicalCategoryId, MedicalService, MedicalServiceId, Member,
    MemberId, MemberStatus, PolicyStatus, PreAuthorizationId, Provider, ProviderId, RuleTarget,
    UserId,
};
pub use eligibility::{
    EligibilityContext, EligibilityDecision, EligibilityEngine, EligibilityRule, ReasonCode,
    Requester, RuleResult,
};
pub use error::{
    AdjudicationError, BusinessRuleViolation, StateTransitionError, TransitionBlock,
    TransitionEntity,
};
pub use memory::{
    InMemoryAdjudicationService, InMemoryAuditLog, InMemoryClaimRepository,
    InMemoryPolicyRepository, InMemoryPreAuthorizationRepository, InMemoryRecords,
    InMemoryStore,
};
pub use policies::{NewBenefitPolicy, NewPolicyRule, PolicyService, MAX_WAITING_PERIOD_DAYS};
pub use preauth::{
    pre_authorization_transition_roles, PreAuthStateMachine, PreAuthStatus, PreAuthTransition,
    PreAuthorization, ReviewerStamp,
};
pub use repository::{
    AuditLogRepository, BenefitPolicyRepository, ClaimRepository, PreAuthorizationRepository,
    RecordLookup, RepositoryError,
};
pub use router::{adjudication_router, error_response, AdjudicationApi};
pub use service::{
    AdjudicationService, ClaimCommand, EligibilityRequest, MaintenanceReport, NewClaim,
    NewPreAuthorization, MAX_REQUESTED_AMOUNT,
};
