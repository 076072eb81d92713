use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::access::Actor;
use super::audit::{AuditTrailRecorder, ChangeType, ClaimAuditLog, ClaimSnapshot};
use super::claims::{
    next_claim_id, Claim, ClaimStateMachine, ClaimStatus, ClaimTransition, TransitionOutcome,
};
use super::coverage::CoverageResolver;
use super::domain::{BenefitPolicyId, ClaimId, MemberId, PreAuthorizationId, ProviderId};
use super::eligibility::{EligibilityContext, EligibilityDecision, EligibilityEngine, Requester};
use super::error::{
    AdjudicationError, BusinessRuleViolation, StateTransitionError, TransitionBlock,
    TransitionEntity,
};
use super::policies::PolicyService;
use super::preauth::{
    next_pre_authorization_id, PreAuthStateMachine, PreAuthStatus, PreAuthTransition,
    PreAuthorization,
};
use super::repository::{
    AuditLogRepository, BenefitPolicyRepository, ClaimRepository, PreAuthorizationRepository,
    RecordLookup, RepositoryError,
};

/// Inbound eligibility question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityRequest {
    pub member_id: MemberId,
    #[serde(alias = "policyId")]
    pub benefit_policy_id: BenefitPolicyId,
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    pub service_date: NaiveDate,
    #[serde(default)]
    pub service_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClaim {
    pub member_id: MemberId,
    #[serde(alias = "policyId")]
    pub benefit_policy_id: BenefitPolicyId,
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    #[serde(default)]
    pub service_code: Option<String>,
    #[serde(default)]
    pub pre_authorization_id: Option<PreAuthorizationId>,
    pub service_date: NaiveDate,
    pub requested_amount: Decimal,
    #[serde(default)]
    pub diagnosis_code: Option<String>,
    #[serde(default)]
    pub diagnosis_description: Option<String>,
    #[serde(default)]
    pub attachments_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPreAuthorization {
    pub member_id: MemberId,
    #[serde(alias = "policyId")]
    pub benefit_policy_id: BenefitPolicyId,
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    #[serde(default)]
    pub service_code: Option<String>,
    pub service_date: NaiveDate,
    #[serde(default)]
    pub requested_amount: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Claim transition as issued by a caller, optionally asking the service to compute the
/// approved amount from the policy's coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCommand {
    pub transition: ClaimTransition,
    pub auto_calculate: bool,
}

impl ClaimCommand {
    pub fn new(transition: ClaimTransition) -> Self {
        Self {
            transition,
            auto_calculate: false,
        }
    }

    /// Approve at the amount the coverage resolver yields for the claim's service.
    pub fn approve_calculated() -> Self {
        Self {
            transition: ClaimTransition::to(ClaimStatus::Approved),
            auto_calculate: true,
        }
    }
}

impl From<ClaimTransition> for ClaimCommand {
    fn from(transition: ClaimTransition) -> Self {
        Self::new(transition)
    }
}

/// What one maintenance sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_policies: Vec<BenefitPolicyId>,
    pub expired_pre_authorizations: Vec<PreAuthorizationId>,
}

static ELIGIBILITY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_eligibility_request_id() -> String {
    let id = ELIGIBILITY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("ELG-{id:06}")
}

const EXPIRY_PROCESS: &str = "pre-authorization-expiry";

/// Largest amount a claim or pre-authorization may request.
pub const MAX_REQUESTED_AMOUNT: i64 = 1_000_000_000_000;

fn check_requested_amount(amount: Decimal) -> Result<(), BusinessRuleViolation> {
    let ceiling = Decimal::from(MAX_REQUESTED_AMOUNT);
    if amount <= Decimal::ZERO {
        Err(BusinessRuleViolation::InvalidRequestedAmount)
    } else if amount > ceiling {
        Err(BusinessRuleViolation::RequestedAmountTooLarge {
            requested: amount,
            ceiling,
        })
    } else {
        Ok(())
    }
}

/// Facade over eligibility, claim adjudication, pre-authorization, and policy maintenance.
pub struct AdjudicationService<L, P, C, Q, A> {
    records: Arc<L>,
    policy_store: Arc<P>,
    claims: Arc<C>,
    pre_auths: Arc<Q>,
    audit: AuditTrailRecorder<A>,
    policies: PolicyService<P>,
    engine: Arc<EligibilityEngine>,
    resolver: CoverageResolver,
    claim_machine: ClaimStateMachine,
    pre_auth_machine: PreAuthStateMachine,
    claim_locks: Mutex<HashMap<ClaimId, Arc<Mutex<()>>>>,
}

impl<L, P, C, Q, A> AdjudicationService<L, P, C, Q, A>
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    pub fn new(
        records: Arc<L>,
        policy_store: Arc<P>,
        claims: Arc<C>,
        pre_auths: Arc<Q>,
        audit_log: Arc<A>,
        resolver: CoverageResolver,
    ) -> Self {
        Self {
            records,
            policies: PolicyService::new(policy_store.clone()),
            policy_store,
            claims,
            pre_auths,
            audit: AuditTrailRecorder::new(audit_log),
            engine: Arc::new(EligibilityEngine::standard(resolver)),
            resolver,
            claim_machine: ClaimStateMachine::default(),
            pre_auth_machine: PreAuthStateMachine::default(),
            claim_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the rule pipeline, e.g. with a custom registration.
    pub fn with_engine(mut self, engine: EligibilityEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    /// Replace the role tables of both state machines.
    pub fn with_state_machines(
        mut self,
        claim_machine: ClaimStateMachine,
        pre_auth_machine: PreAuthStateMachine,
    ) -> Self {
        self.claim_machine = claim_machine;
        self.pre_auth_machine = pre_auth_machine;
        self
    }

    pub fn policies(&self) -> &PolicyService<P> {
        &self.policies
    }

    pub fn engine(&self) -> &EligibilityEngine {
        &self.engine
    }

    /// Resolve the referenced records and run the rule pipeline.
    ///
    /// Ineligibility is an `Ok` decision; only unresolvable ids and storage failures are
    /// errors.
    pub fn check_eligibility(
        &self,
        request: &EligibilityRequest,
        requester: Requester,
    ) -> Result<EligibilityDecision, AdjudicationError> {
        let context = self.build_context(request, requester)?;
        let decision = self.engine.evaluate(&context);
        info!(
            request_id = %decision.request_id,
            member_id = %request.member_id,
            policy_id = %request.benefit_policy_id,
            eligible = decision.eligible,
            "eligibility checked"
        );
        Ok(decision)
    }

    fn build_context(
        &self,
        request: &EligibilityRequest,
        requester: Requester,
    ) -> Result<EligibilityContext, AdjudicationError> {
        let member = self
            .records
            .member(&request.member_id)?
            .ok_or_else(|| AdjudicationError::not_found("member", &request.member_id))?;
        let policy = self
            .policy_store
            .fetch(&request.benefit_policy_id)?
            .ok_or_else(|| {
                AdjudicationError::not_found("benefit policy", &request.benefit_policy_id)
            })?;
        let employer = self.records.employer(&member.employer_id)?;

        let provider = match &request.provider_id {
            Some(id) => Some(
                self.records
                    .provider(id)?
                    .ok_or_else(|| AdjudicationError::not_found("provider", id))?,
            ),
            None => None,
        };
        let service = match &request.service_code {
            Some(code) => Some(
                self.records
                    .service_by_code(code)?
                    .ok_or_else(|| AdjudicationError::not_found("medical service", code))?,
            ),
            None => None,
        };

        Ok(EligibilityContext {
            request_id: next_eligibility_request_id(),
            member_id: request.member_id.clone(),
            benefit_policy_id: request.benefit_policy_id.clone(),
            provider_id: request.provider_id.clone(),
            service_date: request.service_date,
            service_code: request.service_code.clone(),
            member: Some(member),
            benefit_policy: Some(policy),
            provider,
            employer,
            service,
            requester,
            checked_at: Utc::now(),
        })
    }

    fn require_eligible(
        &self,
        request: &EligibilityRequest,
        actor: &Actor,
    ) -> Result<EligibilityContext, AdjudicationError> {
        let context = self.build_context(request, Requester::from(actor))?;
        let decision = self.engine.evaluate(&context);
        if decision.eligible {
            return Ok(context);
        }

        let message = decision
            .primary_failure()
            .map(|failure| failure.message.clone())
            .unwrap_or_else(|| decision.summary());
        warn!(
            request_id = %decision.request_id,
            member_id = %request.member_id,
            reason = ?decision.primary_reason,
            "ineligible request refused"
        );
        Err(BusinessRuleViolation::MemberNotEligible {
            reason: decision.primary_reason,
            message,
        }
        .into())
    }

    /// Check eligibility, then persist the claim in DRAFT with a CREATED audit row.
    pub fn create_claim(&self, request: NewClaim, actor: &Actor) -> Result<Claim, AdjudicationError> {
        check_requested_amount(request.requested_amount)?;

        let eligibility = EligibilityRequest {
            member_id: request.member_id.clone(),
            benefit_policy_id: request.benefit_policy_id.clone(),
            provider_id: request.provider_id.clone(),
            service_date: request.service_date,
            service_code: request.service_code.clone(),
        };
        let context = self.require_eligible(&eligibility, actor)?;

        if let Some(pre_auth_id) = &request.pre_authorization_id {
            self.check_pre_authorization_backs(pre_auth_id, &request)?;
        }

        let now = Utc::now();
        let claim = Claim {
            id: next_claim_id(),
            member_id: request.member_id,
            benefit_policy_id: request.benefit_policy_id,
            provider_id: request.provider_id,
            service_id: context.service.map(|service| service.id),
            pre_authorization_id: request.pre_authorization_id,
            service_date: request.service_date,
            requested_amount: request.requested_amount,
            approved_amount: None,
            difference_amount: None,
            status: ClaimStatus::Draft,
            diagnosis_code: request.diagnosis_code,
            diagnosis_description: request.diagnosis_description,
            reviewer_comment: None,
            attachments_count: request.attachments_count,
            services_count: 1,
            reviewed_by: None,
            reviewed_at: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let id = claim.id.clone();
        let stored = self.with_claim_lock(&id, || -> Result<Claim, AdjudicationError> {
            let stored = self.claims.insert(claim)?;
            let recorded = self.audit.record(
                ChangeType::Created,
                None,
                ClaimSnapshot::from(&stored),
                actor,
                None,
            );
            if let Err(err) = recorded {
                if let Err(cleanup) = self.claims.remove(&stored.id) {
                    error!(claim_id = %stored.id, error = %cleanup, "unaudited claim could not be removed");
                }
                return Err(err);
            }
            Ok(stored)
        })?;

        info!(claim_id = %stored.id, member_id = %stored.member_id, actor = %actor.username, "claim created");
        Ok(stored)
    }

    fn check_pre_authorization_backs(
        &self,
        id: &PreAuthorizationId,
        claim: &NewClaim,
    ) -> Result<(), AdjudicationError> {
        let pre_auth = self
            .pre_auths
            .fetch(id)?
            .ok_or_else(|| AdjudicationError::not_found("pre-authorization", id))?;
        let detail = if pre_auth.member_id != claim.member_id {
            Some("it was issued for another member")
        } else if pre_auth.benefit_policy_id != claim.benefit_policy_id {
            Some("it was issued under another benefit policy")
        } else if !pre_auth.is_valid_on(claim.service_date) {
            Some("it is not approved for the service date")
        } else {
            None
        };
        match detail {
            Some(detail) => Err(BusinessRuleViolation::PreAuthorizationUnusable {
                id: id.clone(),
                detail,
            }
            .into()),
            None => Ok(()),
        }
    }

    pub fn get_claim(&self, id: &ClaimId) -> Result<Claim, AdjudicationError> {
        self.claims
            .fetch(id)?
            .ok_or_else(|| AdjudicationError::not_found("claim", id))
    }

    /// Move a claim to a new status.
    ///
    /// The claim is saved only if nobody changed it since it was read, and the change is
    /// kept only once its audit row is written.
    pub fn transition_claim(
        &self,
        id: &ClaimId,
        command: impl Into<ClaimCommand>,
        actor: &Actor,
    ) -> Result<Claim, AdjudicationError> {
        let command = command.into();
        let current = self.get_claim(id)?;

        let mut transition = command.transition;
        if command.auto_calculate
            && transition.target == ClaimStatus::Approved
            && current.status != ClaimStatus::Approved
        {
            transition.approved_amount = Some(self.calculate_payable(&current)?);
        }

        let mut updated = current.clone();
        let outcome = self
            .claim_machine
            .apply(&mut updated, &transition, actor, Utc::now())
            .map_err(|err| {
                warn!(claim_id = %id, actor = %actor.username, error = %err, "claim transition refused");
                err
            })?;
        let change = match outcome {
            TransitionOutcome::Unchanged => return Ok(current),
            TransitionOutcome::Changed(change) => change,
        };

        let comment = transition
            .rejection_reason
            .as_deref()
            .or(transition.comment.as_deref());
        let saved = self.with_claim_lock(id, || {
            self.commit_claim(&current, updated, change, transition.target, actor, comment)
        })?;

        info!(
            claim_id = %id,
            from = %current.status,
            to = %saved.status,
            actor = %actor.username,
            "claim transitioned"
        );
        Ok(saved)
    }

    /// Save the claim and write its audit row, undoing the save if the row is lost.
    /// Runs under the claim's lock.
    fn commit_claim(
        &self,
        current: &Claim,
        updated: Claim,
        change: ChangeType,
        target: ClaimStatus,
        actor: &Actor,
        comment: Option<&str>,
    ) -> Result<Claim, AdjudicationError> {
        let saved = match self.claims.update(updated, current.version) {
            Ok(saved) => saved,
            Err(RepositoryError::VersionConflict { .. }) => {
                return Err(self.claim_conflict(&current.id, target));
            }
            Err(err) => {
                error!(claim_id = %current.id, error = %err, "claim save failed");
                return Err(err.into());
            }
        };

        let recorded = self.audit.record(
            change,
            Some(ClaimSnapshot::from(current)),
            ClaimSnapshot::from(&saved),
            actor,
            comment,
        );
        if let Err(err) = recorded {
            self.revert_claim(&saved, current.clone());
            return Err(err);
        }
        Ok(saved)
    }

    /// Run `work` while holding the per-claim lock; the entry is dropped once unused.
    fn with_claim_lock<T>(&self, id: &ClaimId, work: impl FnOnce() -> T) -> T {
        let lock = self
            .claim_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            work()
        };

        let mut locks = self
            .claim_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }

    fn calculate_payable(&self, claim: &Claim) -> Result<Decimal, AdjudicationError> {
        let service_id = claim
            .service_id
            .as_ref()
            .ok_or(BusinessRuleViolation::MissingServiceForCalculation)?;
        let service = self
            .records
            .service(service_id)?
            .ok_or_else(|| AdjudicationError::not_found("medical service", service_id))?;
        let policy = self
            .policy_store
            .fetch(&claim.benefit_policy_id)?
            .ok_or_else(|| {
                AdjudicationError::not_found("benefit policy", &claim.benefit_policy_id)
            })?;

        let coverage = self.resolver.resolve_coverage(&policy, &service);
        if !coverage.covered {
            return Err(BusinessRuleViolation::ServiceNotCovered.into());
        }
        coverage
            .payable(claim.requested_amount)
            .ok_or_else(|| {
                BusinessRuleViolation::PayableOverflow {
                    requested: claim.requested_amount,
                }
                .into()
            })
    }

    fn claim_conflict(&self, id: &ClaimId, target: ClaimStatus) -> AdjudicationError {
        let latest = match self.get_claim(id) {
            Ok(latest) => latest,
            Err(err) => return err,
        };
        warn!(claim_id = %id, current = %latest.status, "claim transition lost to a concurrent change");
        StateTransitionError::new(
            TransitionEntity::Claim,
            latest.status.label(),
            target.label(),
            TransitionBlock::ConcurrentModification,
        )
        .into()
    }

    /// Put back the pre-transition state after the audit write failed.
    fn revert_claim(&self, saved: &Claim, previous: Claim) {
        match self.claims.update(previous, saved.version) {
            Ok(_) => warn!(claim_id = %saved.id, "claim transition reverted after audit failure"),
            Err(err) => error!(
                claim_id = %saved.id,
                status = %saved.status,
                error = %err,
                "claim transition could not be reverted after audit failure"
            ),
        }
    }

    pub fn claim_audit_trail(&self, id: &ClaimId) -> Result<Vec<ClaimAuditLog>, AdjudicationError> {
        self.get_claim(id)?;
        self.audit.trail(id)
    }

    /// Check eligibility, then persist the pre-authorization in REQUESTED.
    pub fn request_pre_authorization(
        &self,
        request: NewPreAuthorization,
        actor: &Actor,
    ) -> Result<PreAuthorization, AdjudicationError> {
        if let Some(amount) = request.requested_amount {
            check_requested_amount(amount)?;
        }

        let eligibility = EligibilityRequest {
            member_id: request.member_id.clone(),
            benefit_policy_id: request.benefit_policy_id.clone(),
            provider_id: request.provider_id.clone(),
            service_date: request.service_date,
            service_code: request.service_code.clone(),
        };
        let context = self.require_eligible(&eligibility, actor)?;

        let now = Utc::now();
        let pre_auth = PreAuthorization {
            id: next_pre_authorization_id(),
            member_id: request.member_id,
            benefit_policy_id: request.benefit_policy_id,
            provider_id: request.provider_id,
            service_id: context.service.map(|service| service.id),
            service_date: request.service_date,
            requested_amount: request.requested_amount,
            status: PreAuthStatus::Requested,
            approved_amount: None,
            approval_expiry_date: None,
            rejection_reason: None,
            notes: request.notes,
            reviewer: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = self.pre_auths.insert(pre_auth)?;
        info!(pre_auth_id = %stored.id, member_id = %stored.member_id, actor = %actor.username, "pre-authorization requested");
        Ok(stored)
    }

    pub fn get_pre_authorization(
        &self,
        id: &PreAuthorizationId,
    ) -> Result<PreAuthorization, AdjudicationError> {
        self.pre_auths
            .fetch(id)?
            .ok_or_else(|| AdjudicationError::not_found("pre-authorization", id))
    }

    pub fn transition_pre_authorization(
        &self,
        id: &PreAuthorizationId,
        request: &PreAuthTransition,
        actor: &Actor,
    ) -> Result<PreAuthorization, AdjudicationError> {
        let current = self.get_pre_authorization(id)?;
        let mut updated = current.clone();

        let outcome = self
            .pre_auth_machine
            .apply(&mut updated, request, actor, Utc::now())
            .map_err(|err| {
                warn!(pre_auth_id = %id, actor = %actor.username, error = %err, "pre-authorization transition refused");
                err
            })?;
        if outcome == TransitionOutcome::Unchanged {
            return Ok(current);
        }

        match self.pre_auths.update(updated, current.version) {
            Ok(saved) => {
                info!(
                    pre_auth_id = %id,
                    from = %current.status,
                    to = %saved.status,
                    actor = %actor.username,
                    "pre-authorization transitioned"
                );
                Ok(saved)
            }
            Err(RepositoryError::VersionConflict { .. }) => {
                let latest = self.get_pre_authorization(id)?;
                warn!(pre_auth_id = %id, current = %latest.status, "pre-authorization transition lost to a concurrent change");
                Err(StateTransitionError::new(
                    TransitionEntity::PreAuthorization,
                    latest.status.label(),
                    request.target.label(),
                    TransitionBlock::ConcurrentModification,
                )
                .into())
            }
            Err(err) => {
                error!(pre_auth_id = %id, error = %err, "pre-authorization save failed");
                Err(err.into())
            }
        }
    }

    /// System sweep: APPROVED pre-authorizations past their expiry date become EXPIRED.
    pub fn expire_pre_authorizations(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<PreAuthorizationId>, AdjudicationError> {
        let system = Actor::system(EXPIRY_PROCESS);
        let expire = PreAuthTransition::to(PreAuthStatus::Expired)
            .with_comment(format!("approval lapsed before {today}"));

        let mut expired = Vec::new();
        for pre_auth in self.pre_auths.with_status(PreAuthStatus::Approved)? {
            if !pre_auth.is_lapsed(today) {
                continue;
            }
            match self.transition_pre_authorization(&pre_auth.id, &expire, &system) {
                Ok(saved) => expired.push(saved.id),
                Err(err) if err.is_technical() => return Err(err),
                Err(err) => {
                    warn!(pre_auth_id = %pre_auth.id, error = %err, "pre-authorization expiry skipped")
                }
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), %today, "pre-authorizations expired");
        }
        Ok(expired)
    }

    /// Run both expiry sweeps for `today`.
    pub fn run_maintenance(&self, today: NaiveDate) -> Result<MaintenanceReport, AdjudicationError> {
        let expired_policies = self.policies.expire_lapsed(today)?;
        let expired_pre_authorizations = self.expire_pre_authorizations(today)?;
        Ok(MaintenanceReport {
            expired_policies,
            expired_pre_authorizations,
        })
    }
}

