//! Benefit policy lifecycle: drafting, rule maintenance, activation, and expiry.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::coverage::find_overlap;
use super::domain::{
    BenefitPolicy, BenefitPolicyId, BenefitPolicyRule, BenefitPolicyRuleId, EmployerId,
    MedicalCategoryId, MedicalServiceId, PolicyStatus, ProviderId, RuleTarget,
};
use super::error::{
    AdjudicationError, BusinessRuleViolation, StateTransitionError, TransitionBlock,
    TransitionEntity,
};
use super::repository::BenefitPolicyRepository;

/// Write request for a new policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBenefitPolicy {
    pub code: String,
    pub name: String,
    pub employer_id: EmployerId,
    pub insurer_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub annual_limit: Decimal,
    pub default_coverage_percent: Option<u8>,
    pub per_member_limit: Option<Decimal>,
    pub per_family_limit: Option<Decimal>,
    #[serde(default)]
    pub network_provider_ids: BTreeSet<ProviderId>,
}

/// Write request for a policy rule; exactly one of the two targets must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPolicyRule {
    pub category_id: Option<MedicalCategoryId>,
    pub service_id: Option<MedicalServiceId>,
    pub coverage_percent: Option<u8>,
    pub amount_limit: Option<Decimal>,
    pub times_limit: Option<u32>,
    pub waiting_period_days: Option<u32>,
    #[serde(default)]
    pub requires_pre_approval: bool,
}

/// Longest waiting period a rule may impose, ten years.
pub const MAX_WAITING_PERIOD_DAYS: u32 = 3_653;

static POLICY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_policy_id() -> BenefitPolicyId {
    let id = POLICY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    BenefitPolicyId(format!("POL-{id:06}"))
}

/// Policy maintenance. Every mutation holds the owning employer's lock so activations
/// for one employer are serialized.
pub struct PolicyService<P> {
    policies: Arc<P>,
    employer_locks: Mutex<HashMap<EmployerId, Arc<Mutex<()>>>>,
}

impl<P> PolicyService<P>
where
    P: BenefitPolicyRepository + 'static,
{
    pub fn new(policies: Arc<P>) -> Self {
        Self {
            policies,
            employer_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, request: NewBenefitPolicy) -> Result<BenefitPolicy, AdjudicationError> {
        if request.start_date >= request.end_date {
            return Err(BusinessRuleViolation::InvalidPolicyPeriod {
                start: request.start_date,
                end: request.end_date,
            }
            .into());
        }
        check_non_negative("annual limit", Some(request.annual_limit))?;
        check_non_negative("per member limit", request.per_member_limit)?;
        check_non_negative("per family limit", request.per_family_limit)?;
        check_percent(request.default_coverage_percent)?;

        let policy = BenefitPolicy {
            id: next_policy_id(),
            code: request.code,
            name: request.name,
            employer_id: request.employer_id,
            insurer_id: request.insurer_id,
            start_date: request.start_date,
            end_date: request.end_date,
            annual_limit: request.annual_limit,
            default_coverage_percent: request.default_coverage_percent,
            per_member_limit: request.per_member_limit,
            per_family_limit: request.per_family_limit,
            status: PolicyStatus::Draft,
            rules: Vec::new(),
            network_provider_ids: request.network_provider_ids,
            updated_at: Utc::now(),
        };

        let stored = self.policies.insert(policy)?;
        info!(policy_id = %stored.id, employer_id = %stored.employer_id, "benefit policy drafted");
        Ok(stored)
    }

    pub fn get(&self, id: &BenefitPolicyId) -> Result<BenefitPolicy, AdjudicationError> {
        self.policies
            .fetch(id)?
            .ok_or_else(|| AdjudicationError::not_found("benefit policy", id))
    }

    pub fn add_rule(
        &self,
        id: &BenefitPolicyId,
        request: NewPolicyRule,
    ) -> Result<BenefitPolicy, AdjudicationError> {
        let target = RuleTarget::from_parts(request.category_id, request.service_id)
            .ok_or(BusinessRuleViolation::InvalidRuleTarget)?;
        check_percent(request.coverage_percent)?;
        check_non_negative("amount limit", request.amount_limit)?;
        check_waiting_period(request.waiting_period_days)?;

        self.mutate(id, |policy| {
            if policy.status.is_terminal() {
                return Err(BusinessRuleViolation::PolicyLocked(policy.status).into());
            }
            if policy.rules.iter().any(|rule| rule.target == target) {
                return Err(BusinessRuleViolation::DuplicateRuleTarget {
                    policy: policy.id.clone(),
                    target: target.clone(),
                }
                .into());
            }

            let rule_id = BenefitPolicyRuleId(format!("{}-R{}", policy.id, policy.rules.len() + 1));
            policy.rules.push(BenefitPolicyRule {
                id: rule_id,
                target: target.clone(),
                coverage_percent: request.coverage_percent,
                amount_limit: request.amount_limit,
                times_limit: request.times_limit,
                waiting_period_days: request.waiting_period_days.unwrap_or(0),
                requires_pre_approval: request.requires_pre_approval,
                active: true,
            });
            Ok(())
        })
    }

    /// Switch a rule off without deleting it; its target stays reserved.
    pub fn deactivate_rule(
        &self,
        id: &BenefitPolicyId,
        rule_id: &BenefitPolicyRuleId,
    ) -> Result<BenefitPolicy, AdjudicationError> {
        self.mutate(id, |policy| {
            if policy.status.is_terminal() {
                return Err(BusinessRuleViolation::PolicyLocked(policy.status).into());
            }
            let rule = policy
                .rules
                .iter_mut()
                .find(|rule| &rule.id == rule_id)
                .ok_or_else(|| AdjudicationError::not_found("policy rule", rule_id))?;
            rule.active = false;
            Ok(())
        })
    }

    /// DRAFT or SUSPENDED → ACTIVE once no other ACTIVE/SUSPENDED policy of the same
    /// employer overlaps the period.
    pub fn activate(&self, id: &BenefitPolicyId) -> Result<BenefitPolicy, AdjudicationError> {
        let policy = self.mutate(id, |policy| {
            if !matches!(policy.status, PolicyStatus::Draft | PolicyStatus::Suspended) {
                return Err(policy_transition(policy.status, PolicyStatus::Active).into());
            }
            self.ensure_no_overlap(policy, policy.start_date, policy.end_date)?;
            policy.status = PolicyStatus::Active;
            Ok(())
        })?;
        info!(policy_id = %policy.id, employer_id = %policy.employer_id, "benefit policy activated");
        Ok(policy)
    }

    pub fn suspend(&self, id: &BenefitPolicyId) -> Result<BenefitPolicy, AdjudicationError> {
        self.mutate(id, |policy| {
            if policy.status != PolicyStatus::Active {
                return Err(policy_transition(policy.status, PolicyStatus::Suspended).into());
            }
            policy.status = PolicyStatus::Suspended;
            Ok(())
        })
    }

    pub fn cancel(&self, id: &BenefitPolicyId) -> Result<BenefitPolicy, AdjudicationError> {
        self.mutate(id, |policy| {
            if policy.status.is_terminal() {
                return Err(policy_transition(policy.status, PolicyStatus::Cancelled).into());
            }
            policy.status = PolicyStatus::Cancelled;
            Ok(())
        })
    }

    /// Move the coverage period, re-checking overlap when the policy holds its period.
    pub fn reschedule(
        &self,
        id: &BenefitPolicyId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BenefitPolicy, AdjudicationError> {
        if start >= end {
            return Err(BusinessRuleViolation::InvalidPolicyPeriod { start, end }.into());
        }
        self.mutate(id, |policy| {
            if policy.status.is_terminal() {
                return Err(BusinessRuleViolation::PolicyLocked(policy.status).into());
            }
            if policy.status.holds_period() {
                self.ensure_no_overlap(policy, start, end)?;
            }
            policy.start_date = start;
            policy.end_date = end;
            Ok(())
        })
    }

    /// True when another ACTIVE or SUSPENDED policy of `employer` intersects `[start, end]`.
    pub fn has_overlap(
        &self,
        employer: &EmployerId,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<&BenefitPolicyId>,
    ) -> Result<bool, AdjudicationError> {
        let policies = self.policies.for_employer(employer)?;
        Ok(find_overlap(&policies, start, end, exclude).is_some())
    }

    /// Maintenance sweep: ACTIVE policies whose end date is before `today` become EXPIRED.
    pub fn expire_lapsed(&self, today: NaiveDate) -> Result<Vec<BenefitPolicyId>, AdjudicationError> {
        let mut expired = Vec::new();
        for candidate in self.policies.with_status(PolicyStatus::Active)? {
            if candidate.end_date >= today {
                continue;
            }
            let result = self.mutate(&candidate.id, |policy| {
                if policy.status == PolicyStatus::Active && policy.end_date < today {
                    policy.status = PolicyStatus::Expired;
                }
                Ok(())
            });
            match result {
                Ok(policy) if policy.status == PolicyStatus::Expired => expired.push(policy.id),
                Ok(_) => {}
                Err(err) => {
                    warn!(policy_id = %candidate.id, error = %err, "policy expiry skipped");
                    if err.is_technical() {
                        return Err(err);
                    }
                }
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), %today, "benefit policies expired");
        }
        Ok(expired)
    }

    fn ensure_no_overlap(
        &self,
        policy: &BenefitPolicy,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), AdjudicationError> {
        let siblings = self.policies.for_employer(&policy.employer_id)?;
        match find_overlap(&siblings, start, end, Some(&policy.id)) {
            Some(conflicting) => {
                warn!(
                    policy_id = %policy.id,
                    conflicting = %conflicting.id,
                    "overlapping benefit policy refused"
                );
                Err(BusinessRuleViolation::OverlappingPolicy {
                    policy: policy.id.clone(),
                    conflicting: conflicting.id.clone(),
                    employer: policy.employer_id.clone(),
                }
                .into())
            }
            None => Ok(()),
        }
    }

    /// Load, change, and store a policy while holding its employer's lock.
    fn mutate<F>(&self, id: &BenefitPolicyId, change: F) -> Result<BenefitPolicy, AdjudicationError>
    where
        F: FnOnce(&mut BenefitPolicy) -> Result<(), AdjudicationError>,
    {
        let employer = self.get(id)?.employer_id;
        let lock = self.employer_lock(&employer);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut policy = self.get(id)?;
        change(&mut policy)?;
        policy.updated_at = Utc::now();
        self.policies.update(policy.clone())?;
        Ok(policy)
    }

    fn employer_lock(&self, employer: &EmployerId) -> Arc<Mutex<()>> {
        let mut locks = self
            .employer_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(employer.clone()).or_default().clone()
    }
}

fn policy_transition(from: PolicyStatus, to: PolicyStatus) -> StateTransitionError {
    let block = if from.is_terminal() {
        TransitionBlock::Terminal
    } else {
        TransitionBlock::Unreachable
    };
    StateTransitionError::new(TransitionEntity::BenefitPolicy, from.label(), to.label(), block)
}

fn check_percent(percent: Option<u8>) -> Result<(), BusinessRuleViolation> {
    match percent {
        Some(value) if value > 100 => Err(BusinessRuleViolation::InvalidCoveragePercent(value)),
        _ => Ok(()),
    }
}

fn check_waiting_period(days: Option<u32>) -> Result<(), BusinessRuleViolation> {
    match days {
        Some(days) if days > MAX_WAITING_PERIOD_DAYS => {
            Err(BusinessRuleViolation::InvalidWaitingPeriod {
                days,
                max: MAX_WAITING_PERIOD_DAYS,
            })
        }
        _ => Ok(()),
    }
}

fn check_non_negative(
    field: &'static str,
    value: Option<Decimal>,
) -> Result<(), BusinessRuleViolation> {
    match value {
        Some(value) if value < Decimal::ZERO => {
            Err(BusinessRuleViolation::NegativeAmount { field, value })
        }
        _ => Ok(()),
    }
}
