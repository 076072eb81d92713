//! Coverage resolution over a benefit policy's rule set.
//!
//! A service-level rule always beats a category-level rule for the same service, and a
//! service without any matching active rule is not covered.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::domain::{
    BenefitPolicy, BenefitPolicyId, BenefitPolicyRule, MedicalService, PolicyStatus, RuleTarget,
};

pub const DEFAULT_COVERAGE_PERCENT: u8 = 80;

/// Outcome of resolving one service against a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub covered: bool,
    pub coverage_percent: u8,
    pub amount_limit: Option<Decimal>,
    pub times_limit: Option<u32>,
    pub requires_pre_approval: bool,
    pub waiting_period_days: u32,
    pub matched: Option<CoverageMatch>,
}

impl CoverageResult {
    fn not_covered() -> Self {
        Self {
            covered: false,
            coverage_percent: 0,
            amount_limit: None,
            times_limit: None,
            requires_pre_approval: false,
            waiting_period_days: 0,
            matched: None,
        }
    }

    /// Amount payable for `requested`, capped by the rule's amount limit.
    ///
    /// `None` when the share does not fit in a `Decimal`.
    pub fn payable(&self, requested: Decimal) -> Option<Decimal> {
        if !self.covered {
            return Some(Decimal::ZERO);
        }
        let share = requested
            .checked_mul(Decimal::from(self.coverage_percent))?
            .checked_div(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Some(match self.amount_limit {
            Some(limit) if share > limit => limit,
            _ => share,
        })
    }
}

/// Which level of the policy produced the coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMatch {
    Service,
    Category,
}

/// Stateless resolver; the fallback percent comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageResolver {
    fallback_percent: u8,
}

impl Default for CoverageResolver {
    fn default() -> Self {
        Self::new(DEFAULT_COVERAGE_PERCENT)
    }
}

impl CoverageResolver {
    pub fn new(fallback_percent: u8) -> Self {
        let fallback_percent = if fallback_percent <= 100 {
            fallback_percent
        } else {
            DEFAULT_COVERAGE_PERCENT
        };
        Self { fallback_percent }
    }

    pub fn resolve_coverage(
        &self,
        policy: &BenefitPolicy,
        service: &MedicalService,
    ) -> CoverageResult {
        let service_rule = policy
            .active_rules()
            .find(|rule| rule.target == RuleTarget::Service(service.id.clone()));
        if let Some(rule) = service_rule {
            return self.from_rule(policy, rule, CoverageMatch::Service);
        }

        let category_rule = policy
            .active_rules()
            .find(|rule| rule.target == RuleTarget::Category(service.category_id.clone()));
        match category_rule {
            Some(rule) => self.from_rule(policy, rule, CoverageMatch::Category),
            None => CoverageResult::not_covered(),
        }
    }

    fn from_rule(
        &self,
        policy: &BenefitPolicy,
        rule: &BenefitPolicyRule,
        matched: CoverageMatch,
    ) -> CoverageResult {
        let coverage_percent = rule
            .coverage_percent
            .or(policy.default_coverage_percent)
            .unwrap_or(self.fallback_percent);

        CoverageResult {
            covered: true,
            coverage_percent,
            amount_limit: rule.amount_limit,
            times_limit: rule.times_limit,
            requires_pre_approval: rule.requires_pre_approval,
            waiting_period_days: rule.waiting_period_days,
            matched: Some(matched),
        }
    }
}

/// True when the policy is ACTIVE and `date` falls inside its period, both ends inclusive.
pub fn is_effective_on(policy: &BenefitPolicy, date: NaiveDate) -> bool {
    policy.status == PolicyStatus::Active && policy.covers_date(date)
}

/// First ACTIVE or SUSPENDED policy among `candidates` intersecting `[start, end]`.
///
/// `candidates` are the employer's policies; `exclude` skips the policy being changed.
pub fn find_overlap<'a, I>(
    candidates: I,
    start: NaiveDate,
    end: NaiveDate,
    exclude: Option<&BenefitPolicyId>,
) -> Option<&'a BenefitPolicy>
where
    I: IntoIterator<Item = &'a BenefitPolicy>,
{
    candidates.into_iter().find(|policy| {
        Some(&policy.id) != exclude && policy.status.holds_period() && policy.overlaps(start, end)
    })
}

pub fn has_overlap<'a, I>(
    candidates: I,
    start: NaiveDate,
    end: NaiveDate,
    exclude: Option<&BenefitPolicyId>,
) -> bool
where
    I: IntoIterator<Item = &'a BenefitPolicy>,
{
    find_overlap(candidates, start, end, exclude).is_some()
}
