use chrono::Days;

use super::{EligibilityContext, EligibilityRule, ReasonCode, RuleResult};
use crate::adjudication::coverage::CoverageResolver;
use crate::adjudication::domain::{MemberStatus, PolicyStatus};

pub struct EmployerActiveRule;

impl EligibilityRule for EmployerActiveRule {
    fn code(&self) -> &'static str {
        "EMPLOYER_ACTIVE"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_employer()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        match &context.employer {
            Some(employer) if employer.active => RuleResult::pass(self, "employer is active"),
            Some(employer) => RuleResult::fail(
                self,
                ReasonCode::EmployerInactive,
                format!("employer {} is not active", employer.name),
            ),
            None => RuleResult::pass(self, "no employer to check"),
        }
    }
}

/// Member must be ACTIVE; each other status maps to its own reason.
pub struct MemberActiveRule;

impl EligibilityRule for MemberActiveRule {
    fn code(&self) -> &'static str {
        "MEMBER_ACTIVE"
    }

    fn priority(&self) -> u16 {
        20
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_member()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        let status = context.member.as_ref().and_then(|member| member.status);
        match status {
            Some(MemberStatus::Active) => RuleResult::pass(self, "member is active"),
            Some(MemberStatus::Suspended) => {
                RuleResult::fail(self, ReasonCode::MemberSuspended, "member suspended")
            }
            Some(MemberStatus::Terminated) => {
                RuleResult::fail(self, ReasonCode::MemberTerminated, "member terminated")
            }
            Some(MemberStatus::Pending) | None => {
                RuleResult::fail(self, ReasonCode::MemberInactive, "member is not active")
            }
        }
    }
}

pub struct PolicyActiveRule;

impl EligibilityRule for PolicyActiveRule {
    fn code(&self) -> &'static str {
        "POLICY_ACTIVE"
    }

    fn priority(&self) -> u16 {
        30
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_policy()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        match &context.benefit_policy {
            Some(policy) if policy.status == PolicyStatus::Active => {
                RuleResult::pass(self, "benefit policy is active")
            }
            Some(policy) => RuleResult::fail(
                self,
                ReasonCode::PolicyNotActive,
                format!("benefit policy {} is {}", policy.code, policy.status),
            ),
            None => RuleResult::pass(self, "no policy to check"),
        }
    }
}

pub struct ServiceDateInPolicyPeriodRule;

impl EligibilityRule for ServiceDateInPolicyPeriodRule {
    fn code(&self) -> &'static str {
        "SERVICE_DATE_IN_POLICY_PERIOD"
    }

    fn priority(&self) -> u16 {
        40
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_policy()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        let Some(policy) = &context.benefit_policy else {
            return RuleResult::pass(self, "no policy to check");
        };
        if policy.covers_date(context.service_date) {
            RuleResult::pass(self, "service date within policy period")
        } else {
            RuleResult::fail(
                self,
                ReasonCode::ServiceDateOutsidePolicyPeriod,
                format!(
                    "service date {} is outside policy period {} to {}",
                    context.service_date, policy.start_date, policy.end_date
                ),
            )
        }
    }
}

/// The policy must belong to the member's own employer.
pub struct EmployerMatchRule;

impl EligibilityRule for EmployerMatchRule {
    fn code(&self) -> &'static str {
        "EMPLOYER_MATCH"
    }

    fn priority(&self) -> u16 {
        50
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_member() && context.has_policy()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        match (&context.member, &context.benefit_policy) {
            (Some(member), Some(policy)) if member.employer_id != policy.employer_id => {
                RuleResult::fail(
                    self,
                    ReasonCode::PolicyEmployerMismatch,
                    "benefit policy belongs to a different employer than the member",
                )
            }
            _ => RuleResult::pass(self, "member and policy share the employer"),
        }
    }
}

pub struct MemberCoveragePeriodRule;

impl EligibilityRule for MemberCoveragePeriodRule {
    fn code(&self) -> &'static str {
        "MEMBER_COVERAGE_PERIOD"
    }

    fn priority(&self) -> u16 {
        55
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_member()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        let Some(member) = &context.member else {
            return RuleResult::pass(self, "no member to check");
        };
        let date = context.service_date;
        let before_enrollment = date < member.enrollment_date;
        let after_coverage = member.coverage_end.map(|end| date > end).unwrap_or(false);

        if before_enrollment || after_coverage {
            RuleResult::fail(
                self,
                ReasonCode::ServiceDateOutsideMemberCoverage,
                format!("service date {date} is outside the member's enrollment"),
            )
        } else {
            RuleResult::pass(self, "service date within member enrollment")
        }
    }
}

pub struct ServiceCoveredRule {
    resolver: CoverageResolver,
}

impl ServiceCoveredRule {
    pub fn new(resolver: CoverageResolver) -> Self {
        Self { resolver }
    }
}

impl EligibilityRule for ServiceCoveredRule {
    fn code(&self) -> &'static str {
        "SERVICE_COVERED"
    }

    fn priority(&self) -> u16 {
        60
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_policy() && context.has_service()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        let (Some(policy), Some(service)) = (&context.benefit_policy, &context.service) else {
            return RuleResult::pass(self, "no service to check");
        };
        let coverage = self.resolver.resolve_coverage(policy, service);
        if coverage.covered {
            RuleResult::pass(
                self,
                format!("service {} covered at {}%", service.code, coverage.coverage_percent),
            )
        } else {
            RuleResult::fail(
                self,
                ReasonCode::ServiceNotCovered,
                format!("service {} is not covered by policy {}", service.code, policy.code),
            )
        }
    }
}

/// Service date must fall after the member's enrollment plus the rule's waiting period.
pub struct WaitingPeriodRule {
    resolver: CoverageResolver,
}

impl WaitingPeriodRule {
    pub fn new(resolver: CoverageResolver) -> Self {
        Self { resolver }
    }
}

impl EligibilityRule for WaitingPeriodRule {
    fn code(&self) -> &'static str {
        "WAITING_PERIOD"
    }

    fn priority(&self) -> u16 {
        70
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_member() && context.has_policy() && context.has_service()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        let (Some(member), Some(policy), Some(service)) =
            (&context.member, &context.benefit_policy, &context.service)
        else {
            return RuleResult::pass(self, "nothing to check");
        };
        let coverage = self.resolver.resolve_coverage(policy, service);
        if coverage.waiting_period_days == 0 {
            return RuleResult::pass(self, "no waiting period");
        }

        let days = coverage.waiting_period_days;
        match member
            .enrollment_date
            .checked_add_days(Days::new(u64::from(days)))
        {
            Some(eligible_from) if context.service_date >= eligible_from => {
                RuleResult::pass(self, "waiting period satisfied")
            }
            Some(eligible_from) => RuleResult::fail(
                self,
                ReasonCode::WaitingPeriodNotMet,
                format!("waiting period of {days} days ends on {eligible_from}"),
            ),
            None => RuleResult::fail(
                self,
                ReasonCode::WaitingPeriodNotMet,
                format!("waiting period of {days} days never ends"),
            ),
        }
    }
}

pub struct ProviderActiveRule;

impl EligibilityRule for ProviderActiveRule {
    fn code(&self) -> &'static str {
        "PROVIDER_ACTIVE"
    }

    fn priority(&self) -> u16 {
        80
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_provider()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        match &context.provider {
            Some(provider) if !provider.active => RuleResult::fail(
                self,
                ReasonCode::ProviderInactive,
                format!("provider {} is not active", provider.name),
            ),
            _ => RuleResult::pass(self, "provider is active"),
        }
    }
}

/// Advisory: the provider is outside the policy's contracted network.
pub struct ProviderNetworkRule;

impl EligibilityRule for ProviderNetworkRule {
    fn code(&self) -> &'static str {
        "PROVIDER_NETWORK"
    }

    fn priority(&self) -> u16 {
        90
    }

    fn is_hard_rule(&self) -> bool {
        false
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_provider() && context.has_policy()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        match (&context.provider, &context.benefit_policy) {
            (Some(provider), Some(policy))
                if !policy.network_provider_ids.is_empty()
                    && !policy.network_provider_ids.contains(&provider.id) =>
            {
                RuleResult::fail(
                    self,
                    ReasonCode::ProviderOutOfNetwork,
                    format!("provider {} is outside the policy network", provider.name),
                )
            }
            _ => RuleResult::pass(self, "provider within network"),
        }
    }
}

/// Advisory: the service needs a pre-authorization before a claim is paid.
pub struct PreApprovalRequiredRule {
    resolver: CoverageResolver,
}

impl PreApprovalRequiredRule {
    pub fn new(resolver: CoverageResolver) -> Self {
        Self { resolver }
    }
}

impl EligibilityRule for PreApprovalRequiredRule {
    fn code(&self) -> &'static str {
        "PRE_APPROVAL_REQUIRED"
    }

    fn priority(&self) -> u16 {
        100
    }

    fn is_hard_rule(&self) -> bool {
        false
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool {
        context.has_policy() && context.has_service()
    }

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult {
        let (Some(policy), Some(service)) = (&context.benefit_policy, &context.service) else {
            return RuleResult::pass(self, "no service to check");
        };
        if self
            .resolver
            .resolve_coverage(policy, service)
            .requires_pre_approval
        {
            RuleResult::fail(
                self,
                ReasonCode::PreApprovalRequired,
                format!("service {} requires pre-approval", service.code),
            )
        } else {
            RuleResult::pass(self, "no pre-approval needed")
        }
    }
}
