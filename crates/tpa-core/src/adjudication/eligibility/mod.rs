//! Ordered eligibility rule pipeline.
//!
//! Rules are registered once, sorted by priority (registration order breaks ties), and
//! evaluated against an [`EligibilityContext`]. A failing hard rule stops the pipeline; a
//! failing soft rule is recorded and evaluation continues.

mod context;
mod rules;

pub use context::{EligibilityContext, Requester};
pub use rules::{
    EmployerActiveRule, EmployerMatchRule, MemberActiveRule, MemberCoveragePeriodRule,
    PolicyActiveRule, PreApprovalRequiredRule, ProviderActiveRule, ProviderNetworkRule,
    ServiceCoveredRule, ServiceDateInPolicyPeriodRule, WaitingPeriodRule,
};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::coverage::CoverageResolver;

/// Machine-readable cause of a failed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    EmployerInactive,
    MemberSuspended,
    MemberTerminated,
    MemberInactive,
    PolicyNotActive,
    ServiceDateOutsidePolicyPeriod,
    PolicyEmployerMismatch,
    ServiceDateOutsideMemberCoverage,
    ServiceNotCovered,
    WaitingPeriodNotMet,
    ProviderInactive,
    ProviderOutOfNetwork,
    PreApprovalRequired,
}

impl ReasonCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReasonCode::EmployerInactive => "EMPLOYER_INACTIVE",
            ReasonCode::MemberSuspended => "MEMBER_SUSPENDED",
            ReasonCode::MemberTerminated => "MEMBER_TERMINATED",
            ReasonCode::MemberInactive => "MEMBER_INACTIVE",
            ReasonCode::PolicyNotActive => "POLICY_NOT_ACTIVE",
            ReasonCode::ServiceDateOutsidePolicyPeriod => "SERVICE_DATE_OUTSIDE_POLICY_PERIOD",
            ReasonCode::PolicyEmployerMismatch => "POLICY_EMPLOYER_MISMATCH",
            ReasonCode::ServiceDateOutsideMemberCoverage => "SERVICE_DATE_OUTSIDE_MEMBER_COVERAGE",
            ReasonCode::ServiceNotCovered => "SERVICE_NOT_COVERED",
            ReasonCode::WaitingPeriodNotMet => "WAITING_PERIOD_NOT_MET",
            ReasonCode::ProviderInactive => "PROVIDER_INACTIVE",
            ReasonCode::ProviderOutOfNetwork => "PROVIDER_OUT_OF_NETWORK",
            ReasonCode::PreApprovalRequired => "PRE_APPROVAL_REQUIRED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub rule_code: String,
    pub passed: bool,
    pub hard_rule: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub message: String,
}

impl RuleResult {
    pub fn pass(rule: &dyn EligibilityRule, message: impl Into<String>) -> Self {
        Self {
            rule_code: rule.code().to_string(),
            passed: true,
            hard_rule: rule.is_hard_rule(),
            reason: None,
            message: message.into(),
        }
    }

    pub fn fail(rule: &dyn EligibilityRule, reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            rule_code: rule.code().to_string(),
            passed: false,
            hard_rule: rule.is_hard_rule(),
            reason: Some(reason),
            message: message.into(),
        }
    }
}

/// One evaluable business condition. Implementations are stateless.
pub trait EligibilityRule: Send + Sync {
    fn code(&self) -> &'static str;

    /// Lower values run first.
    fn priority(&self) -> u16;

    fn is_hard_rule(&self) -> bool {
        true
    }

    fn is_applicable(&self, context: &EligibilityContext) -> bool;

    fn evaluate(&self, context: &EligibilityContext) -> RuleResult;
}

/// Aggregate outcome of an eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub request_id: String,
    pub eligible: bool,
    pub results: Vec<RuleResult>,
    pub primary_reason: Option<ReasonCode>,
    pub checked_at: DateTime<Utc>,
}

impl EligibilityDecision {
    /// Human-readable messages of every failed rule, hard and soft, in evaluation order.
    pub fn reasons(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| !result.passed)
            .map(|result| result.message.clone())
            .collect()
    }

    pub fn soft_failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results
            .iter()
            .filter(|result| !result.passed && !result.hard_rule)
    }

    pub fn primary_failure(&self) -> Option<&RuleResult> {
        self.results
            .iter()
            .find(|result| !result.passed && result.hard_rule)
    }

    pub fn summary(&self) -> String {
        match self.primary_failure() {
            Some(failure) => format!("not eligible: {}", failure.message),
            None if self.soft_failures().next().is_some() => {
                "eligible with advisories".to_string()
            }
            None => "eligible".to_string(),
        }
    }
}

/// Evaluates the registered rules in priority order.
pub struct EligibilityEngine {
    rules: Vec<Arc<dyn EligibilityRule>>,
}

impl EligibilityEngine {
    /// Register `rules`; the order of equal-priority rules is preserved.
    pub fn new(rules: Vec<Arc<dyn EligibilityRule>>) -> Self {
        let mut rules = rules;
        rules.sort_by_key(|rule| rule.priority());
        Self { rules }
    }

    /// Engine with the standard rule catalogue.
    pub fn standard(resolver: CoverageResolver) -> Self {
        let rules: Vec<Arc<dyn EligibilityRule>> = vec![
            Arc::new(EmployerActiveRule),
            Arc::new(MemberActiveRule),
            Arc::new(PolicyActiveRule),
            Arc::new(ServiceDateInPolicyPeriodRule),
            Arc::new(EmployerMatchRule),
            Arc::new(MemberCoveragePeriodRule),
            Arc::new(ServiceCoveredRule::new(resolver)),
            Arc::new(WaitingPeriodRule::new(resolver)),
            Arc::new(ProviderActiveRule),
            Arc::new(ProviderNetworkRule),
            Arc::new(PreApprovalRequiredRule::new(resolver)),
        ];
        Self::new(rules)
    }

    /// Rule codes in evaluation order.
    pub fn rule_codes(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.code()).collect()
    }

    pub fn evaluate(&self, context: &EligibilityContext) -> EligibilityDecision {
        let mut results = Vec::new();
        let mut halted = false;
        let mut primary_reason = None;

        for rule in self.rules.iter().filter(|rule| rule.is_applicable(context)) {
            let result = rule.evaluate(context);
            debug!(
                request_id = %context.request_id,
                rule = rule.code(),
                passed = result.passed,
                "eligibility rule evaluated"
            );

            halted = !result.passed && rule.is_hard_rule();
            if halted {
                primary_reason = result.reason;
            }
            results.push(result);
            if halted {
                break;
            }
        }

        EligibilityDecision {
            request_id: context.request_id.clone(),
            eligible: !halted,
            results,
            primary_reason,
            checked_at: context.checked_at,
        }
    }
}
