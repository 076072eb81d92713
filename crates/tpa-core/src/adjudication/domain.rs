use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of a contracting employer (the policy holder).
    EmployerId
);
record_id!(MemberId);
record_id!(ProviderId);
record_id!(BenefitPolicyId);
record_id!(BenefitPolicyRuleId);
record_id!(MedicalCategoryId);
record_id!(MedicalServiceId);
record_id!(ClaimId);
record_id!(PreAuthorizationId);
record_id!(AuditLogId);
record_id!(UserId);

/// Employer record as returned by the lookup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employer {
    pub id: EmployerId,
    pub name: String,
    pub active: bool,
}

/// Enrollment status of an insured member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
}

/// Insured member. `status` is optional because imported records may not carry one yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub employer_id: EmployerId,
    pub full_name: String,
    pub status: Option<MemberStatus>,
    pub enrollment_date: NaiveDate,
    pub coverage_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalCategory {
    pub id: MedicalCategoryId,
    pub code: String,
    pub name: String,
}

/// Billable medical service; every service belongs to exactly one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalService {
    pub id: MedicalServiceId,
    pub code: String,
    pub name: String,
    pub category_id: MedicalCategoryId,
}

/// Lifecycle status of a benefit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Draft,
    Active,
    Expired,
    Suspended,
    Cancelled,
}

impl PolicyStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PolicyStatus::Draft => "DRAFT",
            PolicyStatus::Active => "ACTIVE",
            PolicyStatus::Expired => "EXPIRED",
            PolicyStatus::Suspended => "SUSPENDED",
            PolicyStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses that occupy the employer's coverage calendar for overlap purposes.
    pub const fn holds_period(self) -> bool {
        matches!(self, PolicyStatus::Active | PolicyStatus::Suspended)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, PolicyStatus::Expired | PolicyStatus::Cancelled)
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a benefit policy rule applies to. A rule targets a category or a service, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RuleTarget {
    Category(MedicalCategoryId),
    Service(MedicalServiceId),
}

impl RuleTarget {
    /// Build a target from the two optional references carried by write requests.
    pub fn from_parts(
        category: Option<MedicalCategoryId>,
        service: Option<MedicalServiceId>,
    ) -> Option<Self> {
        match (category, service) {
            (Some(category), None) => Some(RuleTarget::Category(category)),
            (None, Some(service)) => Some(RuleTarget::Service(service)),
            _ => None,
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTarget::Category(id) => write!(f, "category {id}"),
            RuleTarget::Service(id) => write!(f, "service {id}"),
        }
    }
}

/// Per-category or per-service coverage term inside a benefit policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitPolicyRule {
    pub id: BenefitPolicyRuleId,
    pub target: RuleTarget,
    pub coverage_percent: Option<u8>,
    pub amount_limit: Option<Decimal>,
    pub times_limit: Option<u32>,
    pub waiting_period_days: u32,
    pub requires_pre_approval: bool,
    pub active: bool,
}

/// Coverage contract between an employer and its members for a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitPolicy {
    pub id: BenefitPolicyId,
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
    pub status: PolicyStatus,
    pub rules: Vec<BenefitPolicyRule>,
    /// Contracted providers. An empty set means the policy has an open network.
    pub network_provider_ids: BTreeSet<ProviderId>,
    pub updated_at: DateTime<Utc>,
}

impl BenefitPolicy {
    pub fn active_rules(&self) -> impl Iterator<Item = &BenefitPolicyRule> {
        self.rules.iter().filter(|rule| rule.active)
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Inclusive range intersection; touching edges overlap.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}
