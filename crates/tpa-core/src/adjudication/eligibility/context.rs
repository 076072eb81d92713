use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::adjudication::access::{Actor, Role};
use crate::adjudication::domain::{
    BenefitPolicy, BenefitPolicyId, Employer, MedicalService, Member, MemberId, Provider,
    ProviderId, UserId,
};

/// Who asked for the eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: Option<UserId>,
    pub username: String,
    /// Roles the caller acts under.
    pub roles: BTreeSet<Role>,
    pub super_admin: bool,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            username: "anonymous".to_string(),
            roles: BTreeSet::new(),
            super_admin: false,
        }
    }
}

impl From<&Actor> for Requester {
    fn from(actor: &Actor) -> Self {
        Self {
            user_id: actor.user_id.clone(),
            username: actor.username.clone(),
            roles: actor.roles.clone(),
            super_admin: actor.super_admin,
        }
    }
}

/// Snapshot of every record one eligibility check needs, resolved up front.
///
/// Built once by the caller and only ever lent to rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibilityContext {
    pub request_id: String,
    pub member_id: MemberId,
    pub benefit_policy_id: BenefitPolicyId,
    pub provider_id: Option<ProviderId>,
    pub service_date: NaiveDate,
    pub service_code: Option<String>,
    pub member: Option<Member>,
    pub benefit_policy: Option<BenefitPolicy>,
    pub provider: Option<Provider>,
    pub employer: Option<Employer>,
    pub service: Option<MedicalService>,
    pub requester: Requester,
    pub checked_at: DateTime<Utc>,
}

impl EligibilityContext {
    pub fn has_member(&self) -> bool {
        self.member.is_some()
    }

    pub fn has_policy(&self) -> bool {
        self.benefit_policy.is_some()
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn has_employer(&self) -> bool {
        self.employer.is_some()
    }

    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }
}
