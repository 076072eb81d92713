use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use axum::response::Response;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::adjudication::access::{roles, Actor};
use crate::adjudication::audit::ClaimAuditLog;
use crate::adjudication::claims::Claim;
use crate::adjudication::coverage::CoverageResolver;
use crate::adjudication::domain::{
    BenefitPolicyId, ClaimId, Employer, EmployerId, MedicalCategory, MedicalCategoryId,
    MedicalService, MedicalServiceId, Member, MemberId, MemberStatus, PreAuthorizationId,
    Provider, ProviderId, UserId,
};
use crate::adjudication::memory::{
    InMemoryAuditLog, InMemoryClaimRepository, InMemoryPolicyRepository,
    InMemoryPreAuthorizationRepository, InMemoryRecords, InMemoryStore,
};
use crate::adjudication::policies::{NewBenefitPolicy, NewPolicyRule, PolicyService};
use crate::adjudication::preauth::{PreAuthStatus, PreAuthorization};
use crate::adjudication::repository::{
    AuditLogRepository, ClaimRepository, PreAuthorizationRepository, RecordLookup,
    RepositoryError,
};
use crate::adjudication::service::{AdjudicationService, EligibilityRequest, NewClaim};
use crate::adjudication::{adjudication_router, AdjudicationApi, InMemoryAdjudicationService};

pub(super) const EMPLOYER: &str = "EMP-ACME";
pub(super) const ACTIVE_MEMBER: &str = "MEM-ACTIVE";
pub(super) const SUSPENDED_MEMBER: &str = "MEM-SUSPENDED";
pub(super) const NEW_MEMBER: &str = "MEM-NEW";
pub(super) const NETWORK_PROVIDER: &str = "PRV-NETWORK";
pub(super) const OUTSIDE_PROVIDER: &str = "PRV-OUTSIDE";
pub(super) const LAB_SERVICE: &str = "LAB-CBC";
pub(super) const MRI_SERVICE: &str = "IMG-MRI";
pub(super) const DENTAL_SERVICE: &str = "DEN-CLEAN";
pub(super) const SUPER_ADMIN_ROLE: &str = "SUPER_ADMIN";

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn service_date() -> NaiveDate {
    date(2025, 3, 10)
}

pub(super) fn reviewer() -> Actor {
    Actor::user(UserId::new("u-rev"), "rita.reviewer", [roles::REVIEWER])
}

pub(super) fn insurance_admin() -> Actor {
    Actor::user(UserId::new("u-ins"), "ian.insurer", [roles::INSURANCE_ADMIN])
}

pub(super) fn employer_admin() -> Actor {
    Actor::user(UserId::new("u-emp"), "erin.employer", [roles::EMPLOYER_ADMIN])
}

pub(super) fn finance() -> Actor {
    Actor::user(UserId::new("u-fin"), "fred.finance", [roles::FINANCE])
}

pub(super) fn super_admin() -> Actor {
    Actor::user(UserId::new("u-root"), "sam.root", Vec::<String>::new()).with_super_admin(true)
}

pub(super) fn seed_records(records: &InMemoryRecords) {
    records
        .put_employer(Employer {
            id: EmployerId::new(EMPLOYER),
            name: "Acme Logistics".to_string(),
            active: true,
        })
        .expect("seed employer");

    let members = [
        (ACTIVE_MEMBER, MemberStatus::Active, date(2024, 1, 1)),
        (SUSPENDED_MEMBER, MemberStatus::Suspended, date(2024, 1, 1)),
        (NEW_MEMBER, MemberStatus::Active, date(2025, 3, 1)),
    ];
    for (id, status, enrolled) in members {
        records
            .put_member(Member {
                id: MemberId::new(id),
                employer_id: EmployerId::new(EMPLOYER),
                full_name: format!("Member {id}"),
                status: Some(status),
                enrollment_date: enrolled,
                coverage_end: None,
            })
            .expect("seed member");
    }

    for id in [NETWORK_PROVIDER, OUTSIDE_PROVIDER] {
        records
            .put_provider(Provider {
                id: ProviderId::new(id),
                name: format!("Provider {id}"),
                active: true,
            })
            .expect("seed provider");
    }

    for (id, code) in [("CAT-LAB", "LAB"), ("CAT-IMG", "IMG"), ("CAT-DEN", "DEN")] {
        records
            .put_category(MedicalCategory {
                id: MedicalCategoryId::new(id),
                code: code.to_string(),
                name: code.to_string(),
            })
            .expect("seed category");
    }

    let services = [
        ("SVC-CBC", LAB_SERVICE, "CAT-LAB"),
        ("SVC-MRI", MRI_SERVICE, "CAT-IMG"),
        ("SVC-DEN", DENTAL_SERVICE, "CAT-DEN"),
    ];
    for (id, code, category) in services {
        records
            .put_service(MedicalService {
                id: MedicalServiceId::new(id),
                code: code.to_string(),
                name: code.to_string(),
                category_id: MedicalCategoryId::new(category),
            })
            .expect("seed service");
    }
}

pub(super) fn policy_request(start: NaiveDate, end: NaiveDate) -> NewBenefitPolicy {
    NewBenefitPolicy {
        code: "ACME-2025".to_string(),
        name: "Acme staff plan".to_string(),
        employer_id: EmployerId::new(EMPLOYER),
        insurer_id: Some("INS-1".to_string()),
        start_date: start,
        end_date: end,
        annual_limit: dec!(100000),
        default_coverage_percent: Some(80),
        per_member_limit: None,
        per_family_limit: None,
        network_provider_ids: BTreeSet::from([ProviderId::new(NETWORK_PROVIDER)]),
    }
}

/// Active 2025 policy: LAB covered at the policy default, MRI at 60% capped at 1000 with
/// pre-approval and a 30 day waiting period, dental not covered.
pub(super) fn seed_policy(policies: &PolicyService<InMemoryPolicyRepository>) -> BenefitPolicyId {
    let policy = policies
        .create(policy_request(date(2025, 1, 1), date(2025, 12, 31)))
        .expect("policy drafted");
    policies
        .add_rule(
            &policy.id,
            NewPolicyRule {
                category_id: Some(MedicalCategoryId::new("CAT-LAB")),
                ..NewPolicyRule::default()
            },
        )
        .expect("lab rule");
    policies
        .add_rule(
            &policy.id,
            NewPolicyRule {
                service_id: Some(MedicalServiceId::new("SVC-MRI")),
                coverage_percent: Some(60),
                amount_limit: Some(dec!(1000)),
                waiting_period_days: Some(30),
                requires_pre_approval: true,
                ..NewPolicyRule::default()
            },
        )
        .expect("mri rule");
    policies.activate(&policy.id).expect("policy activated");
    policy.id
}

pub(super) struct Fixture {
    pub(super) store: InMemoryStore,
    pub(super) service: Arc<InMemoryAdjudicationService>,
    pub(super) policy_id: BenefitPolicyId,
}

pub(super) fn fixture() -> Fixture {
    let store = InMemoryStore::default();
    seed_records(&store.records);
    let service = Arc::new(store.service(CoverageResolver::default()));
    let policy_id = seed_policy(service.policies());
    Fixture {
        store,
        service,
        policy_id,
    }
}

impl Fixture {
    pub(super) fn router(&self) -> axum::Router {
        adjudication_router(Arc::new(AdjudicationApi::new(
            self.service.clone(),
            SUPER_ADMIN_ROLE,
        )))
    }

    pub(super) fn audit_rows(&self) -> usize {
        self.store.audit.len()
    }
}

pub(super) fn eligibility_request(
    member: &str,
    policy: &BenefitPolicyId,
    service_code: Option<&str>,
) -> EligibilityRequest {
    EligibilityRequest {
        member_id: MemberId::new(member),
        benefit_policy_id: policy.clone(),
        provider_id: None,
        service_date: service_date(),
        service_code: service_code.map(str::to_string),
    }
}

pub(super) fn new_claim(policy: &BenefitPolicyId, service_code: &str, amount: Decimal) -> NewClaim {
    NewClaim {
        member_id: MemberId::new(ACTIVE_MEMBER),
        benefit_policy_id: policy.clone(),
        provider_id: Some(ProviderId::new(NETWORK_PROVIDER)),
        service_code: Some(service_code.to_string()),
        pre_authorization_id: None,
        service_date: service_date(),
        requested_amount: amount,
        diagnosis_code: Some("R50.9".to_string()),
        diagnosis_description: None,
        attachments_count: 1,
    }
}

type AuditHook = Box<dyn FnOnce() + Send>;

/// Audit log that accepts writes until `fail_from_now` is called.
#[derive(Default, Clone)]
pub(super) struct FlakyAuditLog {
    pub(super) inner: InMemoryAuditLog,
    failing: Arc<AtomicBool>,
    on_failure: Arc<Mutex<Option<AuditHook>>>,
}

impl FlakyAuditLog {
    pub(super) fn failing() -> Self {
        let log = Self::default();
        log.fail_from_now();
        log
    }

    pub(super) fn fail_from_now(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Run `hook` inside the next failing write, before the error is returned.
    pub(super) fn before_next_failure(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_failure.lock().expect("hook slot") = Some(Box::new(hook));
    }
}

impl AuditLogRepository for FlakyAuditLog {
    fn append(&self, entry: ClaimAuditLog) -> Result<ClaimAuditLog, RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            let hook = self.on_failure.lock().expect("hook slot").take();
            if let Some(hook) = hook {
                hook();
            }
            return Err(RepositoryError::Unavailable("audit store offline".to_string()));
        }
        self.inner.append(entry)
    }

    fn for_claim(&self, claim: &ClaimId) -> Result<Vec<ClaimAuditLog>, RepositoryError> {
        self.inner.for_claim(claim)
    }
}

pub(super) type FlakyAuditService = AdjudicationService<
    InMemoryRecords,
    InMemoryPolicyRepository,
    InMemoryClaimRepository,
    InMemoryPreAuthorizationRepository,
    FlakyAuditLog,
>;

pub(super) fn flaky_audit_service(
    audit: FlakyAuditLog,
) -> (FlakyAuditService, InMemoryClaimRepository, BenefitPolicyId) {
    let store = InMemoryStore::default();
    seed_records(&store.records);
    let service = AdjudicationService::new(
        Arc::new(store.records.clone()),
        Arc::new(store.policies.clone()),
        Arc::new(store.claims.clone()),
        Arc::new(store.pre_auths.clone()),
        Arc::new(audit),
        CoverageResolver::default(),
    );
    let policy_id = seed_policy(service.policies());
    (service, store.claims, policy_id)
}

/// Pre-authorization store whose first `parties` reads wait for each other, so that
/// concurrent transitions all start from the same version.
pub(super) struct ContendedPreAuths {
    inner: InMemoryPreAuthorizationRepository,
    barrier: Barrier,
    parties: usize,
    reads: AtomicUsize,
}

impl ContendedPreAuths {
    pub(super) fn new(parties: usize) -> Self {
        Self {
            inner: InMemoryPreAuthorizationRepository::default(),
            barrier: Barrier::new(parties),
            parties,
            reads: AtomicUsize::new(0),
        }
    }
}

impl PreAuthorizationRepository for ContendedPreAuths {
    fn insert(&self, pre_auth: PreAuthorization) -> Result<PreAuthorization, RepositoryError> {
        self.inner.insert(pre_auth)
    }

    fn fetch(&self, id: &PreAuthorizationId) -> Result<Option<PreAuthorization>, RepositoryError> {
        let found = self.inner.fetch(id)?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait();
        }
        Ok(found)
    }

    fn update(
        &self,
        pre_auth: PreAuthorization,
        expected_version: u64,
    ) -> Result<PreAuthorization, RepositoryError> {
        self.inner.update(pre_auth, expected_version)
    }

    fn with_status(&self, status: PreAuthStatus) -> Result<Vec<PreAuthorization>, RepositoryError> {
        self.inner.with_status(status)
    }
}

/// Claim store that, once armed, makes its next `parties` reads wait for each other, so
/// that concurrent transitions all start from the same version.
pub(super) struct ContendedClaims {
    inner: InMemoryClaimRepository,
    barrier: Barrier,
    parties: usize,
    armed: AtomicBool,
    reads: AtomicUsize,
}

impl ContendedClaims {
    pub(super) fn new(parties: usize) -> Self {
        Self {
            inner: InMemoryClaimRepository::default(),
            barrier: Barrier::new(parties),
            parties,
            armed: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    pub(super) fn arm(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl ClaimRepository for ContendedClaims {
    fn insert(&self, claim: Claim) -> Result<Claim, RepositoryError> {
        self.inner.insert(claim)
    }

    fn fetch(&self, id: &ClaimId) -> Result<Option<Claim>, RepositoryError> {
        let found = self.inner.fetch(id)?;
        if self.armed.load(Ordering::SeqCst)
            && self.reads.fetch_add(1, Ordering::SeqCst) < self.parties
        {
            self.barrier.wait();
        }
        Ok(found)
    }

    fn update(&self, claim: Claim, expected_version: u64) -> Result<Claim, RepositoryError> {
        self.inner.update(claim, expected_version)
    }

    fn remove(&self, id: &ClaimId) -> Result<(), RepositoryError> {
        self.inner.remove(id)
    }
}

/// Lookup collaborator that is always down.
pub(super) struct UnavailableRecords;

impl RecordLookup for UnavailableRecords {
    fn member(&self, _id: &MemberId) -> Result<Option<Member>, RepositoryError> {
        Err(RepositoryError::Unavailable("member registry offline".to_string()))
    }

    fn employer(&self, _id: &EmployerId) -> Result<Option<Employer>, RepositoryError> {
        Err(RepositoryError::Unavailable("member registry offline".to_string()))
    }

    fn provider(&self, _id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        Err(RepositoryError::Unavailable("provider registry offline".to_string()))
    }

    fn service(&self, _id: &MedicalServiceId) -> Result<Option<MedicalService>, RepositoryError> {
        Err(RepositoryError::Unavailable("catalogue offline".to_string()))
    }

    fn service_by_code(&self, _code: &str) -> Result<Option<MedicalService>, RepositoryError> {
        Err(RepositoryError::Unavailable("catalogue offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
