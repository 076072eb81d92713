//! In-memory collaborators used by the API service, the demo, and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::audit::ClaimAuditLog;
use super::claims::Claim;
use super::coverage::CoverageResolver;
use super::domain::{
    BenefitPolicy, BenefitPolicyId, ClaimId, Employer, EmployerId, MedicalCategory,
    MedicalService, MedicalServiceId, Member, MemberId, PolicyStatus, PreAuthorizationId,
    Provider, ProviderId,
};
use super::preauth::{PreAuthStatus, PreAuthorization};
use super::repository::{
    AuditLogRepository, BenefitPolicyRepository, ClaimRepository, PreAuthorizationRepository,
    RecordLookup, RepositoryError,
};
use super::service::AdjudicationService;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("in-memory store mutex poisoned".to_string()))
}

#[derive(Default)]
struct Registry {
    employers: HashMap<EmployerId, Employer>,
    members: HashMap<MemberId, Member>,
    providers: HashMap<ProviderId, Provider>,
    categories: Vec<MedicalCategory>,
    services: HashMap<MedicalServiceId, MedicalService>,
}

/// Member, employer, provider, and medical catalogue registry.
#[derive(Default, Clone)]
pub struct InMemoryRecords {
    registry: Arc<Mutex<Registry>>,
}

impl InMemoryRecords {
    pub fn put_employer(&self, employer: Employer) -> Result<(), RepositoryError> {
        lock(&self.registry)?
            .employers
            .insert(employer.id.clone(), employer);
        Ok(())
    }

    pub fn put_member(&self, member: Member) -> Result<(), RepositoryError> {
        lock(&self.registry)?.members.insert(member.id.clone(), member);
        Ok(())
    }

    pub fn put_provider(&self, provider: Provider) -> Result<(), RepositoryError> {
        lock(&self.registry)?
            .providers
            .insert(provider.id.clone(), provider);
        Ok(())
    }

    pub fn put_category(&self, category: MedicalCategory) -> Result<(), RepositoryError> {
        let mut registry = lock(&self.registry)?;
        registry.categories.retain(|known| known.id != category.id);
        registry.categories.push(category);
        Ok(())
    }

    pub fn put_service(&self, service: MedicalService) -> Result<(), RepositoryError> {
        lock(&self.registry)?
            .services
            .insert(service.id.clone(), service);
        Ok(())
    }

    pub fn categories(&self) -> Result<Vec<MedicalCategory>, RepositoryError> {
        Ok(lock(&self.registry)?.categories.clone())
    }
}

impl RecordLookup for InMemoryRecords {
    fn member(&self, id: &MemberId) -> Result<Option<Member>, RepositoryError> {
        Ok(lock(&self.registry)?.members.get(id).cloned())
    }

    fn employer(&self, id: &EmployerId) -> Result<Option<Employer>, RepositoryError> {
        Ok(lock(&self.registry)?.employers.get(id).cloned())
    }

    fn provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        Ok(lock(&self.registry)?.providers.get(id).cloned())
    }

    fn service(&self, id: &MedicalServiceId) -> Result<Option<MedicalService>, RepositoryError> {
        Ok(lock(&self.registry)?.services.get(id).cloned())
    }

    fn service_by_code(&self, code: &str) -> Result<Option<MedicalService>, RepositoryError> {
        Ok(lock(&self.registry)?
            .services
            .values()
            .find(|service| service.code.eq_ignore_ascii_case(code))
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPolicyRepository {
    policies: Arc<Mutex<HashMap<BenefitPolicyId, BenefitPolicy>>>,
}

impl BenefitPolicyRepository for InMemoryPolicyRepository {
    fn insert(&self, policy: BenefitPolicy) -> Result<BenefitPolicy, RepositoryError> {
        let mut guard = lock(&self.policies)?;
        if guard.contains_key(&policy.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    fn update(&self, policy: BenefitPolicy) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.policies)?;
        match guard.get_mut(&policy.id) {
            Some(slot) => {
                *slot = policy;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &BenefitPolicyId) -> Result<Option<BenefitPolicy>, RepositoryError> {
        Ok(lock(&self.policies)?.get(id).cloned())
    }

    fn for_employer(&self, employer: &EmployerId) -> Result<Vec<BenefitPolicy>, RepositoryError> {
        let mut policies: Vec<BenefitPolicy> = lock(&self.policies)?
            .values()
            .filter(|policy| &policy.employer_id == employer)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }

    fn with_status(&self, status: PolicyStatus) -> Result<Vec<BenefitPolicy>, RepositoryError> {
        let mut policies: Vec<BenefitPolicy> = lock(&self.policies)?
            .values()
            .filter(|policy| policy.status == status)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryClaimRepository {
    claims: Arc<Mutex<HashMap<ClaimId, Claim>>>,
}

impl ClaimRepository for InMemoryClaimRepository {
    fn insert(&self, claim: Claim) -> Result<Claim, RepositoryError> {
        let mut guard = lock(&self.claims)?;
        if guard.contains_key(&claim.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(claim.id.clone(), claim.clone());
        Ok(claim)
    }

    fn fetch(&self, id: &ClaimId) -> Result<Option<Claim>, RepositoryError> {
        Ok(lock(&self.claims)?.get(id).cloned())
    }

    fn update(&self, mut claim: Claim, expected_version: u64) -> Result<Claim, RepositoryError> {
        let mut guard = lock(&self.claims)?;
        let slot = guard.get_mut(&claim.id).ok_or(RepositoryError::NotFound)?;
        if slot.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                actual: slot.version,
            });
        }
        claim.version = expected_version + 1;
        *slot = claim.clone();
        Ok(claim)
    }

    fn remove(&self, id: &ClaimId) -> Result<(), RepositoryError> {
        lock(&self.claims)?
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPreAuthorizationRepository {
    pre_auths: Arc<Mutex<HashMap<PreAuthorizationId, PreAuthorization>>>,
}

impl PreAuthorizationRepository for InMemoryPreAuthorizationRepository {
    fn insert(&self, pre_auth: PreAuthorization) -> Result<PreAuthorization, RepositoryError> {
        let mut guard = lock(&self.pre_auths)?;
        if guard.contains_key(&pre_auth.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(pre_auth.id.clone(), pre_auth.clone());
        Ok(pre_auth)
    }

    fn fetch(&self, id: &PreAuthorizationId) -> Result<Option<PreAuthorization>, RepositoryError> {
        Ok(lock(&self.pre_auths)?.get(id).cloned())
    }

    fn update(
        &self,
        mut pre_auth: PreAuthorization,
        expected_version: u64,
    ) -> Result<PreAuthorization, RepositoryError> {
        let mut guard = lock(&self.pre_auths)?;
        let slot = guard
            .get_mut(&pre_auth.id)
            .ok_or(RepositoryError::NotFound)?;
        if slot.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                actual: slot.version,
            });
        }
        pre_auth.version = expected_version + 1;
        *slot = pre_auth.clone();
        Ok(pre_auth)
    }

    fn with_status(&self, status: PreAuthStatus) -> Result<Vec<PreAuthorization>, RepositoryError> {
        let mut matching: Vec<PreAuthorization> = lock(&self.pre_auths)?
            .values()
            .filter(|pre_auth| pre_auth.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}

/// Append-only vector; insertion order is the append order.
#[derive(Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<ClaimAuditLog>>>,
}

impl InMemoryAuditLog {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLogRepository for InMemoryAuditLog {
    fn append(&self, entry: ClaimAuditLog) -> Result<ClaimAuditLog, RepositoryError> {
        lock(&self.entries)?.push(entry.clone());
        Ok(entry)
    }

    fn for_claim(&self, claim: &ClaimId) -> Result<Vec<ClaimAuditLog>, RepositoryError> {
        Ok(lock(&self.entries)?
            .iter()
            .filter(|entry| &entry.claim_id == claim)
            .cloned()
            .collect())
    }
}

/// Service wired to the in-memory collaborators.
pub type InMemoryAdjudicationService = AdjudicationService<
    InMemoryRecords,
    InMemoryPolicyRepository,
    InMemoryClaimRepository,
    InMemoryPreAuthorizationRepository,
    InMemoryAuditLog,
>;

/// Handles onto every in-memory collaborator, shared with the service built from them.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    pub records: InMemoryRecords,
    pub policies: InMemoryPolicyRepository,
    pub claims: InMemoryClaimRepository,
    pub pre_auths: InMemoryPreAuthorizationRepository,
    pub audit: InMemoryAuditLog,
}

impl InMemoryStore {
    pub fn service(&self, resolver: CoverageResolver) -> InMemoryAdjudicationService {
        AdjudicationService::new(
            Arc::new(self.records.clone()),
            Arc::new(self.policies.clone()),
            Arc::new(self.claims.clone()),
            Arc::new(self.pre_auths.clone()),
            Arc::new(self.audit.clone()),
            resolver,
        )
    }
}
