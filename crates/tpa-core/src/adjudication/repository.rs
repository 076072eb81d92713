use super::audit::ClaimAuditLog;
use super::claims::Claim;
use super::domain::{
    BenefitPolicy, BenefitPolicyId, ClaimId, Employer, EmployerId, MedicalService,
    MedicalServiceId, Member, MemberId, PolicyStatus, PreAuthorizationId, Provider, ProviderId,
};
use super::preauth::{PreAuthStatus, PreAuthorization};

/// Error enumeration for persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record version {expected} is stale (current {actual})")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("record could not be serialized: {0}")]
    Serialization(String),
}

/// Read-only access to the member, employer, provider, and service registries.
pub trait RecordLookup: Send + Sync {
    fn member(&self, id: &MemberId) -> Result<Option<Member>, RepositoryError>;
    fn employer(&self, id: &EmployerId) -> Result<Option<Employer>, RepositoryError>;
    fn provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError>;
    fn service(&self, id: &MedicalServiceId) -> Result<Option<MedicalService>, RepositoryError>;
    fn service_by_code(&self, code: &str) -> Result<Option<MedicalService>, RepositoryError>;
}

pub trait BenefitPolicyRepository: Send + Sync {
    fn insert(&self, policy: BenefitPolicy) -> Result<BenefitPolicy, RepositoryError>;
    fn update(&self, policy: BenefitPolicy) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &BenefitPolicyId) -> Result<Option<BenefitPolicy>, RepositoryError>;
    fn for_employer(&self, employer: &EmployerId) -> Result<Vec<BenefitPolicy>, RepositoryError>;
    fn with_status(&self, status: PolicyStatus) -> Result<Vec<BenefitPolicy>, RepositoryError>;
}

/// Claim storage with optimistic concurrency on `Claim::version`.
pub trait ClaimRepository: Send + Sync {
    fn insert(&self, claim: Claim) -> Result<Claim, RepositoryError>;
    fn fetch(&self, id: &ClaimId) -> Result<Option<Claim>, RepositoryError>;
    /// Store `claim` only if the stored version still equals `expected_version`.
    /// Returns the stored claim with its version bumped.
    fn update(&self, claim: Claim, expected_version: u64) -> Result<Claim, RepositoryError>;
    /// Drop a claim whose creation could not be audited.
    fn remove(&self, id: &ClaimId) -> Result<(), RepositoryError>;
}

pub trait PreAuthorizationRepository: Send + Sync {
    fn insert(&self, pre_auth: PreAuthorization) -> Result<PreAuthorization, RepositoryError>;
    fn fetch(&self, id: &PreAuthorizationId) -> Result<Option<PreAuthorization>, RepositoryError>;
    fn update(
        &self,
        pre_auth: PreAuthorization,
        expected_version: u64,
    ) -> Result<PreAuthorization, RepositoryError>;
    fn with_status(&self, status: PreAuthStatus) -> Result<Vec<PreAuthorization>, RepositoryError>;
}

/// Append-only audit storage; rows can be added and read, never changed.
pub trait AuditLogRepository: Send + Sync {
    fn append(&self, entry: ClaimAuditLog) -> Result<ClaimAuditLog, RepositoryError>;
    /// Rows for one claim in append order.
    fn for_claim(&self, claim: &ClaimId) -> Result<Vec<ClaimAuditLog>, RepositoryError>;
}
