use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::access::{Actor, Role};
use super::claims::{ClaimStatus, ClaimTransition};
use super::domain::{BenefitPolicyId, ClaimId, PreAuthorizationId, UserId};
use super::eligibility::{EligibilityDecision, Requester};
use super::error::AdjudicationError;
use super::preauth::{PreAuthStatus, PreAuthTransition};
use super::repository::{
    AuditLogRepository, BenefitPolicyRepository, ClaimRepository, PreAuthorizationRepository,
    RecordLookup,
};
use super::service::{
    AdjudicationService, ClaimCommand, EligibilityRequest, NewClaim, NewPreAuthorization,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";
pub const ROLES_HEADER: &str = "x-roles";
pub const SUPER_ADMIN_HEADER: &str = "x-super-admin";

/// Router state: the service plus the role name that grants the super-admin bypass.
pub struct AdjudicationApi<L, P, C, Q, A> {
    service: Arc<AdjudicationService<L, P, C, Q, A>>,
    super_admin_role: Role,
}

impl<L, P, C, Q, A> AdjudicationApi<L, P, C, Q, A> {
    pub fn new(
        service: Arc<AdjudicationService<L, P, C, Q, A>>,
        super_admin_role: impl Into<String>,
    ) -> Self {
        Self {
            service,
            super_admin_role: Role::new(super_admin_role),
        }
    }

    /// Identity supplied by the upstream gateway headers.
    fn actor(&self, headers: &HeaderMap) -> Actor {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let user_id = header(USER_ID_HEADER).unwrap_or("anonymous");
        let username = header(USERNAME_HEADER).unwrap_or(user_id);
        let roles: Vec<String> = header(ROLES_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|role| !role.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let flagged = header(SUPER_ADMIN_HEADER)
            .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
            .unwrap_or(false);

        let actor = Actor::user(UserId::new(user_id), username, roles);
        let super_admin = flagged || actor.roles.contains(&self.super_admin_role);
        actor.with_super_admin(super_admin)
    }
}

/// Router exposing eligibility, claim, pre-authorization, and policy activation endpoints.
pub fn adjudication_router<L, P, C, Q, A>(api: Arc<AdjudicationApi<L, P, C, Q, A>>) -> Router
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/eligibility/check",
            post(eligibility_handler::<L, P, C, Q, A>),
        )
        .route("/api/v1/claims", post(create_claim_handler::<L, P, C, Q, A>))
        .route("/api/v1/claims/:claim_id", get(get_claim_handler::<L, P, C, Q, A>))
        .route(
            "/api/v1/claims/:claim_id/transition",
            post(claim_transition_handler::<L, P, C, Q, A>),
        )
        .route(
            "/api/v1/claims/:claim_id/audit",
            get(claim_audit_handler::<L, P, C, Q, A>),
        )
        .route(
            "/api/v1/preauthorizations",
            post(request_pre_auth_handler::<L, P, C, Q, A>),
        )
        .route(
            "/api/v1/preauthorizations/:pre_auth_id",
            get(get_pre_auth_handler::<L, P, C, Q, A>),
        )
        .route(
            "/api/v1/preauthorizations/:pre_auth_id/transition",
            post(pre_auth_transition_handler::<L, P, C, Q, A>),
        )
        .route(
            "/api/v1/policies/:policy_id",
            get(get_policy_handler::<L, P, C, Q, A>),
        )
        .route(
            "/api/v1/policies/:policy_id/activate",
            post(activate_policy_handler::<L, P, C, Q, A>),
        )
        .with_state(api)
}

/// Map a service error to the JSON error body and status the REST boundary promises.
pub fn error_response(err: &AdjudicationError) -> Response {
    let status = match err {
        AdjudicationError::BusinessRule(_) if err.as_transition().is_some() => {
            StatusCode::CONFLICT
        }
        AdjudicationError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AdjudicationError::NotFound { .. } => StatusCode::NOT_FOUND,
        AdjudicationError::Technical(inner) => {
            error!(error = %inner, "adjudication request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = json!({
        "error": err.public_message(),
        "code": err.code(),
    });
    (status, Json(payload)).into_response()
}

fn eligibility_view(decision: &EligibilityDecision) -> serde_json::Value {
    json!({
        "requestId": decision.request_id,
        "eligible": decision.eligible,
        "primaryReason": decision.primary_reason,
        "summary": decision.summary(),
        "reasons": decision.reasons(),
        "results": decision.results,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTransitionBody {
    pub target_status: ClaimStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub auto_calculate: bool,
}

impl From<ClaimTransitionBody> for ClaimCommand {
    fn from(body: ClaimTransitionBody) -> Self {
        ClaimCommand {
            transition: ClaimTransition {
                target: body.target_status,
                comment: body.comment,
                approved_amount: body.amount,
                rejection_reason: body.reason,
            },
            auto_calculate: body.auto_calculate,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAuthTransitionBody {
    pub target_status: PreAuthStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

impl From<PreAuthTransitionBody> for PreAuthTransition {
    fn from(body: PreAuthTransitionBody) -> Self {
        PreAuthTransition {
            target: body.target_status,
            comment: body.comment,
            approved_amount: body.amount,
            approval_expiry_date: body.expiry_date,
            rejection_reason: body.reason,
        }
    }
}

pub(crate) async fn eligibility_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    headers: HeaderMap,
    Json(request): Json<EligibilityRequest>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    let actor = api.actor(&headers);
    match api.service.check_eligibility(&request, Requester::from(&actor)) {
        Ok(decision) => (StatusCode::OK, Json(eligibility_view(&decision))).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn create_claim_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    headers: HeaderMap,
    Json(request): Json<NewClaim>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    let actor = api.actor(&headers);
    match api.service.create_claim(request, &actor) {
        Ok(claim) => (StatusCode::CREATED, Json(claim)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn get_claim_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(claim_id): Path<String>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    match api.service.get_claim(&ClaimId(claim_id)) {
        Ok(claim) => (StatusCode::OK, Json(claim)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn claim_transition_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(claim_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ClaimTransitionBody>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    let actor = api.actor(&headers);
    match api
        .service
        .transition_claim(&ClaimId(claim_id), ClaimCommand::from(body), &actor)
    {
        Ok(claim) => (StatusCode::OK, Json(claim)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn claim_audit_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(claim_id): Path<String>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    match api.service.claim_audit_trail(&ClaimId(claim_id)) {
        Ok(trail) => (StatusCode::OK, Json(trail)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn request_pre_auth_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    headers: HeaderMap,
    Json(request): Json<NewPreAuthorization>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    let actor = api.actor(&headers);
    match api.service.request_pre_authorization(request, &actor) {
        Ok(pre_auth) => (StatusCode::CREATED, Json(pre_auth)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn get_pre_auth_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(pre_auth_id): Path<String>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    match api
        .service
        .get_pre_authorization(&PreAuthorizationId(pre_auth_id))
    {
        Ok(pre_auth) => (StatusCode::OK, Json(pre_auth)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn pre_auth_transition_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(pre_auth_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PreAuthTransitionBody>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    let actor = api.actor(&headers);
    let request = PreAuthTransition::from(body);
    match api.service.transition_pre_authorization(
        &PreAuthorizationId(pre_auth_id),
        &request,
        &actor,
    ) {
        Ok(pre_auth) => (StatusCode::OK, Json(pre_auth)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn get_policy_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(policy_id): Path<String>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    match api.service.policies().get(&BenefitPolicyId(policy_id)) {
        Ok(policy) => (StatusCode::OK, Json(policy)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn activate_policy_handler<L, P, C, Q, A>(
    State(api): State<Arc<AdjudicationApi<L, P, C, Q, A>>>,
    Path(policy_id): Path<String>,
) -> Response
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    match api.service.policies().activate(&BenefitPolicyId(policy_id)) {
        Ok(policy) => (StatusCode::OK, Json(policy)).into_response(),
        Err(err) => error_response(&err),
    }
}
