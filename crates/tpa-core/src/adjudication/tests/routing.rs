use super::common::*;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::adjudication::coverage::CoverageResolver;
use crate::adjudication::memory::{
    InMemoryAuditLog, InMemoryClaimRepository, InMemoryPolicyRepository,
    InMemoryPreAuthorizationRepository,
};
use crate::adjudication::router::{eligibility_handler, AdjudicationApi};
use crate::adjudication::service::AdjudicationService;
use crate::adjudication::{BenefitPolicyId, ClaimId, InMemoryStore};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("route executes");
    let status = response.status();
    (status, read_json_body(response).await)
}

fn post_json(uri: &str, roles: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "u-42")
        .header("x-username", "gateway.user");
    if let Some(roles) = roles {
        builder = builder.header("x-roles", roles);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).expect("encode body")))
        .expect("request builds")
}

fn claim_body(policy: &str, member: &str, amount: &str) -> Value {
    json!({
        "memberId": member,
        "benefitPolicyId": policy,
        "providerId": NETWORK_PROVIDER,
        "serviceCode": LAB_SERVICE,
        "serviceDate": "2025-03-10",
        "requestedAmount": amount,
    })
}

async fn claim_under_review(fixture: &Fixture, router: &Router) -> String {
    let (status, created) = send(
        router,
        post_json(
            "/api/v1/claims",
            Some("EMPLOYER_ADMIN"),
            claim_body(&fixture.policy_id.0, ACTIVE_MEMBER, "400"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().expect("claim id").to_string();

    for (target, roles) in [("SUBMITTED", "EMPLOYER_ADMIN"), ("UNDER_REVIEW", "REVIEWER")] {
        let (status, _) = send(
            router,
            post_json(
                &format!("/api/v1/claims/{id}/transition"),
                Some(roles),
                json!({ "targetStatus": target }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    id
}

#[tokio::test]
async fn eligibility_route_accepts_the_policy_id_alias() {
    let fixture = fixture();
    let router = fixture.router();

    let (status, payload) = send(
        &router,
        post_json(
            "/api/v1/eligibility/check",
            None,
            json!({
                "memberId": ACTIVE_MEMBER,
                "policyId": fixture.policy_id.0,
                "serviceDate": "2025-03-10",
                "serviceCode": LAB_SERVICE,
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["eligible"], json!(true));
    assert!(payload["primaryReason"].is_null());
    assert!(payload["requestId"]
        .as_str()
        .unwrap_or_default()
        .starts_with("ELG-"));
    assert_eq!(payload["results"][0]["ruleCode"], "EMPLOYER_ACTIVE");
}

#[tokio::test]
async fn ineligibility_is_a_successful_answer() {
    let fixture = fixture();

    let (status, payload) = send(
        &fixture.router(),
        post_json(
            "/api/v1/eligibility/check",
            None,
            json!({
                "memberId": SUSPENDED_MEMBER,
                "benefitPolicyId": fixture.policy_id.0,
                "serviceDate": "2025-03-10",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["eligible"], json!(false));
    assert_eq!(payload["primaryReason"], "MEMBER_SUSPENDED");
    assert_eq!(payload["reasons"], json!(["member suspended"]));
}

#[tokio::test]
async fn unknown_member_is_not_found() {
    let fixture = fixture();

    let (status, payload) = send(
        &fixture.router(),
        post_json(
            "/api/v1/eligibility/check",
            None,
            json!({
                "memberId": "MEM-GHOST",
                "policyId": fixture.policy_id.0,
                "serviceDate": "2025-03-10",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["code"], "NOT_FOUND");
}

#[tokio::test]
async fn missing_claim_is_not_found() {
    let fixture = fixture();
    let response = fixture
        .router()
        .oneshot(
            Request::get("/api/v1/claims/CLM-MISSING")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transition_without_a_role_is_a_conflict() {
    let fixture = fixture();
    let router = fixture.router();
    let id = claim_under_review(&fixture, &router).await;

    let (status, payload) = send(
        &router,
        post_json(
            &format!("/api/v1/claims/{id}/transition"),
            None,
            json!({ "targetStatus": "APPROVED", "amount": "100" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["code"], "STATE_TRANSITION_INVALID");
    assert!(payload["error"]
        .as_str()
        .unwrap_or_default()
        .contains("REVIEWER"));
}

#[tokio::test]
async fn over_approval_is_a_conflict_and_leaves_the_claim() {
    let fixture = fixture();
    let router = fixture.router();
    let id = claim_under_review(&fixture, &router).await;

    let (status, _) = send(
        &router,
        post_json(
            &format!("/api/v1/claims/{id}/transition"),
            Some("REVIEWER"),
            json!({ "targetStatus": "APPROVED", "amount": "400.01" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/claims/{id}"))
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    let claim = read_json_body(response).await;
    assert_eq!(claim["status"], "UNDER_REVIEW");
    assert_eq!(claim["version"], 2);
}

#[tokio::test]
async fn calculated_approval_and_audit_trail_over_http() {
    let fixture = fixture();
    let router = fixture.router();
    let id = claim_under_review(&fixture, &router).await;

    let (status, claim) = send(
        &router,
        post_json(
            &format!("/api/v1/claims/{id}/transition"),
            Some("INSURANCE_ADMIN"),
            json!({ "targetStatus": "APPROVED", "autoCalculate": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claim["status"], "APPROVED");
    assert_eq!(claim["reviewed_by"], "gateway.user");

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/claims/{id}/audit"))
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let trail = read_json_body(response).await;
    let changes: Vec<&str> = trail
        .as_array()
        .expect("audit rows")
        .iter()
        .filter_map(|row| row["change_type"].as_str())
        .collect();
    assert_eq!(
        changes,
        ["CREATED", "STATUS_CHANGED", "STATUS_CHANGED", "APPROVED"]
    );
}

#[tokio::test]
async fn suspended_member_claim_is_unprocessable() {
    let fixture = fixture();

    let (status, payload) = send(
        &fixture.router(),
        post_json(
            "/api/v1/claims",
            Some("EMPLOYER_ADMIN"),
            claim_body(&fixture.policy_id.0, SUSPENDED_MEMBER, "120"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(payload["code"], "MEMBER_NOT_ELIGIBLE");
    assert_eq!(fixture.audit_rows(), 0);
}

#[tokio::test]
async fn storage_outage_hides_details() {
    let store = InMemoryStore::default();
    let service = Arc::new(AdjudicationService::new(
        Arc::new(UnavailableRecords),
        Arc::new(store.policies.clone()),
        Arc::new(store.claims.clone()),
        Arc::new(store.pre_auths.clone()),
        Arc::new(store.audit.clone()),
        CoverageResolver::default(),
    ));
    let api = Arc::new(AdjudicationApi::new(service, SUPER_ADMIN_ROLE));

    let response = eligibility_handler::<
        UnavailableRecords,
        InMemoryPolicyRepository,
        InMemoryClaimRepository,
        InMemoryPreAuthorizationRepository,
        InMemoryAuditLog,
    >(
        State(api),
        axum::http::HeaderMap::new(),
        axum::Json(eligibility_request(ACTIVE_MEMBER, &BenefitPolicyId::new("POL-ANY"), None)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "TECHNICAL_FAILURE");
    assert!(!payload["error"]
        .as_str()
        .unwrap_or_default()
        .contains("registry"));
}

#[tokio::test]
async fn configured_super_admin_role_bypasses_role_checks() {
    let fixture = fixture();
    let router = fixture.router();
    let id = claim_under_review(&fixture, &router).await;

    let (status, claim) = send(
        &router,
        post_json(
            &format!("/api/v1/claims/{id}/transition"),
            Some(SUPER_ADMIN_ROLE),
            json!({ "targetStatus": "REJECTED", "reason": "duplicate submission" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(claim["status"], "REJECTED");
    let trail = fixture
        .service
        .claim_audit_trail(&ClaimId::new(id))
        .expect("trail");
    assert_eq!(trail.last().map(|row| row.actor.role.as_str()), Some("SUPER_ADMIN"));
}

#[tokio::test]
async fn pre_authorization_routes_reject_human_expiry() {
    let fixture = fixture();
    let router = fixture.router();

    let (status, created) = send(
        &router,
        post_json(
            "/api/v1/preauthorizations",
            Some("EMPLOYER_ADMIN"),
            json!({
                "memberId": ACTIVE_MEMBER,
                "policyId": fixture.policy_id.0,
                "serviceCode": MRI_SERVICE,
                "serviceDate": "2025-03-10",
                "requestedAmount": "1800",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "REQUESTED");
    let id = created["id"].as_str().expect("pre-authorization id").to_string();
    let transition_uri = format!("/api/v1/preauthorizations/{id}/transition");

    let (status, _) = send(
        &router,
        post_json(
            &transition_uri,
            Some("REVIEWER"),
            json!({ "targetStatus": "UNDER_REVIEW" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, payload) = send(
        &router,
        post_json(
            &transition_uri,
            Some("REVIEWER"),
            json!({ "targetStatus": "APPROVED", "amount": "1000" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(payload["error"]
        .as_str()
        .unwrap_or_default()
        .contains("expiry date"));

    let (status, approved) = send(
        &router,
        post_json(
            &transition_uri,
            Some("REVIEWER"),
            json!({ "targetStatus": "APPROVED", "amount": "1000", "expiryDate": "2025-04-30" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["approval_expiry_date"], "2025-04-30");

    let (status, payload) = send(
        &router,
        post_json(
            &transition_uri,
            Some(SUPER_ADMIN_ROLE),
            json!({ "targetStatus": "EXPIRED" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(payload["error"]
        .as_str()
        .unwrap_or_default()
        .contains("system process"));
}

#[tokio::test]
async fn activating_an_overlapping_policy_is_unprocessable() {
    let fixture = fixture();
    let overlapping = fixture
        .service
        .policies()
        .create(policy_request(date(2025, 6, 1), date(2026, 5, 31)))
        .expect("drafted");

    let response = fixture
        .router()
        .oneshot(
            Request::post(format!("/api/v1/policies/{}/activate", overlapping.id))
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "POLICY_OVERLAP");
}
