use crate::infra::{
    seed_store, SeededStore, DEMO_MEMBER, DEMO_NETWORK_PROVIDER, DEMO_OUTSIDE_PROVIDER,
    DEMO_SUSPENDED_MEMBER,
};
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use rust_decimal_macros::dec;
use tpa_core::adjudication::{
    roles, Actor, ClaimCommand, ClaimStatus, ClaimTransition, CoverageResolver,
    EligibilityDecision, EligibilityRequest, MemberId, NewClaim, NewPreAuthorization,
    PreAuthStatus, PreAuthTransition, ProviderId, Requester, UserId,
};
use tpa_core::error::AppError;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Service date used for the walkthrough (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) service_date: Option<NaiveDate>,
    /// Skip the pre-authorization portion of the demo.
    #[arg(long)]
    pub(crate) skip_pre_authorization: bool,
}

struct Cast {
    hr: Actor,
    reviewer: Actor,
    finance: Actor,
}

impl Cast {
    fn new() -> Self {
        Self {
            hr: Actor::user(UserId::new("u-hr"), "hr.desk", [roles::EMPLOYER_ADMIN]),
            reviewer: Actor::user(UserId::new("u-rev"), "claims.reviewer", [roles::REVIEWER]),
            finance: Actor::user(UserId::new("u-fin"), "finance.desk", [roles::FINANCE]),
        }
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let service_date = args
        .service_date
        .unwrap_or_else(|| Local::now().date_naive());
    let seeded = seed_store(CoverageResolver::default(), service_date)?;
    let cast = Cast::new();

    println!("TPA adjudication walkthrough for service date {service_date}");
    println!("Seeded benefit policy {}", seeded.policy_id);

    eligibility_section(&seeded, service_date)?;
    claim_section(&seeded, &cast, service_date)?;
    if !args.skip_pre_authorization {
        pre_authorization_section(&seeded, &cast, service_date)?;
    }

    println!("\nAudit rows written: {}", seeded.store.audit.len());
    Ok(())
}

fn eligibility_section(seeded: &SeededStore, service_date: NaiveDate) -> Result<(), AppError> {
    println!("\nEligibility");
    let checks = [
        (DEMO_MEMBER, DEMO_NETWORK_PROVIDER, "OPD-CONSULT"),
        (DEMO_MEMBER, DEMO_OUTSIDE_PROVIDER, "IMG-MRI"),
        (DEMO_SUSPENDED_MEMBER, DEMO_NETWORK_PROVIDER, "LAB-CBC"),
    ];
    for (member, provider, code) in checks {
        let decision = seeded.service.check_eligibility(
            &EligibilityRequest {
                member_id: MemberId::new(member),
                benefit_policy_id: seeded.policy_id.clone(),
                provider_id: Some(ProviderId::new(provider)),
                service_date,
                service_code: Some(code.to_string()),
            },
            Requester::anonymous(),
        )?;
        render_decision(member, code, &decision);
    }
    Ok(())
}

fn render_decision(member: &str, code: &str, decision: &EligibilityDecision) {
    println!(
        "- {member} / {code}: {} ({})",
        if decision.eligible { "eligible" } else { "not eligible" },
        decision.summary()
    );
    for result in decision.results.iter().filter(|result| !result.passed) {
        let severity = if result.hard_rule { "hard" } else { "soft" };
        println!("    [{severity}] {}: {}", result.rule_code, result.message);
    }
}

fn claim_section(
    seeded: &SeededStore,
    cast: &Cast,
    service_date: NaiveDate,
) -> Result<(), AppError> {
    println!("\nClaim lifecycle");
    let service = &seeded.service;
    let claim = service.create_claim(
        NewClaim {
            member_id: MemberId::new(DEMO_MEMBER),
            benefit_policy_id: seeded.policy_id.clone(),
            provider_id: Some(ProviderId::new(DEMO_NETWORK_PROVIDER)),
            service_code: Some("OPD-CONSULT".to_string()),
            pre_authorization_id: None,
            service_date,
            requested_amount: dec!(180.00),
            diagnosis_code: Some("J06.9".to_string()),
            diagnosis_description: Some("Upper respiratory infection".to_string()),
            attachments_count: 1,
        },
        &cast.hr,
    )?;
    println!("- {} filed for {}", claim.id, claim.requested_amount);

    let steps: [(ClaimCommand, &Actor); 4] = [
        (ClaimTransition::to(ClaimStatus::Submitted).into(), &cast.hr),
        (ClaimTransition::to(ClaimStatus::UnderReview).into(), &cast.reviewer),
        (ClaimCommand::approve_calculated(), &cast.reviewer),
        (ClaimTransition::to(ClaimStatus::Settled).into(), &cast.finance),
    ];
    for (command, actor) in steps {
        let updated = service.transition_claim(&claim.id, command, actor)?;
        println!("- {} -> {} by {}", claim.id, updated.status, actor.username);
    }

    let refused = service.transition_claim(
        &claim.id,
        ClaimTransition::to(ClaimStatus::UnderReview),
        &cast.reviewer,
    );
    if let Err(err) = refused {
        println!("- reopening refused: {err}");
    }

    for row in service.claim_audit_trail(&claim.id)? {
        println!(
            "    audit {:?}: {} by {} ({})",
            row.change_type,
            row.new_status,
            row.actor.username,
            row.actor.role
        );
    }
    Ok(())
}

fn pre_authorization_section(
    seeded: &SeededStore,
    cast: &Cast,
    service_date: NaiveDate,
) -> Result<(), AppError> {
    println!("\nPre-authorization lifecycle");
    let service = &seeded.service;
    let pre_auth = service.request_pre_authorization(
        NewPreAuthorization {
            member_id: MemberId::new(DEMO_MEMBER),
            benefit_policy_id: seeded.policy_id.clone(),
            provider_id: Some(ProviderId::new(DEMO_NETWORK_PROVIDER)),
            service_code: Some("IMG-MRI".to_string()),
            service_date,
            requested_amount: Some(dec!(2400)),
            notes: Some("Persistent knee pain".to_string()),
        },
        &cast.hr,
    )?;
    println!("- {} requested", pre_auth.id);

    let expires_on = service_date + Duration::days(14);
    for request in [
        PreAuthTransition::to(PreAuthStatus::UnderReview),
        PreAuthTransition::approve(dec!(1500), expires_on),
    ] {
        let updated =
            service.transition_pre_authorization(&pre_auth.id, &request, &cast.reviewer)?;
        println!("- {} -> {}", pre_auth.id, updated.status);
    }

    let sweep_day = expires_on + Duration::days(1);
    let expired = service.expire_pre_authorizations(sweep_day)?;
    println!("- sweep on {sweep_day} expired {} pre-authorization(s)", expired.len());
    Ok(())
}
