use chrono::{Datelike, NaiveDate};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tpa_core::adjudication::{
    AdjudicationError, BenefitPolicyId, CoverageResolver, Employer, EmployerId,
    InMemoryAdjudicationService, InMemoryStore, MedicalCategory, MedicalCategoryId,
    MedicalService, MedicalServiceId, Member, MemberId, MemberStatus, NewBenefitPolicy,
    NewPolicyRule, Provider, ProviderId,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) const DEMO_EMPLOYER: &str = "EMP-CONTOSO";
pub(crate) const DEMO_MEMBER: &str = "MEM-0001";
pub(crate) const DEMO_SUSPENDED_MEMBER: &str = "MEM-0002";
pub(crate) const DEMO_NETWORK_PROVIDER: &str = "PRV-CITYCARE";
pub(crate) const DEMO_OUTSIDE_PROVIDER: &str = "PRV-WALKIN";

/// In-memory collaborators plus the service built over them.
pub(crate) struct SeededStore {
    pub(crate) store: InMemoryStore,
    pub(crate) service: Arc<InMemoryAdjudicationService>,
    pub(crate) policy_id: BenefitPolicyId,
}

/// Load reference records and one active policy covering the calendar year of `today`.
///
/// Stands in for the member, provider, and catalogue services until those are wired.
pub(crate) fn seed_store(
    resolver: CoverageResolver,
    today: NaiveDate,
) -> Result<SeededStore, AdjudicationError> {
    let plan_year = today.year();
    let start = NaiveDate::from_ymd_opt(plan_year, 1, 1).unwrap_or(today);
    let end = NaiveDate::from_ymd_opt(plan_year, 12, 31).unwrap_or(today);
    let enrolled = NaiveDate::from_ymd_opt(plan_year - 1, 1, 1).unwrap_or(start);

    let store = InMemoryStore::default();
    let records = &store.records;

    records.put_employer(Employer {
        id: EmployerId::new(DEMO_EMPLOYER),
        name: "Contoso Manufacturing".to_string(),
        active: true,
    })?;
    for (id, name, status) in [
        (DEMO_MEMBER, "Noor Haddad", MemberStatus::Active),
        (DEMO_SUSPENDED_MEMBER, "Idris Kamal", MemberStatus::Suspended),
    ] {
        records.put_member(Member {
            id: MemberId::new(id),
            employer_id: EmployerId::new(DEMO_EMPLOYER),
            full_name: name.to_string(),
            status: Some(status),
            enrollment_date: enrolled,
            coverage_end: None,
        })?;
    }
    for (id, name) in [
        (DEMO_NETWORK_PROVIDER, "CityCare Hospital"),
        (DEMO_OUTSIDE_PROVIDER, "Walk-in Clinic"),
    ] {
        records.put_provider(Provider {
            id: ProviderId::new(id),
            name: name.to_string(),
            active: true,
        })?;
    }
    for (id, code, name) in [
        ("CAT-OPD", "OPD", "Outpatient"),
        ("CAT-LAB", "LAB", "Laboratory"),
        ("CAT-IMG", "IMG", "Imaging"),
    ] {
        records.put_category(MedicalCategory {
            id: MedicalCategoryId::new(id),
            code: code.to_string(),
            name: name.to_string(),
        })?;
    }
    for (id, code, name, category) in [
        ("SVC-CONSULT", "OPD-CONSULT", "General consultation", "CAT-OPD"),
        ("SVC-CBC", "LAB-CBC", "Complete blood count", "CAT-LAB"),
        ("SVC-MRI", "IMG-MRI", "MRI scan", "CAT-IMG"),
    ] {
        records.put_service(MedicalService {
            id: MedicalServiceId::new(id),
            code: code.to_string(),
            name: name.to_string(),
            category_id: MedicalCategoryId::new(category),
        })?;
    }

    let service = Arc::new(store.service(resolver));
    let policies = service.policies();
    let policy = policies.create(NewBenefitPolicy {
        code: format!("CONTOSO-{plan_year}"),
        name: format!("Contoso staff plan {plan_year}"),
        employer_id: EmployerId::new(DEMO_EMPLOYER),
        insurer_id: Some("INS-GULF".to_string()),
        start_date: start,
        end_date: end,
        annual_limit: dec!(250000),
        default_coverage_percent: Some(80),
        per_member_limit: Some(dec!(50000)),
        per_family_limit: None,
        network_provider_ids: BTreeSet::from([ProviderId::new(DEMO_NETWORK_PROVIDER)]),
    })?;
    let rules = [
        NewPolicyRule {
            category_id: Some(MedicalCategoryId::new("CAT-OPD")),
            coverage_percent: Some(90),
            ..NewPolicyRule::default()
        },
        NewPolicyRule {
            category_id: Some(MedicalCategoryId::new("CAT-LAB")),
            ..NewPolicyRule::default()
        },
        NewPolicyRule {
            service_id: Some(MedicalServiceId::new("SVC-MRI")),
            coverage_percent: Some(70),
            amount_limit: Some(dec!(1500)),
            waiting_period_days: Some(90),
            requires_pre_approval: true,
            ..NewPolicyRule::default()
        },
    ];
    for rule in rules {
        policies.add_rule(&policy.id, rule)?;
    }
    policies.activate(&policy.id)?;

    Ok(SeededStore {
        store,
        service,
        policy_id: policy.id,
    })
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpa_core::adjudication::PolicyStatus;

    #[test]
    fn seeded_store_has_one_active_policy() {
        let seeded = seed_store(
            CoverageResolver::default(),
            NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date"),
        )
        .expect("seed");

        let policy = seeded
            .service
            .policies()
            .get(&seeded.policy_id)
            .expect("policy stored");
        assert_eq!(policy.status, PolicyStatus::Active);
        assert_eq!(policy.rules.len(), 3);
        assert_eq!(
            policy.start_date,
            NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date")
        );
        assert_eq!(seeded.store.records.categories().expect("categories").len(), 3);
        assert!(seeded.store.audit.is_empty());
    }

    #[test]
    fn dates_parse_in_iso_format_only() {
        assert_eq!(
            parse_date(" 2025-02-28 "),
            Ok(NaiveDate::from_ymd_opt(2025, 2, 28).expect("valid date"))
        );
        assert!(parse_date("28/02/2025").is_err());
    }
}
