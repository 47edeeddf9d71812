//! Trust chain validation scenarios: valid chain, revocation, missing
//! issuer, expiry, missing CRL.

mod support;

use std::sync::Arc;

use chrono::{Duration, Utc};

use local_pkd::models::{CertType, ChainStatus, CrlStatus};
use local_pkd::store::{CertificateStore, CrlStore, MemoryStore, TrustStore};
use local_pkd::validation::chain::ChainValidator;

struct Setup {
    store: Arc<MemoryStore>,
    validator: ChainValidator,
    ca: support::CaFixture,
}

async fn setup() -> Setup {
    let store = Arc::new(MemoryStore::new());
    let validator = ChainValidator::new(store.clone() as Arc<dyn TrustStore>);
    let now = Utc::now();
    let ca = support::make_csca(
        "KR",
        "CSCA KOREA",
        now - Duration::days(365),
        now + Duration::days(3650),
    );
    store
        .insert_certificate_if_absent(&support::record_from_der(&ca.der, CertType::Csca))
        .await
        .unwrap();
    Setup {
        store,
        validator,
        ca,
    }
}

#[tokio::test]
async fn valid_dsc_chain_with_clean_crl() {
    let s = setup().await;
    let now = Utc::now();
    let (dsc_der, _) = support::make_dsc(
        &s.ca,
        "DS KOREA 1",
        &[0x01],
        now - Duration::days(30),
        now + Duration::days(335),
    );
    let crl = support::make_crl(&s.ca, &[], now - Duration::days(1), now + Duration::days(30));
    s.store
        .insert_crl_if_absent(&support::crl_record_from_der(&crl))
        .await
        .unwrap();

    let leaf = support::record_from_der(&dsc_der, CertType::Dsc);
    let verdict = s.validator.validate(&leaf, None).await.unwrap();

    assert_eq!(verdict.status, ChainStatus::Valid, "{:?}", verdict.errors);
    assert!(verdict.signature_valid);
    assert!(verdict.chain_valid);
    assert!(verdict.not_revoked);
    assert!(verdict.validity_valid);
    assert!(verdict.constraints_valid);
    assert_eq!(verdict.crl_status, CrlStatus::Clean);
    assert_eq!(verdict.chain.len(), 2);
    assert!(verdict.anchor.is_some());
}

#[tokio::test]
async fn revoked_serial_yields_revoked_verdict() {
    let s = setup().await;
    let now = Utc::now();
    let (dsc_der, _) = support::make_dsc(
        &s.ca,
        "DS KOREA 2",
        &[0x01],
        now - Duration::days(30),
        now + Duration::days(335),
    );
    // The DSC's serial appears in a CRL whose window contains now.
    let crl = support::make_crl(
        &s.ca,
        &[&[0x01]],
        now - Duration::days(1),
        now + Duration::days(30),
    );
    s.store
        .insert_crl_if_absent(&support::crl_record_from_der(&crl))
        .await
        .unwrap();

    let leaf = support::record_from_der(&dsc_der, CertType::Dsc);
    let verdict = s.validator.validate(&leaf, None).await.unwrap();

    assert_eq!(verdict.status, ChainStatus::Revoked);
    assert!(!verdict.not_revoked);
    assert_eq!(verdict.crl_status, CrlStatus::Revoked);
    assert!(verdict.errors.iter().any(|e| e.contains("revoked")));
}

#[tokio::test]
async fn missing_issuer_breaks_the_chain() {
    let store = Arc::new(MemoryStore::new());
    let validator = ChainValidator::new(store.clone() as Arc<dyn TrustStore>);
    let now = Utc::now();
    let ca = support::make_csca(
        "FR",
        "CSCA FRANCE",
        now - Duration::days(10),
        now + Duration::days(3650),
    );
    let (dsc_der, _) = support::make_dsc(
        &ca,
        "DS FRANCE",
        &[0x05],
        now - Duration::days(1),
        now + Duration::days(100),
    );
    // The CSCA is never stored.
    let leaf = support::record_from_der(&dsc_der, CertType::Dsc);
    let verdict = validator.validate(&leaf, None).await.unwrap();

    assert_eq!(verdict.status, ChainStatus::Invalid);
    assert!(!verdict.chain_valid);
    assert!(verdict
        .errors
        .iter()
        .any(|e| e.contains("ISSUER_NOT_FOUND")));
}

#[tokio::test]
async fn expired_dsc_yields_expired_verdict() {
    let s = setup().await;
    let now = Utc::now();
    let (dsc_der, _) = support::make_dsc(
        &s.ca,
        "DS KOREA OLD",
        &[0x09],
        now - Duration::days(400),
        now - Duration::days(10),
    );
    let crl = support::make_crl(&s.ca, &[], now - Duration::days(1), now + Duration::days(30));
    s.store
        .insert_crl_if_absent(&support::crl_record_from_der(&crl))
        .await
        .unwrap();

    let leaf = support::record_from_der(&dsc_der, CertType::Dsc);
    let verdict = s.validator.validate(&leaf, None).await.unwrap();

    assert_eq!(verdict.status, ChainStatus::Expired);
    assert!(!verdict.validity_valid);
    assert!(verdict.signature_valid);
}

#[tokio::test]
async fn missing_crl_is_a_warning_not_a_failure() {
    let s = setup().await;
    let now = Utc::now();
    let (dsc_der, _) = support::make_dsc(
        &s.ca,
        "DS KOREA 3",
        &[0x0A],
        now - Duration::days(1),
        now + Duration::days(100),
    );

    let leaf = support::record_from_der(&dsc_der, CertType::Dsc);
    let verdict = s.validator.validate(&leaf, None).await.unwrap();

    assert_eq!(verdict.status, ChainStatus::Valid, "{:?}", verdict.errors);
    assert!(verdict.not_revoked);
    assert_eq!(verdict.crl_status, CrlStatus::Unavailable);
    assert!(verdict
        .errors
        .iter()
        .any(|e| e.contains("CRL_UNAVAILABLE")));
}

#[tokio::test]
async fn stale_crl_is_surfaced() {
    let s = setup().await;
    let now = Utc::now();
    let (dsc_der, _) = support::make_dsc(
        &s.ca,
        "DS KOREA 4",
        &[0x0B],
        now - Duration::days(1),
        now + Duration::days(100),
    );
    // The only CRL expired a month ago.
    let crl = support::make_crl(
        &s.ca,
        &[],
        now - Duration::days(90),
        now - Duration::days(30),
    );
    s.store
        .insert_crl_if_absent(&support::crl_record_from_der(&crl))
        .await
        .unwrap();

    let leaf = support::record_from_der(&dsc_der, CertType::Dsc);
    let verdict = s.validator.validate(&leaf, None).await.unwrap();

    assert_eq!(verdict.status, ChainStatus::Valid);
    assert_eq!(verdict.crl_status, CrlStatus::Stale);
}
