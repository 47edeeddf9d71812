//! Passive Authentication end-to-end: SOD assembly, data group comparison,
//! signature verification, chain validation and revocation, all against the
//! in-memory store.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use local_pkd::classifier::CountryPolicy;
use local_pkd::crypto::x509::fingerprint_hex;
use local_pkd::models::{CertType, PaStatus};
use local_pkd::pa::{PaEngine, PaRequest};
use local_pkd::store::{CertificateStore, CrlStore, MemoryStore, PaVerificationStore, TrustStore};

struct Setup {
    store: Arc<MemoryStore>,
    engine: PaEngine,
    dsc_der: Vec<u8>,
    dsc_key: Vec<u8>,
}

async fn setup(store_dsc: bool) -> Setup {
    let store = Arc::new(MemoryStore::new());
    let engine = PaEngine::new(store.clone() as Arc<dyn TrustStore>, CountryPolicy::Warn);
    let now = Utc::now();

    let ca = support::make_csca(
        "NL",
        "CSCA NETHERLANDS",
        now - Duration::days(700),
        now + Duration::days(3000),
    );
    store
        .insert_certificate_if_absent(&support::record_from_der(&ca.der, CertType::Csca))
        .await
        .unwrap();
    let crl = support::make_crl(&ca, &[], now - Duration::days(1), now + Duration::days(30));
    store
        .insert_crl_if_absent(&support::crl_record_from_der(&crl))
        .await
        .unwrap();

    let (dsc_der, dsc_key) = support::make_dsc(
        &ca,
        "DS NETHERLANDS 7",
        &[0x42],
        now - Duration::days(10),
        now + Duration::days(355),
    );
    if store_dsc {
        store
            .insert_certificate_if_absent(&support::record_from_der(&dsc_der, CertType::Dsc))
            .await
            .unwrap();
    }

    Setup {
        store,
        engine,
        dsc_der,
        dsc_key,
    }
}

fn dgs() -> BTreeMap<u8, Vec<u8>> {
    BTreeMap::from([
        (1u8, b"MRZ CONTENT DG1".to_vec()),
        (2u8, b"FACE IMAGE DG2".to_vec()),
        (14u8, b"SECURITY INFOS DG14".to_vec()),
    ])
}

fn request(sod: Vec<u8>, data_groups: BTreeMap<u8, Vec<u8>>) -> PaRequest {
    PaRequest {
        sod,
        data_groups,
        issuing_country: Some("NL".to_string()),
        document_number: Some("X1234567".to_string()),
        client_ip: Some("10.0.0.1".to_string()),
        user_agent: Some("test-suite".to_string()),
    }
}

fn sod_for(setup: &Setup, data_groups: &BTreeMap<u8, Vec<u8>>, wrap: bool) -> Vec<u8> {
    let refs: Vec<(u8, &[u8])> = data_groups
        .iter()
        .map(|(n, c)| (*n, c.as_slice()))
        .collect();
    support::build_sod(&setup.dsc_der, &setup.dsc_key, &refs, wrap)
}

#[tokio::test]
async fn pa_succeeds_on_matching_data_groups() {
    let s = setup(true).await;
    let data_groups = dgs();
    let sod = sod_for(&s, &data_groups, false);

    let report = s.engine.verify(request(sod, data_groups)).await.unwrap();
    let v = &report.verification;

    assert_eq!(v.status, PaStatus::Valid, "message: {}", v.message);
    assert_eq!(v.dg_hashes_valid, Some(true));
    assert_eq!(v.sod_signature_valid, Some(true));
    assert_eq!(v.trust_chain_valid, Some(true));
    assert_eq!(v.crl_clean, Some(true));
    assert!(v.dsc.is_some());
    assert!(v.csca.is_some());
    assert_eq!(report.dg_comparisons.len(), 3);
    assert!(report.dg_comparisons.iter().all(|c| c.valid && c.presented));

    // The verdict is persisted.
    let stored = s
        .store
        .pa_verification_by_id(v.id)
        .await
        .unwrap()
        .expect("verification persisted");
    assert_eq!(stored.status, PaStatus::Valid);
}

#[tokio::test]
async fn pa_accepts_wrapped_sod() {
    let s = setup(true).await;
    let data_groups = dgs();
    let sod = sod_for(&s, &data_groups, true);

    let report = s.engine.verify(request(sod, data_groups)).await.unwrap();
    assert_eq!(report.verification.status, PaStatus::Valid);
}

#[tokio::test]
async fn pa_flags_tampered_dg1() {
    let s = setup(true).await;
    let data_groups = dgs();
    let sod = sod_for(&s, &data_groups, false);

    // One byte of DG1 flips after signing.
    let mut tampered = data_groups.clone();
    tampered.get_mut(&1).unwrap()[0] ^= 0x01;

    let report = s.engine.verify(request(sod, tampered)).await.unwrap();
    let v = &report.verification;

    assert_eq!(v.status, PaStatus::Invalid);
    assert_eq!(v.dg_hashes_valid, Some(false));
    // Signature and chain are still fine; the data group is what failed.
    assert_eq!(v.sod_signature_valid, Some(true));
    assert_eq!(v.trust_chain_valid, Some(true));

    let dg1 = report
        .dg_comparisons
        .iter()
        .find(|c| c.dg == 1)
        .expect("DG1 compared");
    assert!(!dg1.valid);
    assert_ne!(dg1.actual.as_deref(), Some(dg1.expected.as_str()));
    // The diagnostic names DG1 and both hashes.
    assert!(v.message.contains("DG1 hash mismatch"));
    assert!(v.message.contains(&dg1.expected));
}

#[tokio::test]
async fn pa_allows_partial_reads() {
    let s = setup(true).await;
    let full = dgs();
    let sod = sod_for(&s, &full, false);

    // Only DG1 presented; DG2/DG14 are flagged but not fatal.
    let mut partial = BTreeMap::new();
    partial.insert(1u8, full[&1].clone());

    let report = s.engine.verify(request(sod, partial)).await.unwrap();
    assert_eq!(report.verification.status, PaStatus::Valid);
    assert_eq!(
        report
            .dg_comparisons
            .iter()
            .filter(|c| !c.presented)
            .count(),
        2
    );
}

#[tokio::test]
async fn pa_auto_registers_unknown_dsc() {
    let s = setup(false).await;
    let data_groups = dgs();
    let sod = sod_for(&s, &data_groups, false);
    let dsc_fingerprint = fingerprint_hex(&s.dsc_der);

    assert!(s
        .store
        .certificate_by_fingerprint(&dsc_fingerprint)
        .await
        .unwrap()
        .is_none());

    let report = s.engine.verify(request(sod, data_groups)).await.unwrap();
    assert_eq!(report.verification.status, PaStatus::Valid);

    let registered = s
        .store
        .certificate_by_fingerprint(&dsc_fingerprint)
        .await
        .unwrap()
        .expect("DSC auto-registered");
    assert_eq!(registered.cert_type, CertType::Dsc);
    // SOD-sourced material is not vetted trust material.
    assert!(!registered.source_verified);
}

#[tokio::test]
async fn pa_reports_error_on_garbage() {
    let s = setup(true).await;
    let report = s
        .engine
        .verify(request(vec![0xDE, 0xAD], dgs()))
        .await
        .unwrap();
    assert_eq!(report.verification.status, PaStatus::Error);
    assert_eq!(report.verification.dg_hashes_valid, None);
}

#[tokio::test]
async fn pa_rejects_revoked_dsc() {
    let store = Arc::new(MemoryStore::new());
    let engine = PaEngine::new(store.clone() as Arc<dyn TrustStore>, CountryPolicy::Warn);
    let now = Utc::now();
    let ca = support::make_csca(
        "NL",
        "CSCA NETHERLANDS",
        now - Duration::days(700),
        now + Duration::days(3000),
    );
    store
        .insert_certificate_if_absent(&support::record_from_der(&ca.der, CertType::Csca))
        .await
        .unwrap();
    let (dsc_der, dsc_key) = support::make_dsc(
        &ca,
        "DS NETHERLANDS 8",
        &[0x43],
        now - Duration::days(10),
        now + Duration::days(355),
    );
    // The DSC's serial is on the CSCA's current CRL.
    let crl = support::make_crl(
        &ca,
        &[&[0x43]],
        now - Duration::days(1),
        now + Duration::days(30),
    );
    store
        .insert_crl_if_absent(&support::crl_record_from_der(&crl))
        .await
        .unwrap();

    let data_groups = dgs();
    let refs: Vec<(u8, &[u8])> = data_groups
        .iter()
        .map(|(n, c)| (*n, c.as_slice()))
        .collect();
    let sod = support::build_sod(&dsc_der, &dsc_key, &refs, false);

    let report = engine.verify(request(sod, data_groups)).await.unwrap();
    let v = &report.verification;
    assert_eq!(v.status, PaStatus::Invalid);
    assert_eq!(v.crl_clean, Some(false));
    assert_eq!(v.trust_chain_valid, Some(false));
    // DG hashes and the SOD signature are intact.
    assert_eq!(v.dg_hashes_valid, Some(true));
    assert_eq!(v.sod_signature_valid, Some(true));
}
