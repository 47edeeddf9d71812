//! Ingest pipeline end-to-end: PEM/DER certificates, LDIF bundles, Master
//! Lists, dedup and counter bookkeeping. Everything runs against the
//! in-memory store.

mod support;

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use local_pkd::classifier::CountryPolicy;
use local_pkd::crypto::x509::{decode_certificates, der_to_pem, fingerprint_hex};
use local_pkd::ingest::ldif::certificate_entry_to_ldif;
use local_pkd::ingest::IngestPipeline;
use local_pkd::models::{CertType, UploadStatus};
use local_pkd::store::{CertificateStore, MemoryStore, TrustStore, UploadStore};

fn pipeline() -> (Arc<MemoryStore>, IngestPipeline) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestPipeline::new(store.clone() as Arc<dyn TrustStore>, CountryPolicy::Warn);
    (store, pipeline)
}

fn known_csca() -> support::CaFixture {
    support::make_csca(
        "UN",
        "CSCA UNITED NATIONS",
        Utc.with_ymd_and_hms(2022, 6, 14, 15, 45, 9).unwrap(),
        Utc.with_ymd_and_hms(2032, 6, 14, 15, 45, 9).unwrap(),
    )
}

#[tokio::test]
async fn pem_csca_ingest_round_trip() {
    let (store, pipeline) = pipeline();
    let ca = known_csca();
    let pem = der_to_pem(&ca.der);

    let outcome = pipeline
        .ingest_bytes("un-csca.pem", pem.as_bytes())
        .await
        .unwrap();

    assert_eq!(outcome.upload.status, UploadStatus::Completed);
    assert_eq!(outcome.upload.counters.csca, 1);
    assert_eq!(outcome.upload.counters.errors, 0);

    let fingerprint = fingerprint_hex(&ca.der);
    let record = store
        .certificate_by_fingerprint(&fingerprint)
        .await
        .unwrap()
        .expect("CSCA stored");
    assert_eq!(record.cert_type, CertType::Csca);
    assert_eq!(record.country, "UN");
    assert!(record.self_signed);
    assert!(record.is_ca);
    assert_eq!(
        record.not_after,
        Utc.with_ymd_and_hms(2032, 6, 14, 15, 45, 9).unwrap()
    );
    assert!(record.satisfies_csca_invariant());

    // A second ingest of the identical file is rejected on content hash.
    assert!(pipeline
        .ingest_bytes("un-csca.pem", pem.as_bytes())
        .await
        .is_err());

    // The same certificate arriving in a different envelope inserts zero
    // rows and counts a duplicate.
    let outcome = pipeline
        .ingest_bytes("un-csca.der", &ca.der)
        .await
        .unwrap();
    assert_eq!(outcome.upload.counters.csca, 0);
    assert_eq!(outcome.upload.counters.duplicates, 1);
    assert_eq!(
        store
            .count_certificates_by_type(CertType::Csca)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn pem_der_round_trip_preserves_fingerprint() {
    let ca = known_csca();
    let pem = der_to_pem(&ca.der);
    let decoded = decode_certificates(pem.as_bytes()).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(fingerprint_hex(&decoded[0]), fingerprint_hex(&ca.der));
}

fn ldif_bundle(entries: &[(&str, &[u8])], crl: Option<&[u8]>) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let mut doc = String::from("version: 1\n\n");
    for (dn, der) in entries {
        doc.push_str(&certificate_entry_to_ldif(dn, der));
        doc.push('\n');
    }
    if let Some(der) = crl {
        doc.push_str("dn: cn=crl-1,o=crl,c=UN,dc=data,dc=download,dc=pkd,dc=icao,dc=int\n");
        doc.push_str("objectClass: cRLDistributionPoint\n");
        doc.push_str(&format!(
            "certificateRevocationList;binary:: {}\n\n",
            STANDARD.encode(der)
        ));
    }
    doc
}

#[tokio::test]
async fn ldif_bundle_counters_are_conserved() {
    let (store, pipeline) = pipeline();
    let ca = known_csca();
    let now = Utc::now();
    let (dsc1, _) = support::make_dsc(&ca, "DS 1", &[0x11], now - chrono::Duration::days(10), now + chrono::Duration::days(355));
    let (dsc2, _) = support::make_dsc(&ca, "DS 2", &[0x12], now - chrono::Duration::days(10), now + chrono::Duration::days(355));
    let crl = support::make_crl(&ca, &[], now - chrono::Duration::days(1), now + chrono::Duration::days(30));

    // Four certificate entries: two DSCs, one repeat, one garbage blob.
    let garbage = vec![0x30, 0x03, 0x02, 0x01, 0x00];
    let doc = ldif_bundle(
        &[
            ("cn=a,o=dsc,c=UN,dc=data", &dsc1),
            ("cn=b,o=dsc,c=UN,dc=data", &dsc2),
            ("cn=c,o=dsc,c=UN,dc=data", &dsc1),
            ("cn=d,o=dsc,c=UN,dc=data", &garbage),
        ],
        Some(&crl),
    );

    let outcome = pipeline
        .ingest_bytes("icaopkd-001-complete-005973.ldif", doc.as_bytes())
        .await
        .unwrap();

    assert_eq!(outcome.upload.status, UploadStatus::Completed);
    assert_eq!(outcome.upload.collection_number.as_deref(), Some("005973"));
    let counters = &outcome.upload.counters;
    assert_eq!(counters.dsc, 2);
    assert_eq!(counters.crl, 1);
    assert_eq!(counters.duplicates, 1);
    assert_eq!(counters.errors, 1);
    // inserted + duplicates + errors == entries in file.
    assert_eq!(
        counters.inserted_certificates() + counters.crl + counters.duplicates + counters.errors,
        5
    );

    let stored = store.upload_by_id(outcome.upload.id).await.unwrap().unwrap();
    assert_eq!(stored.status, UploadStatus::Completed);
    assert_eq!(stored.counters, outcome.upload.counters);
}

#[tokio::test]
async fn nc_collection_retags_dscs() {
    let (store, pipeline) = pipeline();
    let ca = known_csca();
    let now = Utc::now();
    let (dsc, _) = support::make_dsc(&ca, "NC DS", &[0x21], now - chrono::Duration::days(1), now + chrono::Duration::days(100));

    let doc = ldif_bundle(&[("cn=nc,o=dsc,c=UN,dc=nc-data", &dsc)], None);
    let outcome = pipeline
        .ingest_bytes("icaopkd-003-complete-000118.ldif", doc.as_bytes())
        .await
        .unwrap();

    assert_eq!(outcome.upload.counters.dsc_nc, 1);
    assert_eq!(outcome.upload.counters.dsc, 0);
    assert_eq!(
        store
            .count_certificates_by_type(CertType::DscNc)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn master_list_ingest_stores_cscas_and_signer() {
    let (store, pipeline) = pipeline();
    let signer_ca = known_csca();
    let (mlsc, mlsc_key) = support::make_mlsc(&signer_ca, "ML SIGNER");
    let other_ca = support::make_csca(
        "DE",
        "CSCA GERMANY",
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2033, 1, 1, 0, 0, 0).unwrap(),
    );

    let list = support::build_master_list(
        &mlsc,
        &mlsc_key,
        &[signer_ca.der.clone(), other_ca.der.clone()],
    );
    let outcome = pipeline.ingest_bytes("bundle.ml", &list).await.unwrap();

    assert_eq!(outcome.upload.status, UploadStatus::Completed);
    assert_eq!(outcome.upload.counters.master_lists, 1);
    assert_eq!(outcome.upload.counters.mlsc, 1);
    assert_eq!(outcome.upload.counters.csca, 2);
    // Signature verified, so material is marked source-verified.
    assert_eq!(outcome.upload.counters.errors, 0);
    let record = store
        .certificate_by_fingerprint(&fingerprint_hex(&other_ca.der))
        .await
        .unwrap()
        .unwrap();
    assert!(record.source_verified);
}

#[tokio::test]
async fn unknown_format_fails_the_upload() {
    let (_, pipeline) = pipeline();
    let outcome = pipeline
        .ingest_bytes("notes.txt", b"hello world")
        .await
        .unwrap();
    assert_eq!(outcome.upload.status, UploadStatus::Failed);
    assert!(outcome.upload.error_message.is_some());
}
