//! Passive Authentication engine.
//!
//! Pipeline: parse SOD, compare data group hashes, verify the SOD signature
//! with the embedded DSC, validate the DSC chain against the trust store,
//! check revocation. Fails fast on unparseable input, accumulates
//! diagnostics otherwise, and persists a full PaVerification record either
//! way.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::classifier::{classify_metadata, CountryPolicy};
use crate::crypto::cms::{digest_with, verify_cms_signature};
use crate::crypto::x509::{extract_metadata, fingerprint_hex, normalize_dn_for_comparison};
use crate::error::Result;
use crate::models::{
    CertDescriptor, CertType, CertificateRecord, ChainStatus, CrlStatus, PaStatus, PaVerification,
};
use crate::store::TrustStore;
use crate::validation::chain::{ChainValidator, ChainVerdict};

/// Input to one Passive Authentication request.
#[derive(Debug, Clone)]
pub struct PaRequest {
    pub sod: Vec<u8>,
    /// Presented data groups, a subset of DG1..DG16.
    pub data_groups: BTreeMap<u8, Vec<u8>>,
    pub issuing_country: Option<String>,
    pub document_number: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Expected-vs-actual comparison for one data group.
#[derive(Debug, Clone)]
pub struct DgComparison {
    pub dg: u8,
    pub expected: String,
    pub actual: Option<String>,
    pub presented: bool,
    pub valid: bool,
}

/// Full PA outcome: the persisted record plus the working detail.
#[derive(Debug)]
pub struct PaReport {
    pub verification: PaVerification,
    pub dg_comparisons: Vec<DgComparison>,
    pub chain: Option<ChainVerdict>,
}

pub struct PaEngine {
    store: Arc<dyn TrustStore>,
    validator: ChainValidator,
    policy: CountryPolicy,
    auto_register_dsc: bool,
}

impl PaEngine {
    pub fn new(store: Arc<dyn TrustStore>, policy: CountryPolicy) -> Self {
        let validator = ChainValidator::new(store.clone());
        PaEngine {
            store,
            validator,
            policy,
            auto_register_dsc: true,
        }
    }

    pub fn with_auto_register(mut self, auto_register_dsc: bool) -> Self {
        self.auto_register_dsc = auto_register_dsc;
        self
    }

    /// Run Passive Authentication and persist the verdict.
    pub async fn verify(&self, request: PaRequest) -> Result<PaReport> {
        let requested_at = Utc::now();
        let sod_hash = fingerprint_hex(&request.sod);
        let mut messages: Vec<String> = Vec::new();

        // 1. Unwrap and parse the SOD.
        let sod = match super::sod::parse_sod(&request.sod) {
            Ok(sod) => sod,
            Err(e) => {
                let verification = PaVerification {
                    id: Uuid::new_v4(),
                    issuing_country: request.issuing_country.clone(),
                    document_number: request.document_number.clone(),
                    sod_hash,
                    dsc: None,
                    csca: None,
                    trust_chain_valid: None,
                    sod_signature_valid: None,
                    dg_hashes_valid: None,
                    crl_clean: None,
                    status: PaStatus::Error,
                    message: format!("SOD unparseable: {e}"),
                    client_ip: request.client_ip.clone(),
                    user_agent: request.user_agent.clone(),
                    requested_at,
                    completed_at: Some(Utc::now()),
                };
                self.store.insert_pa_verification(&verification).await?;
                return Ok(PaReport {
                    verification,
                    dg_comparisons: Vec::new(),
                    chain: None,
                });
            }
        };
        messages.push(format!(
            "SOD v{}, digest {}{}",
            sod.lds_version,
            digest_name(&sod.digest_algorithm_oid),
            sod.lds_version_info
                .as_ref()
                .map(|v| format!(" ({v})"))
                .unwrap_or_default()
        ));

        // 2. Hash the presented data groups with the declared algorithm.
        let (dg_comparisons, dg_hashes_valid) = self.compare_data_groups(&sod, &request);
        for comparison in dg_comparisons.iter().filter(|c| !c.valid) {
            messages.push(format!(
                "DG{} hash mismatch: expected {} actual {}",
                comparison.dg,
                comparison.expected,
                comparison.actual.as_deref().unwrap_or("-")
            ));
        }
        for comparison in dg_comparisons.iter().filter(|c| !c.presented) {
            messages.push(format!("DG{} not presented (partial read)", comparison.dg));
        }

        // 3. SOD signature against the embedded DSC.
        let signature_outcome = verify_cms_signature(&sod.signer, &sod.econtent, &sod.dsc_der);
        let sod_signature_valid = signature_outcome.valid;
        if let Some(reason) = &signature_outcome.reason {
            messages.push(format!("SOD signature: {reason}"));
        }

        // 4. DSC chain validation, auto-registering the DSC when permitted.
        let dsc_fingerprint = fingerprint_hex(&sod.dsc_der);
        let dsc_record = match self.resolve_dsc(&sod.dsc_der, &dsc_fingerprint).await? {
            Ok(record) => Some(record),
            Err(reason) => {
                messages.push(reason);
                None
            }
        };

        let chain = match &dsc_record {
            Some(record) => Some(self.validator.validate(record, None).await?),
            None => None,
        };
        let trust_chain_valid = chain.as_ref().map(|c| c.status == ChainStatus::Valid);
        if let Some(chain) = &chain {
            for error in &chain.errors {
                messages.push(error.clone());
            }
        }

        // 5. Revocation comes out of the chain walk; unavailable CRLs are a
        // warning, not a failure.
        let crl_clean = chain.as_ref().map(|c| {
            c.not_revoked && matches!(c.crl_status, CrlStatus::Clean | CrlStatus::Unavailable)
        });
        if let Some(chain) = &chain {
            if chain.crl_status == CrlStatus::Unavailable {
                messages.push("CRL_UNAVAILABLE: revocation could not be confirmed".to_string());
            }
        }

        if let (Some(hint), Some(record)) = (&request.issuing_country, &dsc_record) {
            if !record.country.is_empty() && !hint.eq_ignore_ascii_case(&record.country) {
                messages.push(format!(
                    "issuing country hint {} differs from DSC country {}",
                    hint, record.country
                ));
            }
        }

        let status = if dg_hashes_valid
            && sod_signature_valid
            && trust_chain_valid == Some(true)
            && crl_clean == Some(true)
        {
            PaStatus::Valid
        } else {
            PaStatus::Invalid
        };

        let verification = PaVerification {
            id: Uuid::new_v4(),
            issuing_country: request.issuing_country.clone(),
            document_number: request.document_number.clone(),
            sod_hash,
            dsc: dsc_record.as_ref().map(describe),
            csca: chain
                .as_ref()
                .and_then(|c| c.anchor.as_ref())
                .map(describe),
            trust_chain_valid,
            sod_signature_valid: Some(sod_signature_valid),
            dg_hashes_valid: Some(dg_hashes_valid),
            crl_clean,
            status,
            message: messages.join("; "),
            client_ip: request.client_ip,
            user_agent: request.user_agent,
            requested_at,
            completed_at: Some(Utc::now()),
        };
        self.store.insert_pa_verification(&verification).await?;

        Ok(PaReport {
            verification,
            dg_comparisons,
            chain,
        })
    }

    fn compare_data_groups(
        &self,
        sod: &super::sod::ParsedSod,
        request: &PaRequest,
    ) -> (Vec<DgComparison>, bool) {
        let mut comparisons = Vec::new();
        let mut all_presented_match = true;

        for (dg, expected) in &sod.dg_hashes {
            match request.data_groups.get(dg) {
                Some(raw) => {
                    let actual = digest_with(&sod.digest_algorithm_oid, raw);
                    let valid = actual.as_deref() == Some(expected.as_slice());
                    if !valid {
                        all_presented_match = false;
                    }
                    comparisons.push(DgComparison {
                        dg: *dg,
                        expected: hex::encode(expected),
                        actual: actual.map(hex::encode),
                        presented: true,
                        valid,
                    });
                }
                None => {
                    // Missing DGs are flagged but allowed (partial reads).
                    comparisons.push(DgComparison {
                        dg: *dg,
                        expected: hex::encode(expected),
                        actual: None,
                        presented: false,
                        valid: true,
                    });
                }
            }
        }

        // A presented DG the SOD does not cover cannot be authenticated.
        for dg in request.data_groups.keys() {
            if !sod.dg_hashes.contains_key(dg) {
                all_presented_match = false;
                comparisons.push(DgComparison {
                    dg: *dg,
                    expected: String::new(),
                    actual: None,
                    presented: true,
                    valid: false,
                });
            }
        }

        (comparisons, all_presented_match)
    }

    /// Locate the DSC in the trust store, auto-registering it from the SOD
    /// when policy allows. Returns Err(message) when the DSC cannot be used.
    async fn resolve_dsc(
        &self,
        dsc_der: &[u8],
        fingerprint: &str,
    ) -> Result<std::result::Result<CertificateRecord, String>> {
        if let Some(record) = self.store.certificate_by_fingerprint(fingerprint).await? {
            return Ok(Ok(record));
        }
        if !self.auto_register_dsc {
            return Ok(Err(format!(
                "DSC {fingerprint} not in trust store and auto-registration disabled"
            )));
        }

        let metadata = match extract_metadata(dsc_der) {
            Ok(m) => m,
            Err(e) => return Ok(Err(format!("embedded DSC unparseable: {e}"))),
        };
        let classification =
            match classify_metadata(&metadata, fingerprint.to_string(), self.policy) {
                Ok(c) => c,
                Err(e) => return Ok(Err(format!("embedded DSC rejected: {e}"))),
            };
        if classification.cert_type != CertType::Dsc {
            return Ok(Err(format!(
                "embedded certificate classifies as {}, not DSC",
                classification.cert_type
            )));
        }

        let record = CertificateRecord {
            id: Uuid::new_v4(),
            fingerprint: fingerprint.to_string(),
            der: dsc_der.to_vec(),
            cert_type: CertType::Dsc,
            country: classification.country,
            subject_dn_normalized: normalize_dn_for_comparison(&metadata.subject_dn),
            issuer_dn_normalized: normalize_dn_for_comparison(&metadata.issuer_dn),
            subject_dn: metadata.subject_dn,
            issuer_dn: metadata.issuer_dn,
            serial: metadata.serial,
            not_before: metadata.not_before,
            not_after: metadata.not_after,
            signature_algorithm_oid: metadata.signature_algorithm_oid,
            signature_hash_algorithm: metadata.signature_hash_algorithm,
            public_key_algorithm: metadata.public_key_algorithm,
            public_key_size: metadata.public_key_size,
            public_key_curve: metadata.public_key_curve,
            ski: metadata.ski,
            aki: metadata.aki,
            is_ca: metadata.is_ca,
            path_len_constraint: metadata.path_len_constraint,
            key_usage: metadata.key_usage,
            extended_key_usage: metadata.extended_key_usage,
            crl_distribution_points: metadata.crl_distribution_points,
            ocsp_url: metadata.ocsp_url,
            self_signed: metadata.self_signed,
            // Provenance is the SOD itself, not vetted trust material.
            source_verified: false,
            stored_in_directory: false,
            deleted: false,
            first_ingested_at: Utc::now(),
            source_upload_id: None,
        };
        self.store.insert_certificate_if_absent(&record).await?;
        log::info!(
            "auto-registered DSC {} from SOD ({})",
            fingerprint,
            record.subject_dn
        );
        Ok(Ok(record))
    }
}

fn describe(cert: &CertificateRecord) -> CertDescriptor {
    CertDescriptor {
        subject_dn: cert.subject_dn.clone(),
        serial: cert.serial.clone(),
        issuer_dn: cert.issuer_dn.clone(),
        fingerprint: cert.fingerprint.clone(),
    }
}

fn digest_name(oid: &str) -> &'static str {
    match oid {
        "1.3.14.3.2.26" => "SHA-1",
        "2.16.840.1.101.3.4.2.1" => "SHA-256",
        "2.16.840.1.101.3.4.2.2" => "SHA-384",
        "2.16.840.1.101.3.4.2.3" => "SHA-512",
        _ => "unknown",
    }
}
