//! File ingest pipeline.
//!
//! Converts any supported input (PEM/DER certificates, DER CRLs, CMS Master
//! Lists / Deviation Lists, LDIF bundles) into persisted trust material,
//! associated with one UploadedFile. Entries are processed in file order;
//! per-entry failures are recorded and processing continues, while a
//! catastrophic format error marks the whole upload FAILED.

pub mod ldif;
pub mod masterlist;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::classifier::{classify_metadata, CountryPolicy};
use crate::crypto::cms::{parse_cms, OID_ICAO_DEVIATION_LIST};
use crate::crypto::x509::{
    decode_certificates, extract_metadata, fingerprint_hex, normalize_dn_for_comparison,
    parse_crl_info,
};
use crate::error::{PkdError, Result};
use crate::models::{
    CertType, CertificateRecord, CrlRecord, FileFormat, ParsingError, UploadStatus, UploadedFile,
};
use crate::store::TrustStore;

use ldif::{looks_like_ldif, parse_ldif};
use masterlist::parse_list;

/// Result of one ingest: the final UploadedFile record plus the per-entry
/// diagnostics accumulated along the way.
#[derive(Debug)]
pub struct IngestOutcome {
    pub upload: UploadedFile,
    pub parsing_errors: Vec<ParsingError>,
}

/// Detect the input format, content first, extension as a hint only.
pub fn detect_format(filename: &str, bytes: &[u8]) -> FileFormat {
    if bytes.starts_with(b"-----BEGIN ") {
        return FileFormat::Pem;
    }
    if looks_like_ldif(bytes) {
        return FileFormat::Ldif;
    }
    match bytes.first() {
        Some(0x30) | Some(0x77) => {
            if x509_parser::parse_x509_certificate(bytes).is_ok() {
                return FileFormat::Der;
            }
            if x509_parser::parse_x509_crl(bytes).is_ok() {
                return FileFormat::Der;
            }
            if let Ok(cms) = parse_cms(bytes) {
                if cms.econtent_type == OID_ICAO_DEVIATION_LIST {
                    return FileFormat::DeviationList;
                }
                return FileFormat::MasterList;
            }
            // The extension hint only breaks ties the content could not.
            let lower = filename.to_ascii_lowercase();
            if lower.ends_with(".ml") || lower.ends_with(".mls") {
                return FileFormat::MasterList;
            }
            FileFormat::Unknown
        }
        _ => FileFormat::Unknown,
    }
}

fn canonical_filename(original: &str) -> String {
    original
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn collection_number(filename: &str) -> Option<(String, bool)> {
    // 001 = DSC/CRL, 002 = Master List, 003 = non-conformant DSC.
    let re = Regex::new(r"icaopkd-00([123])-complete-(\d+)\.ldif$").ok()?;
    let lower = filename.to_ascii_lowercase();
    let caps = re.captures(&lower)?;
    let nc = &caps[1] == "3";
    Some((caps[2].to_string(), nc))
}

/// Drives format-specific parsers and persists the resulting records.
pub struct IngestPipeline {
    store: Arc<dyn TrustStore>,
    policy: CountryPolicy,
}

struct IngestRun {
    upload: UploadedFile,
    parsing_errors: Vec<ParsingError>,
    seen_fingerprints: HashSet<String>,
}

impl IngestRun {
    fn record_error(&mut self, entry_dn: Option<String>, code: &str, message: String) {
        self.upload.counters.errors += 1;
        log::warn!(
            "ingest {}: {} ({}): {}",
            self.upload.id,
            code,
            entry_dn.as_deref().unwrap_or("-"),
            message
        );
        self.parsing_errors.push(ParsingError {
            entry_dn,
            code: code.to_string(),
            message,
        });
    }
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn TrustStore>, policy: CountryPolicy) -> Self {
        IngestPipeline { store, policy }
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestOutcome> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        self.ingest_bytes(&filename, &bytes).await
    }

    /// Ingest one file. Duplicate content (same SHA-256) is rejected with a
    /// conflict before any parsing happens.
    pub async fn ingest_bytes(&self, original_filename: &str, bytes: &[u8]) -> Result<IngestOutcome> {
        let content_sha256 = fingerprint_hex(bytes);
        if self
            .store
            .upload_by_content_hash(&content_sha256)
            .await?
            .is_some()
        {
            return Err(PkdError::Conflict(format!(
                "file already ingested (content hash {content_sha256})"
            )));
        }

        let format = detect_format(original_filename, bytes);
        let (collection, nc_collection) =
            collection_number(original_filename).map_or((None, false), |(n, nc)| (Some(n), nc));

        let mut upload = UploadedFile {
            id: Uuid::new_v4(),
            original_filename: original_filename.to_string(),
            canonical_filename: canonical_filename(original_filename),
            content_sha256,
            size_bytes: bytes.len() as u64,
            format,
            status: UploadStatus::Pending,
            counters: Default::default(),
            collection_number: collection,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        self.store.insert_upload(&upload).await?;

        upload.status = UploadStatus::Processing;
        self.store.update_upload(&upload).await?;

        let mut run = IngestRun {
            upload,
            parsing_errors: Vec::new(),
            seen_fingerprints: HashSet::new(),
        };

        let outcome = match format {
            FileFormat::Pem | FileFormat::Der => self.ingest_raw(&mut run, bytes).await,
            FileFormat::Ldif => self.ingest_ldif(&mut run, bytes, nc_collection).await,
            FileFormat::MasterList | FileFormat::DeviationList => {
                self.ingest_list(&mut run, bytes).await
            }
            FileFormat::Unknown => Err(PkdError::parse(
                "upload",
                0,
                "unrecognised file format (not PEM, DER, CMS or LDIF)",
            )),
        };

        match outcome {
            Ok(()) => {
                run.upload.status = UploadStatus::Completed;
                run.upload.completed_at = Some(Utc::now());
            }
            Err(e) => {
                run.upload.status = UploadStatus::Failed;
                run.upload.completed_at = Some(Utc::now());
                run.upload.error_message = Some(e.to_string());
                log::error!("ingest {} failed: {}", run.upload.id, e);
            }
        }
        self.store.update_upload(&run.upload).await?;

        Ok(IngestOutcome {
            upload: run.upload,
            parsing_errors: run.parsing_errors,
        })
    }

    async fn ingest_raw(&self, run: &mut IngestRun, bytes: &[u8]) -> Result<()> {
        // A naked DER input may be a CRL rather than a certificate.
        if !bytes.starts_with(b"-----BEGIN ") && x509_parser::parse_x509_crl(bytes).is_ok() {
            self.process_crl(run, bytes, None).await?;
            return Ok(());
        }
        let certs = decode_certificates(bytes)?;
        for der in certs {
            self.process_certificate(run, &der, None, false, true).await?;
        }
        Ok(())
    }

    async fn ingest_ldif(&self, run: &mut IngestRun, bytes: &[u8], nc: bool) -> Result<()> {
        let (entries, line_errors) = parse_ldif(bytes)?;
        for (line, error) in line_errors {
            run.record_error(None, "LDIF_LINE", format!("line {line}: {error}"));
        }
        for entry in entries {
            let dn = entry.dn.clone();
            if let Some(cert) = entry.first_binary("userCertificate") {
                let der = cert.to_vec();
                self.process_certificate(run, &der, Some(dn), nc, true).await?;
            } else if let Some(crl) = entry.first_binary("certificateRevocationList") {
                let der = crl.to_vec();
                self.process_crl(run, &der, Some(dn)).await?;
            } else if entry.has_object_class("pkdDownload")
                || entry.has_object_class("cRLDistributionPoint")
            {
                run.record_error(
                    Some(dn),
                    "MISSING_BINARY_ATTRIBUTE",
                    "entry advertises trust material but carries no binary attribute".to_string(),
                );
            }
            // Structural container entries (countries, organisational units)
            // are skipped silently.
        }
        Ok(())
    }

    async fn ingest_list(&self, run: &mut IngestRun, bytes: &[u8]) -> Result<()> {
        let list = parse_list(bytes)?;
        run.upload.counters.master_lists += 1;

        if !list.signature_verified {
            run.record_error(
                None,
                "CMS_SIGNATURE",
                list.signature_error
                    .clone()
                    .unwrap_or_else(|| "list signature did not verify".to_string()),
            );
        }

        if let Some(signer_der) = &list.signer_der {
            self.process_certificate(run, signer_der, None, false, list.signature_verified)
                .await?;
        }
        for der in &list.content_certs {
            self.process_certificate(run, der, None, false, list.signature_verified)
                .await?;
        }
        Ok(())
    }

    async fn process_certificate(
        &self,
        run: &mut IngestRun,
        der: &[u8],
        entry_dn: Option<String>,
        nc_collection: bool,
        source_verified: bool,
    ) -> Result<()> {
        let fingerprint = fingerprint_hex(der);
        if !run.seen_fingerprints.insert(fingerprint.clone()) {
            run.upload.counters.duplicates += 1;
            return Ok(());
        }

        let metadata = match extract_metadata(der) {
            Ok(m) => m,
            Err(e) => {
                run.record_error(entry_dn, "CERT_PARSE", e.to_string());
                return Ok(());
            }
        };
        let classification =
            match classify_metadata(&metadata, fingerprint.clone(), self.policy) {
                Ok(c) => c,
                Err(e) => {
                    run.record_error(entry_dn, "CERT_CLASSIFY", e.to_string());
                    return Ok(());
                }
            };
        if let Some(warning) = &classification.country_warning {
            log::warn!("ingest {}: {}", run.upload.id, warning);
        }

        // Container-level non-conformant tagging: only plain DSCs are
        // re-tagged; CSCAs or list signers inside an NC bundle keep their
        // class.
        let cert_type = if nc_collection && classification.cert_type == CertType::Dsc {
            CertType::DscNc
        } else {
            classification.cert_type
        };

        if cert_type == CertType::Csca && !metadata.key_usage.iter().any(|u| u == "keyCertSign") {
            run.record_error(
                entry_dn,
                "CSCA_KEY_USAGE",
                format!(
                    "self-signed CA without keyCertSign rejected: {}",
                    metadata.subject_dn
                ),
            );
            return Ok(());
        }

        let record = CertificateRecord {
            id: Uuid::new_v4(),
            fingerprint,
            der: der.to_vec(),
            cert_type,
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
            source_verified,
            stored_in_directory: false,
            deleted: false,
            first_ingested_at: Utc::now(),
            source_upload_id: Some(run.upload.id),
        };

        let outcome = self.store.insert_certificate_if_absent(&record).await?;
        if outcome.inserted {
            run.upload.counters.record_cert(cert_type);
        } else {
            run.upload.counters.duplicates += 1;
        }
        Ok(())
    }

    async fn process_crl(
        &self,
        run: &mut IngestRun,
        der: &[u8],
        entry_dn: Option<String>,
    ) -> Result<()> {
        let fingerprint = fingerprint_hex(der);
        if !run.seen_fingerprints.insert(fingerprint.clone()) {
            run.upload.counters.duplicates += 1;
            return Ok(());
        }

        let info = match parse_crl_info(der) {
            Ok(i) => i,
            Err(e) => {
                run.record_error(entry_dn, "CRL_PARSE", e.to_string());
                return Ok(());
            }
        };
        let Some(country) = info.issuer_country.clone() else {
            run.record_error(
                entry_dn,
                "CRL_COUNTRY",
                format!("CRL issuer without country: {}", info.issuer_dn),
            );
            return Ok(());
        };

        let issuer_dn_normalized = normalize_dn_for_comparison(&info.issuer_dn);
        // The issuer should correspond to a stored CSCA subject; bundles may
        // carry the CRL before its CSCA, so a miss is a warning, not a
        // rejection.
        if self
            .store
            .cscas_by_subject(&issuer_dn_normalized)
            .await?
            .is_empty()
        {
            log::warn!(
                "ingest {}: CRL issuer has no stored CSCA yet: {}",
                run.upload.id,
                info.issuer_dn
            );
        }

        let record = CrlRecord {
            id: Uuid::new_v4(),
            fingerprint,
            der: der.to_vec(),
            issuer_dn: info.issuer_dn,
            issuer_dn_normalized,
            country,
            this_update: info.this_update,
            next_update: info.next_update,
            crl_number: info.crl_number,
            revoked: info
                .revoked
                .into_iter()
                .map(|r| crate::models::RevokedEntry {
                    serial: r.serial,
                    revoked_at: r.revoked_at,
                    reason: r.reason,
                })
                .collect(),
            stored_in_directory: false,
            first_ingested_at: Utc::now(),
            source_upload_id: Some(run.upload.id),
        };

        let outcome = self.store.insert_crl_if_absent(&record).await?;
        if outcome.inserted {
            run.upload.counters.crl += 1;
        } else {
            run.upload.counters.duplicates += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_number_extraction() {
        let (number, nc) = collection_number("icaopkd-001-complete-005973.ldif").unwrap();
        assert_eq!(number, "005973");
        assert!(!nc);

        let (number, nc) = collection_number("ICAOPKD-003-COMPLETE-000118.LDIF").unwrap();
        assert_eq!(number, "000118");
        assert!(nc);

        assert!(collection_number("random.ldif").is_none());
    }

    #[test]
    fn canonical_filename_sanitizes() {
        assert_eq!(
            canonical_filename("my upload (1).ldif"),
            "my_upload__1_.ldif"
        );
        assert_eq!(canonical_filename("ok-name_1.pem"), "ok-name_1.pem");
    }

    #[test]
    fn unknown_bytes_detected_as_unknown() {
        assert_eq!(detect_format("x.bin", b"garbage"), FileFormat::Unknown);
        assert_eq!(
            detect_format("x.pem", b"-----BEGIN CERTIFICATE-----"),
            FileFormat::Pem
        );
    }
}
