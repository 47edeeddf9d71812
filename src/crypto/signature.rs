//! Signature verification for certificates, CRLs and CMS signer infos.
//!
//! The signature algorithm OID is mapped to a concrete `ring` verification
//! algorithm; unknown OIDs are rejected rather than guessed so algorithm
//! confusion is impossible. Cryptographic failures are terminal - they are
//! never retried.

use ring::signature;
use x509_parser::prelude::*;

/// Boolean verdict plus a diagnostic reason for the failing case.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub reason: Option<String>,
}

impl VerifyOutcome {
    pub fn ok() -> Self {
        VerifyOutcome {
            valid: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        VerifyOutcome {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// ECDSA needs the issuer's curve as well as the digest to pick a verifier.
fn ecdsa_algorithm(
    curve_oid: &str,
    hash_oid: &str,
) -> Option<&'static dyn signature::VerificationAlgorithm> {
    match (curve_oid, hash_oid) {
        ("1.2.840.10045.3.1.7", "1.2.840.10045.4.3.2") => Some(&signature::ECDSA_P256_SHA256_ASN1),
        ("1.2.840.10045.3.1.7", "1.2.840.10045.4.3.3") => Some(&signature::ECDSA_P256_SHA384_ASN1),
        ("1.3.132.0.34", "1.2.840.10045.4.3.2") => Some(&signature::ECDSA_P384_SHA256_ASN1),
        ("1.3.132.0.34", "1.2.840.10045.4.3.3") => Some(&signature::ECDSA_P384_SHA384_ASN1),
        _ => None,
    }
}

/// Verify `signature_value` over `message` with the issuer SPKI.
///
/// `spki` is the issuer's SubjectPublicKeyInfo as parsed by x509-parser;
/// ring consumes the BIT STRING payload (RSAPublicKey for RSA, uncompressed
/// point for EC, raw key for Ed25519).
pub fn verify_with_spki(
    spki: &SubjectPublicKeyInfo,
    signature_oid: &str,
    message: &[u8],
    signature_value: &[u8],
) -> VerifyOutcome {
    let public_key_bytes: &[u8] = &spki.subject_public_key.data;

    // RSASSA-PSS carries its digest in the algorithm parameters; the
    // supported digests are tried in turn instead of parsing the parameter
    // structure.
    if signature_oid == "1.2.840.113549.1.1.10" {
        for alg in [
            &signature::RSA_PSS_2048_8192_SHA256 as &'static dyn signature::VerificationAlgorithm,
            &signature::RSA_PSS_2048_8192_SHA384,
            &signature::RSA_PSS_2048_8192_SHA512,
        ] {
            let key = signature::UnparsedPublicKey::new(alg, public_key_bytes);
            if key.verify(message, signature_value).is_ok() {
                return VerifyOutcome::ok();
            }
        }
        return VerifyOutcome::fail("RSASSA-PSS signature verification failed");
    }

    let algorithm: &'static dyn signature::VerificationAlgorithm = match signature_oid {
        // RSA PKCS#1 v1.5 (RFC 4055). SHA-1 appears only in legacy ICAO
        // material, hence the legacy-only verifier with the low key floor.
        "1.2.840.113549.1.1.5" => &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
        "1.2.840.113549.1.1.11" => &signature::RSA_PKCS1_2048_8192_SHA256,
        "1.2.840.113549.1.1.12" => &signature::RSA_PKCS1_2048_8192_SHA384,
        "1.2.840.113549.1.1.13" => &signature::RSA_PKCS1_2048_8192_SHA512,
        // Ed25519 (RFC 8410).
        "1.3.101.112" => &signature::ED25519,
        // ECDSA (RFC 5758): dispatch on the issuer curve.
        oid @ ("1.2.840.10045.4.3.2" | "1.2.840.10045.4.3.3") => {
            let curve_oid = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|o| o.to_id_string());
            match curve_oid.as_deref().and_then(|c| ecdsa_algorithm(c, oid)) {
                Some(alg) => alg,
                None => {
                    return VerifyOutcome::fail(format!(
                        "unsupported ECDSA curve/hash combination for {oid}"
                    ))
                }
            }
        }
        other => {
            return VerifyOutcome::fail(format!("unsupported signature algorithm: {other}"));
        }
    };

    let key = signature::UnparsedPublicKey::new(algorithm, public_key_bytes);
    match key.verify(message, signature_value) {
        Ok(()) => VerifyOutcome::ok(),
        Err(_) => VerifyOutcome::fail(format!(
            "signature verification failed ({signature_oid})"
        )),
    }
}

/// Verify that `issuer_der`'s key signed `child_der` (TBSCertificate).
pub fn verify_certificate_signature(child_der: &[u8], issuer_der: &[u8]) -> VerifyOutcome {
    let (_, child) = match X509Certificate::from_der(child_der) {
        Ok(c) => c,
        Err(e) => return VerifyOutcome::fail(format!("certificate parse failed: {e}")),
    };
    let (_, issuer) = match X509Certificate::from_der(issuer_der) {
        Ok(c) => c,
        Err(e) => return VerifyOutcome::fail(format!("issuer parse failed: {e}")),
    };

    verify_with_spki(
        issuer.public_key(),
        &child.signature_algorithm.algorithm.to_id_string(),
        child.tbs_certificate.as_ref(),
        child.signature_value.as_ref(),
    )
}

/// Verify that `issuer_der`'s key signed `crl_der` (TBSCertList).
pub fn verify_crl_signature(crl_der: &[u8], issuer_der: &[u8]) -> VerifyOutcome {
    let (_, crl) = match CertificateRevocationList::from_der(crl_der) {
        Ok(c) => c,
        Err(e) => return VerifyOutcome::fail(format!("CRL parse failed: {e}")),
    };
    let (_, issuer) = match X509Certificate::from_der(issuer_der) {
        Ok(c) => c,
        Err(e) => return VerifyOutcome::fail(format!("issuer parse failed: {e}")),
    };

    verify_with_spki(
        issuer.public_key(),
        &crl.signature_algorithm.algorithm.to_id_string(),
        crl.tbs_cert_list.as_ref(),
        crl.signature_value.as_ref(),
    )
}
