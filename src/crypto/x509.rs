//! X.509 parsing and metadata extraction.
//!
//! All extractors are purely functional over DER bytes; the SHA-256
//! fingerprint of the DER body is the canonical certificate identity
//! everywhere in the system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::error::{PkdError, Result};

/// Everything the trust store wants to know about one certificate.
#[derive(Debug, Clone)]
pub struct CertificateMetadata {
    /// X.509 version as displayed (1/2/3).
    pub version: u32,
    /// Uppercase hex, no leading zero octets beyond DER encoding.
    pub serial: String,
    pub subject_dn: String,
    pub issuer_dn: String,
    pub subject_country: Option<String>,
    pub signature_algorithm_oid: String,
    pub signature_hash_algorithm: String,
    pub public_key_algorithm: String,
    pub public_key_size: Option<u32>,
    pub public_key_curve: Option<String>,
    pub key_usage: Vec<String>,
    /// Dotted OID strings.
    pub extended_key_usage: Vec<String>,
    pub is_ca: bool,
    pub path_len_constraint: Option<u32>,
    pub ski: Option<String>,
    pub aki: Option<String>,
    pub crl_distribution_points: Vec<String>,
    pub ocsp_url: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub self_signed: bool,
}

/// Parsed CRL attributes plus the revoked-serial list.
#[derive(Debug, Clone)]
pub struct CrlInfo {
    pub issuer_dn: String,
    pub issuer_country: Option<String>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    /// Uppercase hex CRL number, when the extension is present.
    pub crl_number: Option<String>,
    pub revoked: Vec<RevokedInfo>,
}

#[derive(Debug, Clone)]
pub struct RevokedInfo {
    pub serial: String,
    pub revoked_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// SHA-256 over the DER body, 64 lowercase hex characters.
pub fn fingerprint_hex(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    format!("{:x}", hasher.finalize())
}

/// Decode one or many certificates from PEM envelopes or naked DER.
///
/// Returns the DER bodies in input order. Rejects data that is neither a
/// PEM `CERTIFICATE` block nor an ASN.1 SEQUENCE that parses as X.509.
pub fn decode_certificates(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    if bytes.starts_with(b"-----BEGIN ") {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| PkdError::parse("PEM", 0, format!("not valid UTF-8: {e}")))?;
        let blocks = ::pem::parse_many(text)
            .map_err(|e| PkdError::parse("PEM", 0, e.to_string()))?;
        let mut out = Vec::new();
        for block in blocks {
            if block.tag() != "CERTIFICATE" {
                continue;
            }
            let der = block.contents().to_vec();
            // Must actually be X.509, not just any DER.
            X509Certificate::from_der(&der)
                .map_err(|e| PkdError::parse("PEM certificate", 0, e.to_string()))?;
            out.push(der);
        }
        if out.is_empty() {
            return Err(PkdError::parse("PEM", 0, "no CERTIFICATE block found"));
        }
        return Ok(out);
    }

    X509Certificate::from_der(bytes)
        .map_err(|e| PkdError::parse("DER certificate", 0, e.to_string()))?;
    Ok(vec![bytes.to_vec()])
}

/// Render one certificate as a PEM `CERTIFICATE` block.
pub fn der_to_pem(der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new("CERTIFICATE", der.to_vec()))
}

fn asn1_time(t: &x509_parser::time::ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(t.timestamp(), 0)
        .ok_or_else(|| PkdError::parse("validity", 0, "timestamp out of range"))
}

fn serial_hex(raw: &[u8]) -> String {
    let trimmed: &[u8] = {
        let mut s = raw;
        while s.len() > 1 && s[0] == 0 {
            s = &s[1..];
        }
        s
    };
    hex::encode_upper(trimmed)
}

/// Map a signature algorithm OID to the digest it implies.
fn signature_hash_name(oid: &str) -> &'static str {
    match oid {
        "1.2.840.113549.1.1.5" | "1.2.840.10045.4.1" => "SHA-1",
        "1.2.840.113549.1.1.11" | "1.2.840.10045.4.3.2" => "SHA-256",
        "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => "SHA-384",
        "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => "SHA-512",
        "1.2.840.113549.1.1.10" => "PSS",
        "1.3.101.112" => "SHA-512",
        _ => "UNKNOWN",
    }
}

fn curve_name(oid: &str) -> Option<&'static str> {
    match oid {
        "1.2.840.10045.3.1.7" => Some("P-256"),
        "1.3.132.0.34" => Some("P-384"),
        "1.3.132.0.35" => Some("P-521"),
        "1.2.840.10045.3.1.1" => Some("P-192"),
        _ => None,
    }
}

/// RFC 2253 string form of a distinguished name: most-specific RDN first,
/// short attribute names where they exist, dotted OIDs otherwise.
pub fn dn_to_rfc2253(name: &X509Name) -> String {
    let mut parts: Vec<String> = Vec::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let key = match attr.attr_type().to_id_string().as_str() {
                "2.5.4.3" => "CN".to_string(),
                "2.5.4.6" => "C".to_string(),
                "2.5.4.7" => "L".to_string(),
                "2.5.4.8" => "ST".to_string(),
                "2.5.4.10" => "O".to_string(),
                "2.5.4.11" => "OU".to_string(),
                "2.5.4.5" => "serialNumber".to_string(),
                "1.2.840.113549.1.9.1" => "emailAddress".to_string(),
                "0.9.2342.19200300.100.1.25" => "DC".to_string(),
                other => other.to_string(),
            };
            let value = attr
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| format!("#{}", hex::encode(attr.attr_value().data.as_ref())));
            parts.push(format!("{key}={value}"));
        }
    }
    parts.reverse();
    parts.join(",")
}

/// ASN.1-aware DN equality: same RDN sequence, attribute values compared by
/// decoded string where both decode (so PrintableString vs UTF8String with
/// the same text compare equal), raw bytes otherwise.
pub fn dn_equal(a: &X509Name, b: &X509Name) -> bool {
    let a_rdns: Vec<_> = a.iter().collect();
    let b_rdns: Vec<_> = b.iter().collect();
    if a_rdns.len() != b_rdns.len() {
        return false;
    }
    for (ra, rb) in a_rdns.iter().zip(b_rdns.iter()) {
        let aa: Vec<_> = ra.iter().collect();
        let bb: Vec<_> = rb.iter().collect();
        if aa.len() != bb.len() {
            return false;
        }
        for (x, y) in aa.iter().zip(bb.iter()) {
            if x.attr_type() != y.attr_type() {
                return false;
            }
            match (x.as_str(), y.as_str()) {
                (Ok(xs), Ok(ys)) => {
                    if xs != ys {
                        return false;
                    }
                }
                _ => {
                    if x.attr_value().data != y.attr_value().data {
                        return false;
                    }
                }
            }
        }
    }
    true
}

/// Normalised DN used only for cross-store matching when string forms
/// differ: keeps {C, O, OU, CN, serialNumber}, strips whitespace, lowercases,
/// sorts, joins with `|`.
pub fn normalize_dn_for_comparison(dn: &str) -> String {
    let mut kept: Vec<String> = dn
        .split(',')
        .filter_map(|component| {
            let component = component.trim();
            let (key, value) = component.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            match key.as_str() {
                "c" | "o" | "ou" | "cn" | "serialnumber" => {
                    let value: String = value
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect::<String>()
                        .to_lowercase();
                    Some(format!("{key}={value}"))
                }
                _ => None,
            }
        })
        .collect();
    kept.sort();
    kept.join("|")
}

/// Structural self-signed check: subject DN equals issuer DN. Whether the
/// self-signature actually verifies is the chain validator's concern.
pub fn is_self_signed(cert: &X509Certificate) -> bool {
    dn_equal(cert.subject(), cert.issuer())
}

/// Extract the complete metadata record for one DER certificate.
pub fn extract_metadata(der: &[u8]) -> Result<CertificateMetadata> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| PkdError::parse("DER certificate", 0, e.to_string()))?;

    let subject_dn = dn_to_rfc2253(cert.subject());
    let issuer_dn = dn_to_rfc2253(cert.issuer());
    let subject_country = cert
        .subject()
        .iter_country()
        .next()
        .and_then(|c| c.as_str().ok())
        .map(|s| s.trim().to_ascii_uppercase());

    let signature_algorithm_oid = cert.signature_algorithm.algorithm.to_id_string();

    // Public key algorithm, size and (for EC) curve.
    let spki = cert.public_key();
    let (public_key_algorithm, public_key_size, public_key_curve) = match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => ("RSA".to_string(), Some(rsa.key_size() as u32), None),
        Ok(PublicKey::EC(point)) => {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .and_then(|oid| curve_name(&oid.to_id_string()))
                .map(|s| s.to_string());
            ("EC".to_string(), Some(point.key_size() as u32), curve)
        }
        Ok(PublicKey::DSA(_)) => ("DSA".to_string(), None, None),
        _ => (
            spki.algorithm.algorithm.to_id_string(),
            None,
            None,
        ),
    };

    // Basic constraints.
    let (is_ca, path_len_constraint) = match cert.basic_constraints() {
        Ok(Some(bc)) => (bc.value.ca, bc.value.path_len_constraint),
        _ => (false, None),
    };

    // Key usage bit names, same vocabulary as the directory consumers use.
    let key_usage = match cert.key_usage() {
        Ok(Some(ku)) => {
            let ku = ku.value;
            let mut usages = Vec::new();
            if ku.digital_signature() {
                usages.push("digitalSignature".to_string());
            }
            if ku.non_repudiation() {
                usages.push("nonRepudiation".to_string());
            }
            if ku.key_encipherment() {
                usages.push("keyEncipherment".to_string());
            }
            if ku.data_encipherment() {
                usages.push("dataEncipherment".to_string());
            }
            if ku.key_agreement() {
                usages.push("keyAgreement".to_string());
            }
            if ku.key_cert_sign() {
                usages.push("keyCertSign".to_string());
            }
            if ku.crl_sign() {
                usages.push("cRLSign".to_string());
            }
            if ku.encipher_only() {
                usages.push("encipherOnly".to_string());
            }
            if ku.decipher_only() {
                usages.push("decipherOnly".to_string());
            }
            usages
        }
        _ => Vec::new(),
    };

    // EKU as dotted OIDs so policy OIDs (ICAO MLSC / DVL signer) survive.
    let extended_key_usage = match cert.extended_key_usage() {
        Ok(Some(eku)) => {
            let eku = eku.value;
            let mut oids = Vec::new();
            if eku.any {
                oids.push("2.5.29.37.0".to_string());
            }
            if eku.server_auth {
                oids.push("1.3.6.1.5.5.7.3.1".to_string());
            }
            if eku.client_auth {
                oids.push("1.3.6.1.5.5.7.3.2".to_string());
            }
            if eku.code_signing {
                oids.push("1.3.6.1.5.5.7.3.3".to_string());
            }
            if eku.email_protection {
                oids.push("1.3.6.1.5.5.7.3.4".to_string());
            }
            if eku.time_stamping {
                oids.push("1.3.6.1.5.5.7.3.8".to_string());
            }
            if eku.ocsp_signing {
                oids.push("1.3.6.1.5.5.7.3.9".to_string());
            }
            for oid in &eku.other {
                oids.push(oid.to_id_string());
            }
            oids
        }
        _ => Vec::new(),
    };

    let mut ski = None;
    let mut aki = None;
    let mut crl_distribution_points = Vec::new();
    let mut ocsp_url = None;
    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(id) => {
                ski = Some(hex::encode_upper(id.0));
            }
            ParsedExtension::AuthorityKeyIdentifier(id) => {
                if let Some(key_id) = &id.key_identifier {
                    aki = Some(hex::encode_upper(key_id.0));
                }
            }
            ParsedExtension::CRLDistributionPoints(points) => {
                for point in points.points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point
                    {
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_distribution_points.push(uri.to_string());
                            }
                        }
                    }
                }
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                for desc in &aia.accessdescs {
                    if desc.access_method.to_id_string() == "1.3.6.1.5.5.7.48.1" {
                        if let GeneralName::URI(uri) = &desc.access_location {
                            ocsp_url = Some(uri.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let not_before = asn1_time(&cert.validity().not_before)?;
    let not_after = asn1_time(&cert.validity().not_after)?;
    if not_before > not_after {
        return Err(PkdError::Validation(format!(
            "malformed validity interval for {subject_dn}: notBefore > notAfter"
        )));
    }

    Ok(CertificateMetadata {
        version: cert.version().0 + 1,
        serial: serial_hex(cert.raw_serial()),
        subject_dn,
        issuer_dn,
        subject_country,
        signature_hash_algorithm: signature_hash_name(&signature_algorithm_oid).to_string(),
        signature_algorithm_oid,
        public_key_algorithm,
        public_key_size,
        public_key_curve,
        key_usage,
        extended_key_usage,
        is_ca,
        path_len_constraint: path_len_constraint.map(|p| p as u32),
        ski,
        aki,
        crl_distribution_points,
        ocsp_url,
        not_before,
        not_after,
        self_signed: is_self_signed(&cert),
    })
}

fn reason_name(code: u8) -> &'static str {
    match code {
        0 => "unspecified",
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => "unknown",
    }
}

/// Parse a DER CRL into its store attributes and revoked-serial list.
pub fn parse_crl_info(der: &[u8]) -> Result<CrlInfo> {
    let (_, crl) = CertificateRevocationList::from_der(der)
        .map_err(|e| PkdError::parse("DER CRL", 0, e.to_string()))?;

    let issuer = crl.issuer();
    let issuer_dn = dn_to_rfc2253(issuer);
    let issuer_country = issuer
        .iter_country()
        .next()
        .and_then(|c| c.as_str().ok())
        .map(|s| s.trim().to_ascii_uppercase());

    let this_update = asn1_time(&crl.last_update())?;
    let next_update = match crl.next_update() {
        Some(t) => Some(asn1_time(&t)?),
        None => None,
    };

    let crl_number = crl.crl_number().map(|n| {
        let bytes = n.to_bytes_be();
        serial_hex(&bytes)
    });

    let mut revoked = Vec::new();
    for entry in crl.iter_revoked_certificates() {
        let reason = entry
            .reason_code()
            .map(|(_, r)| reason_name(r.0 as u8).to_string());
        revoked.push(RevokedInfo {
            serial: serial_hex(entry.raw_serial()),
            revoked_at: asn1_time(&entry.revocation_date)?,
            reason,
        });
    }

    Ok(CrlInfo {
        issuer_dn,
        issuer_country,
        this_update,
        next_update,
        crl_number,
        revoked,
    })
}
