pub mod cms;
pub mod signature;
pub mod x509;

pub use cms::{parse_cms, parse_master_list_content, strip_application_wrapper, ParsedCms};
pub use signature::{verify_certificate_signature, verify_crl_signature, VerifyOutcome};
pub use x509::{
    decode_certificates, extract_metadata, fingerprint_hex, normalize_dn_for_comparison,
    parse_crl_info, CertificateMetadata, CrlInfo,
};
