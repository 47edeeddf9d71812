//! Streaming LDIF (RFC 2849) parser.
//!
//! Handles line folding (continuation lines start with one space), base64
//! attributes (`attr:: b64`, tolerating CR/LF padding inside the payload),
//! comments and the `version:` header. Only the features the ICAO bundles
//! use are implemented; `attr:< url` references are reported as entry
//! errors, not fetched.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{PkdError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdifValue {
    Text(String),
    Binary(Vec<u8>),
}

impl LdifValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            LdifValue::Text(s) => s.as_bytes(),
            LdifValue::Binary(b) => b,
        }
    }
}

/// One LDIF entry: its DN plus the attribute multimap in file order.
#[derive(Debug, Clone)]
pub struct LdifEntry {
    pub dn: String,
    pub attributes: Vec<(String, LdifValue)>,
}

impl LdifEntry {
    /// Attribute lookup ignoring case and options, so `userCertificate;binary`
    /// matches a query for `userCertificate`.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a LdifValue> + 'a {
        self.attributes.iter().filter_map(move |(attr, value)| {
            let base = attr.split(';').next().unwrap_or(attr);
            if base.eq_ignore_ascii_case(name) {
                Some(value)
            } else {
                None
            }
        })
    }

    pub fn first_binary<'a>(&'a self, name: &'a str) -> Option<&'a [u8]> {
        self.values(name).next().map(|v| v.as_bytes())
    }

    pub fn object_classes(&self) -> Vec<String> {
        self.values("objectClass")
            .filter_map(|v| match v {
                LdifValue::Text(s) => Some(s.clone()),
                LdifValue::Binary(_) => None,
            })
            .collect()
    }

    pub fn has_object_class(&self, name: &str) -> bool {
        self.object_classes()
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(name))
    }
}

/// Quick structural sniff used by format autodetection: a `version:` header
/// or a `dn:` line within the leading non-comment lines.
pub fn looks_like_ldif(bytes: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(&bytes[..bytes.len().min(4096)]) else {
        return false;
    };
    text.lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .take(20)
        .any(|l| l.starts_with("version:") || l.starts_with("dn:"))
}

/// Join folded lines: a line starting with a single space continues the
/// previous logical line.
fn unfold(text: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();
    for raw in text.lines() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix(' ') {
            if let Some(last) = logical.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        logical.push(line.to_string());
    }
    logical
}

fn decode_base64_payload(payload: &str) -> Result<Vec<u8>> {
    // Some producers pad the folded payload with stray CR/LF or spaces.
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| PkdError::parse("LDIF base64", 0, e.to_string()))
}

fn parse_attribute(line: &str, line_no: usize) -> Result<(String, LdifValue)> {
    let (name, rest) = line.split_once(':').ok_or_else(|| {
        PkdError::parse("LDIF", line_no, format!("attribute line without colon: {line}"))
    })?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(PkdError::parse("LDIF", line_no, "empty attribute name"));
    }
    if let Some(b64) = rest.strip_prefix(':') {
        let value = decode_base64_payload(b64.trim_start())?;
        return Ok((name, LdifValue::Binary(value)));
    }
    if rest.starts_with('<') {
        return Err(PkdError::parse(
            "LDIF",
            line_no,
            format!("URL-valued attribute not supported: {name}"),
        ));
    }
    Ok((name, LdifValue::Text(rest.trim_start().to_string())))
}

/// Parse a complete LDIF document into entries, in file order.
///
/// A malformed line inside one entry fails that entry only; the error is
/// returned alongside so the caller can record it and continue.
pub fn parse_ldif(bytes: &[u8]) -> Result<(Vec<LdifEntry>, Vec<(usize, PkdError)>)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PkdError::parse("LDIF", 0, format!("not valid UTF-8: {e}")))?;

    let mut entries = Vec::new();
    let mut errors: Vec<(usize, PkdError)> = Vec::new();

    let mut current: Option<LdifEntry> = None;
    let mut entry_poisoned = false;

    for (line_no, line) in unfold(text).into_iter().enumerate() {
        let trimmed_end = line.trim_end();
        if trimmed_end.is_empty() {
            if let Some(entry) = current.take() {
                if !entry_poisoned {
                    entries.push(entry);
                }
            }
            entry_poisoned = false;
            continue;
        }
        if trimmed_end.starts_with('#') {
            continue;
        }
        if current.is_none() && trimmed_end.starts_with("version:") {
            continue;
        }
        // changetype records are not expected in PKD bundles; skip them but
        // keep the entry.
        if trimmed_end.starts_with("changetype:") {
            continue;
        }

        if let Some(dn_value) = trimmed_end.strip_prefix("dn::") {
            let decoded = match decode_base64_payload(dn_value.trim_start()) {
                Ok(d) => d,
                Err(e) => {
                    errors.push((line_no, e));
                    entry_poisoned = true;
                    current = Some(LdifEntry {
                        dn: String::new(),
                        attributes: Vec::new(),
                    });
                    continue;
                }
            };
            let dn = String::from_utf8_lossy(&decoded).to_string();
            current = Some(LdifEntry {
                dn,
                attributes: Vec::new(),
            });
            continue;
        }
        if let Some(dn_value) = trimmed_end.strip_prefix("dn:") {
            current = Some(LdifEntry {
                dn: dn_value.trim().to_string(),
                attributes: Vec::new(),
            });
            continue;
        }

        match current.as_mut() {
            Some(entry) => match parse_attribute(trimmed_end, line_no) {
                Ok((name, value)) => entry.attributes.push((name, value)),
                Err(e) => {
                    errors.push((line_no, e));
                    entry_poisoned = true;
                }
            },
            None => {
                errors.push((
                    line_no,
                    PkdError::parse("LDIF", line_no, "attribute line outside entry"),
                ));
            }
        }
    }
    if let Some(entry) = current.take() {
        if !entry_poisoned {
            entries.push(entry);
        }
    }

    Ok((entries, errors))
}

/// Re-export one certificate entry as LDIF, used when serving bundles back
/// out. The binary attribute bytes round-trip unchanged.
pub fn certificate_entry_to_ldif(dn: &str, der: &[u8]) -> String {
    let mut out = String::new();
    out.push_str(&format!("dn: {dn}\n"));
    out.push_str("objectClass: top\n");
    out.push_str("objectClass: pkdDownload\n");
    let encoded = BASE64.encode(der);
    out.push_str("userCertificate;binary:: ");
    // RFC 2849 folding at 76 columns.
    let mut first = true;
    for chunk in encoded.as_bytes().chunks(76) {
        if !first {
            out.push_str("\n ");
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        first = false;
    }
    out.push('\n');
    out
}
