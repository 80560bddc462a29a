use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::config::LoggerConfig;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref PHONE_REGEX: Regex =
        Regex::new(r"(?:\+1[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b").unwrap();
}

#[derive(Debug, Clone, Copy)]
enum PiiKind {
    Email,
    Ssn,
    Phone,
}

impl PiiKind {
    fn label(self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Ssn => "SSN",
            PiiKind::Phone => "PHONE",
        }
    }

    fn mask(self, value: &str) -> String {
        match self {
            PiiKind::Email => match value.split_once('@') {
                Some((local, domain)) => format!(
                    "{}***@{}***",
                    local.chars().next().unwrap_or('*'),
                    domain.chars().next().unwrap_or('*')
                ),
                None => "***@***".to_string(),
            },
            PiiKind::Ssn => "***-**-****".to_string(),
            PiiKind::Phone => "(***) ***-****".to_string(),
        }
    }
}

/// Redacts PII from free text before it reaches logs or the audit trail
#[derive(Debug, Clone)]
pub struct PiiRedactor {
    enabled: bool,
    hash_for_correlation: bool,
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new(&LoggerConfig::default())
    }
}

impl PiiRedactor {
    pub fn new(config: &LoggerConfig) -> Self {
        Self {
            enabled: config.redaction_enabled,
            hash_for_correlation: config.hash_for_correlation,
        }
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }

        // SSN runs before phone so 3-2-4 digit groups are labelled correctly
        let text = self.replace(&EMAIL_REGEX, text, PiiKind::Email);
        let text = self.replace(&SSN_REGEX, &text, PiiKind::Ssn);
        self.replace(&PHONE_REGEX, &text, PiiKind::Phone)
    }

    fn replace(&self, regex: &Regex, text: &str, kind: PiiKind) -> String {
        regex
            .replace_all(text, |caps: &Captures| {
                let value = &caps[0];
                if self.hash_for_correlation {
                    format!("{}[{}]", kind.label(), Self::hash_value(value))
                } else {
                    kind.mask(value)
                }
            })
            .into_owned()
    }

    fn hash_value(value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        // First 8 bytes are enough to correlate within a log stream
        general_purpose::STANDARD_NO_PAD.encode(&digest[..8])
    }
}
