use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    // Mobile and landline numbers with an optional +675 country prefix
    static ref PHONE_REGEX: Regex =
        Regex::new(r"(?:\+?675[\s-]?)?\b\d{3,4}[\s-]?\d{4}\b").unwrap();
    // Record and entry ids; digit runs inside them are not phone numbers
    static ref UUID_REGEX: Regex =
        Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap();
    // "lat, lng" pairs with at least three decimals of precision
    static ref GPS_REGEX: Regex =
        Regex::new(r"-?\d{1,3}\.\d{3,}\s*,\s*-?\d{1,3}\.\d{3,}").unwrap();
}

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_coordinates: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            redact_phones: true,
            redact_coordinates: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl RedactionConfig {
    /// Configuration that leaves text untouched
    pub fn disabled() -> Self {
        Self {
            redact_emails: false,
            redact_phones: false,
            redact_coordinates: false,
            hash_for_correlation: false,
            custom_patterns: Vec::new(),
        }
    }

    pub fn with_custom_pattern(mut self, pattern: Regex, replacement: impl Into<String>) -> Self {
        self.custom_patterns.push((pattern, replacement.into()));
        self
    }
}

/// PII redactor for log messages and persisted error text
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();

        // Coordinates first so their digits are not mistaken for phone numbers
        if self.config.redact_coordinates {
            result = self.redact_coordinates(&result);
        }

        if self.config.redact_emails {
            result = self.redact_emails(&result);
        }

        if self.config.redact_phones {
            result = self.redact_phones(&result);
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }

        result
    }

    fn redact_emails(&self, text: &str) -> String {
        EMAIL_REGEX
            .replace_all(text, |caps: &regex::Captures| {
                let email = &caps[0];
                if self.config.hash_for_correlation {
                    format!("EMAIL[{}]", self.hash_value(email))
                } else {
                    match email.split_once('@') {
                        Some((user, domain)) => format!(
                            "{}***@{}***",
                            user.chars().next().unwrap_or('*'),
                            domain.chars().next().unwrap_or('*')
                        ),
                        None => "***@***".to_string(),
                    }
                }
            })
            .to_string()
    }

    fn redact_phones(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest_start = 0;
        for id in UUID_REGEX.find_iter(text) {
            let before = text.get(rest_start..id.start()).unwrap_or_default();
            result.push_str(&self.redact_phone_span(before));
            result.push_str(id.as_str());
            rest_start = id.end();
        }
        result.push_str(&self.redact_phone_span(text.get(rest_start..).unwrap_or_default()));
        result
    }

    fn redact_phone_span(&self, text: &str) -> String {
        PHONE_REGEX
            .replace_all(text, |caps: &regex::Captures| {
                if self.config.hash_for_correlation {
                    format!("PHONE[{}]", self.hash_value(&caps[0]))
                } else {
                    "***-****".to_string()
                }
            })
            .to_string()
    }

    fn redact_coordinates(&self, text: &str) -> String {
        GPS_REGEX
            .replace_all(text, |caps: &regex::Captures| {
                if self.config.hash_for_correlation {
                    format!("GPS[{}]", self.hash_value(&caps[0]))
                } else {
                    "GPS[***]".to_string()
                }
            })
            .to_string()
    }

    fn hash_value(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let result = hasher.finalize();
        general_purpose::STANDARD.encode(&result[..8]) // Use first 8 bytes for shorter hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_redactor() -> PiiRedactor {
        PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_email_redaction() {
        let redacted = plain_redactor().redact("Enumerator mary.kila@example.org signed in");
        assert!(redacted.contains("m***@e***"));
        assert!(!redacted.contains("mary.kila"));
    }

    #[test]
    fn test_phone_redaction() {
        let redactor = plain_redactor();

        let redacted = redactor.redact("head_phone +675 7123 4567 rejected");
        assert!(!redacted.contains("7123"));
        assert!(redacted.contains("***-****"));

        let redacted = redactor.redact("call 7123-4567 after 5pm");
        assert_eq!(redacted, "call ***-**** after 5pm");
    }

    #[test]
    fn test_coordinate_redaction() {
        let redacted = plain_redactor().redact("gps -5.9341, 145.7812 out of range");
        assert_eq!(redacted, "gps GPS[***] out of range");
    }

    #[test]
    fn test_identifiers_survive() {
        let text = "households/550e8400-e29b-41d4-a716-446655440000 at 1700000000000";
        assert_eq!(plain_redactor().redact(text), text);
    }

    #[test]
    fn test_uuid_digit_groups_are_not_phones() {
        let text = "Sync of households 0b1c2d3e-1234-5678-9abc-def012345678 failed";
        assert_eq!(PiiRedactor::default().redact(text), text);

        let all_digits = "entry 12345678-1234-5678-1234-567812345678 at 7123 4567";
        assert_eq!(
            plain_redactor().redact(all_digits),
            "entry 12345678-1234-5678-1234-567812345678 at ***-****"
        );
    }

    #[test]
    fn test_hashing_is_stable_for_correlation() {
        let redactor = PiiRedactor::default();
        let first = redactor.redact("phone 7123 4567");
        let second = redactor.redact("phone 7123 4567");
        assert_eq!(first, second);
        assert!(first.starts_with("phone PHONE["));
    }

    #[test]
    fn test_disabled_config_is_noop() {
        let redactor = PiiRedactor::new(RedactionConfig::disabled());
        let text = "mary@example.org 7123 4567";
        assert_eq!(redactor.redact(text), text);
    }

    #[test]
    fn test_custom_pattern() {
        let redactor = PiiRedactor::new(
            RedactionConfig::disabled()
                .with_custom_pattern(Regex::new(r"head_name=\w+").unwrap(), "head_name=[NAME]"),
        );
        assert_eq!(redactor.redact("head_name=Kila failed"), "head_name=[NAME] failed");
    }
}
