//! PKI inputs and certificate inspection
//!
//! The certificate authority itself lives in the provider; this module only
//! validates what we send it (subject fields, DNS names, algorithm pairs) and
//! inspects what it sends back before we import it.
//!
//! # Activation check
//!
//! A root CA is activated by importing its own certificate. Importing
//! something that is not a CA certificate leaves the CA unusable, so the
//! certificate artifact is parsed and its basic constraints checked first.

use rcgen::{string::Ia5String, DistinguishedName, DnType, DnValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x509_parser::prelude::*;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Subject distinguished name is malformed
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    /// DNS name is not usable in a certificate
    #[error("invalid DNS name '{name}': {reason}")]
    InvalidDnsName {
        /// The offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Key and signing algorithms belong to different families
    #[error("signing algorithm {signing} cannot be used with key algorithm {key}")]
    AlgorithmMismatch {
        /// Key algorithm
        key: &'static str,
        /// Signing algorithm
        signing: &'static str,
    },

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Upper bound for CN, O and OU (X.520)
const MAX_SHORT_FIELD: usize = 64;
/// Upper bound for ST and L (X.520)
const MAX_LONG_FIELD: usize = 128;

/// Subject distinguished name of the root CA
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Two-letter ISO 3166 country code
    pub country: String,
    /// Organization (O)
    pub organization: String,
    /// Organizational unit (OU)
    pub organizational_unit: String,
    /// State or province (ST)
    pub state: String,
    /// Common name (CN)
    pub common_name: String,
    /// Locality (L)
    pub locality: String,
}

impl Subject {
    /// Check every field against X.520 bounds
    pub fn validate(&self) -> Result<()> {
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(PkiError::InvalidSubject(format!(
                "country must be a two-letter uppercase code, got '{}'",
                self.country
            )));
        }
        if self.common_name.trim().is_empty() {
            return Err(PkiError::InvalidSubject(
                "common name must not be empty".to_string(),
            ));
        }

        let fields = [
            ("common name", &self.common_name, MAX_SHORT_FIELD),
            ("organization", &self.organization, MAX_SHORT_FIELD),
            ("organizational unit", &self.organizational_unit, MAX_SHORT_FIELD),
            ("state", &self.state, MAX_LONG_FIELD),
            ("locality", &self.locality, MAX_LONG_FIELD),
        ];
        for (name, value, max) in fields {
            if value.chars().count() > max {
                return Err(PkiError::InvalidSubject(format!(
                    "{} exceeds {} characters",
                    name, max
                )));
            }
            if value.chars().any(char::is_control) {
                return Err(PkiError::InvalidSubject(format!(
                    "{} contains control characters",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Build the rcgen distinguished name for this subject
    pub fn to_distinguished_name(&self) -> Result<DistinguishedName> {
        self.validate()?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, DnValue::PrintableString(
            self.country
                .as_str()
                .try_into()
                .map_err(|e| PkiError::InvalidSubject(format!("country: {}", e)))?,
        ));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(self.organization.clone()),
        );
        dn.push(
            DnType::OrganizationalUnitName,
            DnValue::Utf8String(self.organizational_unit.clone()),
        );
        dn.push(
            DnType::StateOrProvinceName,
            DnValue::Utf8String(self.state.clone()),
        );
        dn.push(
            DnType::LocalityName,
            DnValue::Utf8String(self.locality.clone()),
        );
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.common_name.clone()),
        );
        Ok(dn)
    }

    /// Compact one-line form used as the CA's identifying attribute
    pub fn to_dn_string(&self) -> String {
        format!(
            "C={},ST={},L={},O={},OU={},CN={}",
            self.country,
            self.state,
            self.locality,
            self.organization,
            self.organizational_unit,
            self.common_name
        )
    }
}

/// Key algorithm for CA and leaf keys
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA 2048
    #[default]
    #[serde(rename = "RSA_2048")]
    Rsa2048,
    /// RSA 4096
    #[serde(rename = "RSA_4096")]
    Rsa4096,
    /// NIST P-256
    #[serde(rename = "EC_prime256v1")]
    EcPrime256v1,
    /// NIST P-384
    #[serde(rename = "EC_secp384r1")]
    EcSecp384r1,
}

impl KeyAlgorithm {
    /// Provider name of the algorithm
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa2048 => "RSA_2048",
            KeyAlgorithm::Rsa4096 => "RSA_4096",
            KeyAlgorithm::EcPrime256v1 => "EC_prime256v1",
            KeyAlgorithm::EcSecp384r1 => "EC_secp384r1",
        }
    }

    fn is_rsa(&self) -> bool {
        matches!(self, KeyAlgorithm::Rsa2048 | KeyAlgorithm::Rsa4096)
    }
}

/// Signing algorithm used by the CA
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// SHA-256 with RSA
    #[default]
    #[serde(rename = "SHA256WITHRSA")]
    Sha256WithRsa,
    /// SHA-384 with RSA
    #[serde(rename = "SHA384WITHRSA")]
    Sha384WithRsa,
    /// SHA-512 with RSA
    #[serde(rename = "SHA512WITHRSA")]
    Sha512WithRsa,
    /// SHA-256 with ECDSA
    #[serde(rename = "SHA256WITHECDSA")]
    Sha256WithEcdsa,
    /// SHA-384 with ECDSA
    #[serde(rename = "SHA384WITHECDSA")]
    Sha384WithEcdsa,
}

impl SigningAlgorithm {
    /// Provider name of the algorithm
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Sha256WithRsa => "SHA256WITHRSA",
            SigningAlgorithm::Sha384WithRsa => "SHA384WITHRSA",
            SigningAlgorithm::Sha512WithRsa => "SHA512WITHRSA",
            SigningAlgorithm::Sha256WithEcdsa => "SHA256WITHECDSA",
            SigningAlgorithm::Sha384WithEcdsa => "SHA384WITHECDSA",
        }
    }

    fn is_rsa(&self) -> bool {
        matches!(
            self,
            SigningAlgorithm::Sha256WithRsa
                | SigningAlgorithm::Sha384WithRsa
                | SigningAlgorithm::Sha512WithRsa
        )
    }
}

/// Reject RSA keys with ECDSA signatures and vice versa
pub fn check_algorithms(key: KeyAlgorithm, signing: SigningAlgorithm) -> Result<()> {
    if key.is_rsa() != signing.is_rsa() {
        return Err(PkiError::AlgorithmMismatch {
            key: key.as_str(),
            signing: signing.as_str(),
        });
    }
    Ok(())
}

/// Key usage requested in the CA's CSR extensions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    /// keyCertSign
    pub key_cert_sign: bool,
    /// cRLSign
    pub crl_sign: bool,
}

impl KeyUsage {
    /// Usage for a root CA
    pub fn certificate_authority() -> Self {
        Self {
            key_cert_sign: true,
            crl_sign: true,
        }
    }
}

/// Unit of a certificate validity period
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityUnit {
    /// Days
    Days,
    /// Months
    Months,
    /// Years
    Years,
}

/// Validity period of an issued certificate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// Number of units
    pub value: u32,
    /// Unit of `value`
    #[serde(rename = "type")]
    pub unit: ValidityUnit,
}

impl Validity {
    /// Validity expressed in years
    pub fn years(value: u32) -> Self {
        Self {
            value,
            unit: ValidityUnit::Years,
        }
    }
}

/// Validate a DNS name for use as a certificate domain or SAN.
///
/// Accepts a single leading wildcard label.
pub fn validate_dns_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| PkiError::InvalidDnsName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    Ia5String::try_from(name).map_err(|_| invalid("not an IA5 string"))?;

    if name.is_empty() || name.len() > 253 {
        return Err(invalid("length must be between 1 and 253"));
    }

    let host = name.strip_prefix("*.").unwrap_or(name);
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("labels must be 1 to 63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels must not start or end with '-'"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("labels may only contain letters, digits and '-'"));
        }
    }
    Ok(())
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Facts about an issued certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    /// First CN of the subject, if any
    pub common_name: Option<String>,
    /// Basic constraints mark the certificate as a CA
    pub is_ca: bool,
    /// Start of validity, unix seconds
    pub not_before: i64,
    /// End of validity, unix seconds
    pub not_after: i64,
}

/// Parse a PEM certificate and extract the facts activation depends on
pub fn inspect_certificate(cert_pem: &str) -> Result<CertificateInfo> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    let is_ca = cert
        .basic_constraints()
        .map_err(|e| PkiError::ParseError(format!("invalid basic constraints: {}", e)))?
        .map(|ext| ext.value.ca)
        .unwrap_or(false);

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    Ok(CertificateInfo {
        common_name,
        is_ca,
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    fn subject() -> Subject {
        Subject {
            country: "US".to_string(),
            organization: "Example Org".to_string(),
            organizational_unit: "Platform".to_string(),
            state: "Washington".to_string(),
            common_name: "example.com".to_string(),
            locality: "Seattle".to_string(),
        }
    }

    fn self_signed(is_ca: bool) -> String {
        let mut params = CertificateParams::default();
        params.distinguished_name = subject().to_distinguished_name().unwrap();
        if is_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn valid_subject_passes() {
        assert!(subject().validate().is_ok());
        assert!(subject().to_distinguished_name().is_ok());
    }

    #[test]
    fn lowercase_or_long_country_is_rejected() {
        let mut s = subject();
        s.country = "us".to_string();
        assert!(matches!(s.validate(), Err(PkiError::InvalidSubject(_))));

        s.country = "USA".to_string();
        assert!(matches!(s.validate(), Err(PkiError::InvalidSubject(_))));
    }

    #[test]
    fn empty_or_oversized_common_name_is_rejected() {
        let mut s = subject();
        s.common_name = "  ".to_string();
        assert!(s.validate().is_err());

        s.common_name = "a".repeat(65);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("common name exceeds 64"));
    }

    #[test]
    fn dn_string_is_stable() {
        assert_eq!(
            subject().to_dn_string(),
            "C=US,ST=Washington,L=Seattle,O=Example Org,OU=Platform,CN=example.com"
        );
    }

    #[test]
    fn dns_names_follow_label_rules() {
        assert!(validate_dns_name("your-domain.com").is_ok());
        assert!(validate_dns_name("alt.your-domain.com").is_ok());
        assert!(validate_dns_name("*.your-domain.com").is_ok());

        assert!(validate_dns_name("").is_err());
        assert!(validate_dns_name("bad..com").is_err());
        assert!(validate_dns_name("-lead.com").is_err());
        assert!(validate_dns_name("under_score.com").is_err());
        assert!(validate_dns_name("ünicode.com").is_err());
    }

    #[test]
    fn rsa_keys_need_rsa_signatures() {
        assert!(check_algorithms(KeyAlgorithm::Rsa2048, SigningAlgorithm::Sha256WithRsa).is_ok());
        assert!(
            check_algorithms(KeyAlgorithm::EcPrime256v1, SigningAlgorithm::Sha256WithEcdsa).is_ok()
        );
        assert!(matches!(
            check_algorithms(KeyAlgorithm::Rsa2048, SigningAlgorithm::Sha256WithEcdsa),
            Err(PkiError::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn algorithm_names_match_provider_spelling() {
        let yaml = serde_yaml::to_string(&KeyAlgorithm::Rsa2048).unwrap();
        assert_eq!(yaml.trim(), "RSA_2048");
        let yaml = serde_yaml::to_string(&SigningAlgorithm::Sha256WithRsa).unwrap();
        assert_eq!(yaml.trim(), "SHA256WITHRSA");
        let validity: Validity = serde_yaml::from_str("value: 2\ntype: YEARS\n").unwrap();
        assert_eq!(validity, Validity::years(2));
    }

    #[test]
    fn ca_certificate_is_recognised() {
        let info = inspect_certificate(&self_signed(true)).unwrap();
        assert!(info.is_ca);
        assert_eq!(info.common_name.as_deref(), Some("example.com"));
        assert!(info.not_after > info.not_before);
    }

    #[test]
    fn end_entity_certificate_is_not_a_ca() {
        let info = inspect_certificate(&self_signed(false)).unwrap();
        assert!(!info.is_ca);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            inspect_certificate("not a certificate"),
            Err(PkiError::ParseError(_))
        ));
    }
}
