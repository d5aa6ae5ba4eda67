use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

// ============================================================================
// Operation Modes
// ============================================================================

/// The three issuance operations a device can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationMode {
    Enroll,
    Reenroll,
    Serverkeygen,
}

impl OperationMode {
    /// Path segment of the endpoint serving this mode, e.g. `/ncsr/{hostname}/enroll`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            OperationMode::Enroll => "enroll",
            OperationMode::Reenroll => "reenroll",
            OperationMode::Serverkeygen => "serverkeygen",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

// ============================================================================
// Nebula CSR
// ============================================================================

/// Certificate signing request as sent by a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NebulaCsr {
    #[serde(default)]
    pub server_keygen: bool,
    #[serde(default)]
    pub rekey: bool,
    pub hostname: String,
    #[serde(default, with = "b64")]
    pub public_key: Vec<u8>,
    #[serde(default, with = "b64")]
    pub pop: Vec<u8>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Protobuf form of a CSR. Its encoding is the byte string a device signs to
/// prove possession of its key, so field tags must never change.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RawNebulaCsr {
    #[prost(bool, optional, tag = "1")]
    pub server_keygen: Option<bool>,
    #[prost(bool, optional, tag = "2")]
    pub rekey: Option<bool>,
    #[prost(string, tag = "3")]
    pub hostname: String,
    #[prost(bytes = "vec", tag = "4")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub pop: Vec<u8>,
    #[prost(string, repeated, tag = "6")]
    pub groups: Vec<String>,
}

impl NebulaCsr {
    /// Bytes covered by the proof-of-possession signature.
    ///
    /// Only `serverKeygen`, `rekey`, `hostname` and `publicKey` are bound; groups
    /// are filled in by the service after the device signs.
    pub fn pop_payload(&self) -> Vec<u8> {
        use prost::Message;

        RawNebulaCsr {
            server_keygen: Some(self.server_keygen),
            rekey: Some(self.rekey),
            hostname: self.hostname.clone(),
            public_key: self.public_key.clone(),
            pop: Vec::new(),
            groups: Vec::new(),
        }
        .encode_to_vec()
    }
}

// ============================================================================
// Application / Status
// ============================================================================

/// Body of `POST /ncsr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRequest {
    pub hostname: String,
    /// Hex-encoded bootstrap secret handed to the device out of band.
    pub secret: String,
}

/// Lifecycle of a hostname's enrollment. The certificate expiry only exists
/// once a certificate has been issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Pending,
    Completed { not_after: OffsetDateTime },
    Expired { not_after: OffsetDateTime },
}

impl EnrollmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentState::Pending => "Pending",
            EnrollmentState::Completed { .. } => "Completed",
            EnrollmentState::Expired { .. } => "Expired",
        }
    }

    pub fn not_after(&self) -> Option<OffsetDateTime> {
        match self {
            EnrollmentState::Pending => None,
            EnrollmentState::Completed { not_after } | EnrollmentState::Expired { not_after } => {
                Some(*not_after)
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, EnrollmentState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRecord {
    pub hostname: String,
    pub state: EnrollmentState,
    pub created_at: i64,
    pub updated_at: i64,
}

// ============================================================================
// CA Service Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NebulaCertificateDetails {
    pub name: String,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    #[serde(default, with = "b64")]
    pub public_key: Vec<u8>,
    #[serde(default, rename = "IsCA")]
    pub is_ca: bool,
    #[serde(default)]
    pub issuer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NebulaCertificate {
    pub details: NebulaCertificateDetails,
    #[serde(default, with = "b64")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaResponse {
    pub nebula_cert: NebulaCertificate,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub nebula_private_key: Option<Vec<u8>>,
}

// ============================================================================
// Configuration Service Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfResponse {
    #[serde(rename = "nebulaConf", with = "b64")]
    pub nebula_conf: Vec<u8>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub ip: String,
    #[serde(rename = "NebulaPath")]
    pub nebula_path: String,
}

// ============================================================================
// Client-facing Issuance Response
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NebulaCsrResponse {
    pub nebula_cert: NebulaCertificate,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub nebula_private_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub nebula_conf: Option<Vec<u8>>,
}

// ============================================================================
// Errors / Health
// ============================================================================

/// Machine-readable error body, shared with the downstream services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// ============================================================================
// Hostnames
// ============================================================================

/// Hostnames end up in URL paths of downstream requests, so only DNS-style
/// labels are accepted.
pub fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.len() <= 253
        && !hostname.starts_with('.')
        && !hostname.contains("..")
        && hostname
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

// ============================================================================
// Base64 byte fields
// ============================================================================

pub(crate) mod b64 {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(d)?.unwrap_or_default();
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_opt {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&BASE64_STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(encoded) => BASE64_STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
