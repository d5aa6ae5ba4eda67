use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

use crate::types::{NebulaCsr, OperationMode};

/// Why a CSR was refused. Every variant is a client error; only a hostname
/// mismatch is treated as an authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrRejection {
    #[error("The hostname in the URL and the one in the Nebula CSR are different")]
    HostnameMismatch,

    #[error("Rekey is true")]
    RekeyNotAllowed,

    #[error("ServerKeygen is true")]
    ServerKeygenNotAllowed,

    #[error("ServerKeygen is false")]
    ServerKeygenRequired,

    #[error("Public key is not provided")]
    MissingPublicKey,

    #[error("Proof of Possession is not provided")]
    MissingProofOfPossession,

    #[error("Proof of Possession is not valid")]
    InvalidProofOfPossession,
}

impl CsrRejection {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CsrRejection::HostnameMismatch)
    }

    /// Endpoint the client most likely meant to call.
    pub fn redirect(&self) -> Option<OperationMode> {
        match self {
            CsrRejection::ServerKeygenNotAllowed => Some(OperationMode::Serverkeygen),
            CsrRejection::ServerKeygenRequired => Some(OperationMode::Enroll),
            _ => None,
        }
    }
}

/// Check a CSR against the hostname it is submitted for and the mode of the
/// endpoint it arrived on. Rules apply in order; the first failure wins.
pub fn validate(
    csr: &NebulaCsr,
    expected_hostname: &str,
    mode: OperationMode,
) -> Result<(), CsrRejection> {
    if csr.hostname != expected_hostname {
        return Err(CsrRejection::HostnameMismatch);
    }
    if csr.rekey && mode != OperationMode::Reenroll {
        return Err(CsrRejection::RekeyNotAllowed);
    }

    match mode {
        OperationMode::Enroll => {
            if csr.server_keygen {
                return Err(CsrRejection::ServerKeygenNotAllowed);
            }
        }
        OperationMode::Serverkeygen => {
            if !csr.server_keygen {
                return Err(CsrRejection::ServerKeygenRequired);
            }
            return Ok(());
        }
        OperationMode::Reenroll => {
            // Either the current key is kept or the server generates a new
            // one; only a client-supplied new key needs proving.
            if !csr.rekey || csr.server_keygen {
                return Ok(());
            }
        }
    }

    if csr.public_key.is_empty() {
        return Err(CsrRejection::MissingPublicKey);
    }
    if csr.pop.is_empty() {
        return Err(CsrRejection::MissingProofOfPossession);
    }

    verify_pop(csr)
}

fn verify_pop(csr: &NebulaCsr) -> Result<(), CsrRejection> {
    let key_bytes: &[u8; 32] = csr
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| CsrRejection::InvalidProofOfPossession)?;
    let key =
        VerifyingKey::from_bytes(key_bytes).map_err(|_| CsrRejection::InvalidProofOfPossession)?;
    let signature =
        Signature::from_slice(&csr.pop).map_err(|_| CsrRejection::InvalidProofOfPossession)?;

    key.verify_strict(&csr.pop_payload(), &signature)
        .map_err(|_| CsrRejection::InvalidProofOfPossession)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    const ALL_MODES: [OperationMode; 3] = [
        OperationMode::Enroll,
        OperationMode::Reenroll,
        OperationMode::Serverkeygen,
    ];

    fn signed_csr(hostname: &str, key: &SigningKey, rekey: bool) -> NebulaCsr {
        let mut csr = NebulaCsr {
            hostname: hostname.to_string(),
            rekey,
            public_key: key.verifying_key().to_bytes().to_vec(),
            ..Default::default()
        };
        csr.pop = key.sign(&csr.pop_payload()).to_bytes().to_vec();
        csr
    }

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_valid_enroll_csr() {
        let csr = signed_csr("node1", &key(1), false);
        assert_eq!(validate(&csr, "node1", OperationMode::Enroll), Ok(()));
    }

    #[test]
    fn test_hostname_mismatch_is_unauthorized() {
        let csr = signed_csr("node2", &key(1), false);
        for mode in ALL_MODES {
            let err = validate(&csr, "node1", mode).unwrap_err();
            assert_eq!(err, CsrRejection::HostnameMismatch);
            assert!(err.is_unauthorized());
        }
    }

    #[test]
    fn test_rekey_only_for_reenroll() {
        let csr = signed_csr("node1", &key(1), true);
        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::RekeyNotAllowed)
        );

        let skg = NebulaCsr {
            server_keygen: true,
            ..csr.clone()
        };
        assert_eq!(
            validate(&skg, "node1", OperationMode::Serverkeygen),
            Err(CsrRejection::RekeyNotAllowed)
        );

        assert_eq!(validate(&csr, "node1", OperationMode::Reenroll), Ok(()));
    }

    #[test]
    fn test_enroll_rejects_server_keygen() {
        let csr = NebulaCsr {
            hostname: "node1".to_string(),
            server_keygen: true,
            ..Default::default()
        };
        let err = validate(&csr, "node1", OperationMode::Enroll).unwrap_err();
        assert_eq!(err, CsrRejection::ServerKeygenNotAllowed);
        assert_eq!(err.redirect(), Some(OperationMode::Serverkeygen));
    }

    #[test]
    fn test_serverkeygen_requires_flag() {
        let csr = signed_csr("node1", &key(1), false);
        let err = validate(&csr, "node1", OperationMode::Serverkeygen).unwrap_err();
        assert_eq!(err, CsrRejection::ServerKeygenRequired);
        assert_eq!(err.redirect(), Some(OperationMode::Enroll));
    }

    #[test]
    fn test_serverkeygen_needs_no_key() {
        let csr = NebulaCsr {
            hostname: "node1".to_string(),
            server_keygen: true,
            ..Default::default()
        };
        assert_eq!(validate(&csr, "node1", OperationMode::Serverkeygen), Ok(()));
    }

    #[test]
    fn test_reenroll_without_client_key() {
        let keep_key = NebulaCsr {
            hostname: "node1".to_string(),
            ..Default::default()
        };
        assert_eq!(validate(&keep_key, "node1", OperationMode::Reenroll), Ok(()));

        let server_rekey = NebulaCsr {
            hostname: "node1".to_string(),
            rekey: true,
            server_keygen: true,
            ..Default::default()
        };
        assert_eq!(validate(&server_rekey, "node1", OperationMode::Reenroll), Ok(()));
    }

    #[test]
    fn test_reenroll_client_rekey_needs_pop() {
        let csr = NebulaCsr {
            hostname: "node1".to_string(),
            rekey: true,
            ..Default::default()
        };
        assert_eq!(
            validate(&csr, "node1", OperationMode::Reenroll),
            Err(CsrRejection::MissingPublicKey)
        );
    }

    #[test]
    fn test_missing_key_material() {
        let mut csr = signed_csr("node1", &key(1), false);
        csr.pop.clear();
        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::MissingProofOfPossession)
        );

        csr.public_key.clear();
        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::MissingPublicKey)
        );
    }

    #[test]
    fn test_pop_over_other_hostname_rejected() {
        let signer = key(1);
        let mut csr = signed_csr("node2", &signer, false);
        csr.hostname = "node1".to_string();

        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::InvalidProofOfPossession)
        );
    }

    #[test]
    fn test_pop_under_other_key_rejected() {
        let mut csr = signed_csr("node1", &key(1), false);
        csr.pop = key(2).sign(&csr.pop_payload()).to_bytes().to_vec();

        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::InvalidProofOfPossession)
        );
    }

    #[test]
    fn test_malformed_key_and_signature_rejected() {
        let mut csr = signed_csr("node1", &key(1), false);
        csr.pop.truncate(10);
        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::InvalidProofOfPossession)
        );

        let mut csr = signed_csr("node1", &key(1), false);
        csr.public_key.push(0);
        assert_eq!(
            validate(&csr, "node1", OperationMode::Enroll),
            Err(CsrRejection::InvalidProofOfPossession)
        );
    }

    #[test]
    fn test_groups_do_not_affect_pop() {
        let mut csr = signed_csr("node1", &key(1), false);
        csr.groups = vec!["admins".to_string()];
        assert_eq!(validate(&csr, "node1", OperationMode::Enroll), Ok(()));
    }
}
