use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Verifies the bootstrap secret a device presents when it applies.
///
/// The secret for a hostname is `hex(HMAC-SHA256(psk, hostname))`, so the
/// service never stores per-device secrets.
#[derive(Clone)]
pub struct BootstrapAuthenticator {
    psk: Vec<u8>,
}

impl BootstrapAuthenticator {
    pub fn new(psk: impl Into<Vec<u8>>) -> Result<Self> {
        let psk = psk.into();
        if psk.is_empty() {
            anyhow::bail!("Pre-shared key is empty");
        }
        Ok(Self { psk })
    }

    /// Load the pre-shared key from a file. Surrounding whitespace is ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pre-shared key file {:?}", path))?;
        Self::new(raw.trim().as_bytes())
            .with_context(|| format!("Invalid pre-shared key in {:?}", path))
    }

    /// Secret to hand to the device that will apply as `hostname`.
    pub fn issue(&self, hostname: &str) -> String {
        hex::encode(self.mac(hostname).finalize().into_bytes())
    }

    /// Constant-time check of a presented secret. Malformed input is simply
    /// a mismatch.
    pub fn verify(&self, hostname: &str, presented: &str) -> bool {
        let Ok(presented) = hex::decode(presented.trim()) else {
            return false;
        };
        self.mac(hostname).verify_slice(&presented).is_ok()
    }

    fn mac(&self, hostname: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.psk).expect("HMAC accepts keys of any length");
        mac.update(hostname.as_bytes());
        mac
    }
}

impl std::fmt::Debug for BootstrapAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAuthenticator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> BootstrapAuthenticator {
        BootstrapAuthenticator::new(b"correct horse battery staple".to_vec()).unwrap()
    }

    #[test]
    fn test_issued_secret_verifies() {
        let auth = auth();
        let secret = auth.issue("node1");
        assert_eq!(secret.len(), 64);
        assert!(auth.verify("node1", &secret));
    }

    #[test]
    fn test_secret_is_bound_to_hostname() {
        let auth = auth();
        let secret = auth.issue("node1");
        assert!(!auth.verify("node2", &secret));
    }

    #[test]
    fn test_secret_is_bound_to_key() {
        let other = BootstrapAuthenticator::new(b"another key".to_vec()).unwrap();
        assert!(!auth().verify("node1", &other.issue("node1")));
    }

    #[test]
    fn test_malformed_secrets_rejected() {
        let auth = auth();
        let secret = auth.issue("node1");

        assert!(!auth.verify("node1", ""));
        assert!(!auth.verify("node1", "not hex at all"));
        assert!(!auth.verify("node1", &secret[..32]));
        assert!(!auth.verify("node1", &format!("{}00", secret)));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(BootstrapAuthenticator::new(Vec::new()).is_err());
    }

    #[test]
    fn test_key_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psk");
        std::fs::write(&path, "correct horse battery staple\n").unwrap();

        let from_file = BootstrapAuthenticator::from_file(&path).unwrap();
        assert_eq!(from_file.issue("node1"), auth().issue("node1"));
    }
}
