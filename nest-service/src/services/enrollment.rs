//! Enrollment orchestration.
//!
//! Sequences request validation, record state checks, calls to the
//! Configuration and CA services, and the final record update for every
//! operation the API exposes. Validation and state errors are returned before
//! any downstream call; downstream failures leave the record untouched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use tracing::{info, warn};

use crate::error::{NestError, Result};
use crate::services::bootstrap::BootstrapAuthenticator;
use crate::services::ca_client::CaClient;
use crate::services::conf_client::ConfClient;
use crate::services::csr_validator::{self, CsrRejection};
use crate::services::downstream::DownstreamError;
use crate::services::record_store::{RecordStore, StoreError};
use crate::types::{
    is_valid_hostname, ApplicationRequest, CaResponse, EnrollmentState, NebulaCsr,
    NebulaCsrResponse, OperationMode,
};

pub struct EnrollmentService {
    records: RecordStore,
    bootstrap: BootstrapAuthenticator,
    ca: Arc<dyn CaClient>,
    conf: Arc<dyn ConfClient>,
    /// Externally reachable base URL, used for Location headers and hints.
    public_url: String,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a hostname as having an issuance in progress until dropped.
struct IssuanceTicket<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    hostname: String,
}

impl Drop for IssuanceTicket<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.hostname);
    }
}

impl EnrollmentService {
    pub fn new(
        records: RecordStore,
        bootstrap: BootstrapAuthenticator,
        ca: Arc<dyn CaClient>,
        conf: Arc<dyn ConfClient>,
        public_url: &str,
    ) -> Self {
        Self {
            records,
            bootstrap,
            ca,
            conf,
            public_url: public_url.trim_end_matches('/').to_string(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Accept a device's application. Returns the location of its record.
    pub async fn apply(&self, req: &ApplicationRequest) -> Result<String> {
        check_hostname(&req.hostname)?;

        if !self.bootstrap.verify(&req.hostname, &req.secret) {
            return Err(NestError::BadRequest(
                "The bootstrap secret is not valid for this hostname".to_string(),
            ));
        }

        let known = self
            .conf
            .is_known_host(&req.hostname)
            .await
            .map_err(|e| downstream_failure(&req.hostname, e))?;
        if !known {
            return Err(NestError::BadRequest(
                "The hostname you provided was not found in the Configuration service list"
                    .to_string(),
            ));
        }

        match self.records.create(&req.hostname).await {
            Ok(_) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return Err(NestError::conflict(
                    "A Nebula CSR for the hostname you provided already exists.",
                    Some(self.hint(
                        "If you want to re-enroll, please visit",
                        &req.hostname,
                        OperationMode::Reenroll,
                    )),
                ))
            }
            Err(e) => return Err(store_failure(e)),
        }

        info!("Nebula CSR application accepted for {}", req.hostname);
        Ok(self.record_url(&req.hostname))
    }

    /// Current state of a hostname's enrollment.
    pub async fn status(&self, hostname: &str) -> Result<EnrollmentState> {
        check_hostname(hostname)?;

        match self.records.get(hostname).await {
            Ok(record) => Ok(record.state),
            Err(StoreError::NotFound(_)) => Err(NestError::NotFound(format!(
                "Could not find an open Nebula CSR application for {}. If you want to enroll, provide your hostname to {}/ncsr",
                hostname, self.public_url
            ))),
            Err(e) => Err(store_failure(e)),
        }
    }

    /// Run an Enroll, Reenroll or Serverkeygen request to completion.
    pub async fn issue(
        &self,
        hostname: &str,
        csr: NebulaCsr,
        mode: OperationMode,
    ) -> Result<NebulaCsrResponse> {
        check_hostname(hostname)?;

        csr_validator::validate(&csr, hostname, mode)
            .map_err(|rejection| self.rejection(hostname, rejection))?;

        let _ticket = self.begin_issuance(hostname)?;

        let state = match self.records.get(hostname).await {
            Ok(record) => record.state,
            Err(StoreError::NotFound(_)) => {
                return Err(NestError::conflict(
                    "No Nebula CSR application exists for this hostname.",
                    Some(format!(
                        "If you want to enroll, provide your hostname to {}/ncsr",
                        self.public_url
                    )),
                ))
            }
            Err(e) => return Err(store_failure(e)),
        };
        self.check_precondition(hostname, state, mode)?;

        let response = self.orchestrate(hostname, csr, mode).await?;

        info!("Nebula {} completed for {}", mode, hostname);
        Ok(response)
    }

    async fn orchestrate(
        &self,
        hostname: &str,
        mut csr: NebulaCsr,
        mode: OperationMode,
    ) -> Result<NebulaCsrResponse> {
        // Group membership always comes from the Configuration service; a
        // reenrollment keeps whatever the CA already recorded.
        let conf = match mode {
            OperationMode::Reenroll => None,
            OperationMode::Enroll | OperationMode::Serverkeygen => Some(
                self.conf
                    .get_config(hostname)
                    .await
                    .map_err(|e| downstream_failure(hostname, e))?,
            ),
        };
        csr.groups = conf.as_ref().map(|c| c.groups.clone()).unwrap_or_default();

        let server_generated = match mode {
            OperationMode::Enroll => false,
            OperationMode::Serverkeygen => true,
            OperationMode::Reenroll => csr.server_keygen,
        };

        let ca_resp = if server_generated {
            self.ca.generate(&csr).await
        } else {
            self.ca.sign(&csr).await
        }
        .map_err(|e| downstream_failure(hostname, e))?;

        let (response, not_after) = assemble(
            hostname,
            ca_resp,
            server_generated,
            conf.map(|c| c.nebula_conf),
        )?;

        self.records
            .complete(hostname, not_after)
            .await
            .map_err(store_failure)?;

        Ok(response)
    }

    fn check_precondition(
        &self,
        hostname: &str,
        state: EnrollmentState,
        mode: OperationMode,
    ) -> Result<()> {
        match mode {
            OperationMode::Enroll | OperationMode::Serverkeygen if !state.is_pending() => {
                Err(NestError::conflict(
                    "This hostname has already enrolled.",
                    Some(self.hint(
                        "If you want to re-enroll, please visit",
                        hostname,
                        OperationMode::Reenroll,
                    )),
                ))
            }
            OperationMode::Reenroll if state.is_pending() => Err(NestError::conflict(
                "This hostname has not yet finished enrolling.",
                Some(self.hint(
                    "If you want to do so, please visit",
                    hostname,
                    OperationMode::Enroll,
                )),
            )),
            _ => Ok(()),
        }
    }

    fn begin_issuance(&self, hostname: &str) -> Result<IssuanceTicket<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(hostname.to_string()) {
            return Err(NestError::conflict(
                "Another enrollment request for this hostname is in progress.",
                None,
            ));
        }

        Ok(IssuanceTicket {
            in_flight: &self.in_flight,
            hostname: hostname.to_string(),
        })
    }

    fn rejection(&self, hostname: &str, rejection: CsrRejection) -> NestError {
        if rejection.is_unauthorized() {
            return NestError::Unauthorized(rejection.to_string());
        }

        let message = match rejection.redirect() {
            Some(OperationMode::Serverkeygen) => format!(
                "{}. {}",
                rejection,
                self.hint(
                    "If you wanted to enroll with a server keygen, please visit",
                    hostname,
                    OperationMode::Serverkeygen
                )
            ),
            Some(mode) => format!(
                "{}. {}",
                rejection,
                self.hint(
                    "If you wanted to enroll with a client-generated nebula public key, please visit",
                    hostname,
                    mode
                )
            ),
            None => rejection.to_string(),
        };
        NestError::BadRequest(message)
    }

    fn hint(&self, lead: &str, hostname: &str, mode: OperationMode) -> String {
        format!("{} {}/{}", lead, self.record_url(hostname), mode.path_segment())
    }

    fn record_url(&self, hostname: &str) -> String {
        format!("{}/ncsr/{}", self.public_url, hostname)
    }
}

/// Build the client response from the CA's answer and return it along with
/// the certificate expiry to record.
fn assemble(
    hostname: &str,
    ca_resp: CaResponse,
    server_generated: bool,
    nebula_conf: Option<Vec<u8>>,
) -> Result<(NebulaCsrResponse, time::OffsetDateTime)> {
    let details = &ca_resp.nebula_cert.details;
    if details.name != hostname {
        return Err(NestError::Internal(anyhow!(
            "CA service issued a certificate for {}, expected {}",
            details.name,
            hostname
        )));
    }
    let not_after = details.not_after;

    let nebula_private_key = if server_generated {
        match ca_resp.nebula_private_key {
            Some(key) => Some(key),
            None => {
                return Err(NestError::Internal(anyhow!(
                    "CA service generated a certificate for {} without a private key",
                    hostname
                )))
            }
        }
    } else {
        None
    };

    Ok((
        NebulaCsrResponse {
            nebula_cert: ca_resp.nebula_cert,
            nebula_private_key,
            nebula_conf,
        },
        not_after,
    ))
}

fn check_hostname(hostname: &str) -> Result<()> {
    if is_valid_hostname(hostname) {
        Ok(())
    } else {
        Err(NestError::BadRequest(format!("Invalid hostname: {:?}", hostname)))
    }
}

fn downstream_failure(hostname: &str, e: DownstreamError) -> NestError {
    if let DownstreamError::Rejected { service, error, .. } = &e {
        warn!(
            "{} refused request for {}: code={} message={}",
            service, hostname, error.code, error.message
        );
    }
    NestError::Internal(
        anyhow::Error::new(e).context(format!("Downstream failure for {}", hostname)),
    )
}

fn store_failure(e: StoreError) -> NestError {
    NestError::Internal(anyhow::Error::new(e).context("Enrollment record store failure"))
}
