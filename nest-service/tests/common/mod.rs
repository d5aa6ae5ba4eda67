use ed25519_dalek::{Signer, SigningKey};
use reqwest::{Response, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use nest_service::api;
use nest_service::config::ServiceConfig;
use nest_service::services::BootstrapAuthenticator;
use nest_service::types::{ApiError, NebulaCsr, NebulaCsrResponse};

pub const PSK: &str = "integration test psk";

/// Hostnames the fake Configuration service knows about
const KNOWN_HOSTS: &[&str] = &["node1", "node2", "node3", "racer", "broken"];

pub const CONF_GROUPS: &[&str] = &["servers", "ssh"];

/// Answers CA sign/generate requests with a certificate for the CSR's hostname
struct IssueCert {
    server_generated: bool,
    not_after: Arc<Mutex<String>>,
}

impl Respond for IssueCert {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let csr: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(csr) => csr,
            Err(e) => {
                return ResponseTemplate::new(400).set_body_json(serde_json::json!({
                    "code": 400,
                    "message": e.to_string()
                }))
            }
        };

        let not_after = self.not_after.lock().unwrap().clone();
        let mut body = serde_json::json!({
            "nebulaCert": {
                "Details": {
                    "Name": csr["hostname"],
                    "Ips": ["192.168.100.5/24"],
                    "Groups": csr["groups"],
                    "NotBefore": "2026-01-01T00:00:00Z",
                    "NotAfter": not_after,
                    "PublicKey": csr["publicKey"],
                    "IsCA": false,
                    "Issuer": "test-ca"
                },
                "Signature": "c2lnbmF0dXJl"
            }
        });
        if self.server_generated {
            body["nebulaPrivateKey"] = serde_json::json!("cHJpdmF0ZS1rZXk=");
        }

        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// A nest-service router served in-process on an ephemeral port, backed by
/// wiremock CA and Configuration services
pub struct TestNest {
    pub url: String,
    pub client: reqwest::Client,
    pub ca: MockServer,
    pub conf: MockServer,
    bootstrap: BootstrapAuthenticator,
    not_after: Arc<Mutex<String>>,
    server: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestNest {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let psk_file = temp_dir.path().join("psk");
        let hostnames_file = temp_dir.path().join("hostnames");
        std::fs::write(&psk_file, format!("{}\n", PSK)).unwrap();
        std::fs::write(&hostnames_file, KNOWN_HOSTS.join("\n")).unwrap();

        let not_after = Arc::new(Mutex::new("2099-01-01T00:00:00Z".to_string()));
        let ca = MockServer::start().await;
        for (route, server_generated) in [("/ncsr/sign", false), ("/ncsr/generate", true)] {
            Mock::given(method("POST"))
                .and(path(route))
                .respond_with(IssueCert {
                    server_generated,
                    not_after: not_after.clone(),
                })
                .mount(&ca)
                .await;
        }

        let conf = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/configs/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "code": 500,
                "message": "template rendering failed"
            })))
            .with_priority(1)
            .mount(&conf)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/configs/[^/]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nebulaConf": "cGtpOiB7fQo=",
                "groups": CONF_GROUPS,
                "ip": "192.168.100.5/24",
                "NebulaPath": "/etc/nebula"
            })))
            .mount(&conf)
            .await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to port 0");
        let bind = listener.local_addr().unwrap();

        let config = ServiceConfig {
            bind,
            public_url: format!("http://{}", bind),
            db_path: temp_dir.path().join("nest.db"),
            ca_url: ca.uri(),
            conf_url: conf.uri(),
            hostnames_file,
            psk_file: psk_file.clone(),
            downstream_timeout: Duration::from_secs(5),
            log_level: tracing::Level::DEBUG,
        };

        let state = nest_service::build_state(&config).expect("Failed to build service state");
        let app = api::create_router(state);
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: config.public_url,
            client: reqwest::Client::new(),
            ca,
            conf,
            bootstrap: BootstrapAuthenticator::from_file(&psk_file).unwrap(),
            not_after,
            server,
            _temp_dir: temp_dir,
        }
    }

    pub fn secret(&self, hostname: &str) -> String {
        self.bootstrap.issue(hostname)
    }

    /// NotAfter of every certificate the fake CA issues from now on
    pub fn set_cert_expiry(&self, rfc3339: &str) {
        *self.not_after.lock().unwrap() = rfc3339.to_string();
    }

    pub async fn apply_with_secret(&self, hostname: &str, secret: &str) -> Response {
        self.client
            .post(format!("{}/ncsr", self.url))
            .json(&serde_json::json!({ "hostname": hostname, "secret": secret }))
            .send()
            .await
            .expect("Failed to apply")
    }

    pub async fn apply(&self, hostname: &str) -> Response {
        self.apply_with_secret(hostname, &self.secret(hostname)).await
    }

    /// Status code and, on success, the reported state
    pub async fn status(&self, hostname: &str) -> (StatusCode, Option<String>) {
        let resp = self
            .client
            .get(format!("{}/ncsr/{}", self.url, hostname))
            .send()
            .await
            .expect("Failed to get status");

        let code = resp.status();
        if code.is_success() {
            (code, Some(resp.json::<String>().await.unwrap()))
        } else {
            (code, None)
        }
    }

    /// POST a CSR to `/ncsr/{hostname}/{endpoint}`
    pub async fn submit(&self, hostname: &str, endpoint: &str, csr: &NebulaCsr) -> Response {
        self.client
            .post(format!("{}/ncsr/{}/{}", self.url, hostname, endpoint))
            .json(csr)
            .send()
            .await
            .expect("Failed to submit CSR")
    }

    pub async fn enroll(&self, hostname: &str) -> NebulaCsrResponse {
        let resp = self.submit(hostname, "enroll", &client_csr(hostname, 1, false)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        resp.json().await.unwrap()
    }

    /// Requests the fake CA received on `route`
    pub async fn ca_requests(&self, route: &str) -> Vec<NebulaCsr> {
        self.ca
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == route)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    pub async fn conf_request_count(&self) -> usize {
        self.conf
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}

impl Drop for TestNest {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// CSR carrying a client-generated key and a valid proof of possession
pub fn client_csr(hostname: &str, key_seed: u8, rekey: bool) -> NebulaCsr {
    let key = SigningKey::from_bytes(&[key_seed; 32]);
    let mut csr = NebulaCsr {
        hostname: hostname.to_string(),
        rekey,
        public_key: key.verifying_key().to_bytes().to_vec(),
        ..Default::default()
    };
    csr.pop = key.sign(&csr.pop_payload()).to_bytes().to_vec();
    csr
}

/// CSR asking the CA to generate the keypair
pub fn keygen_csr(hostname: &str, rekey: bool) -> NebulaCsr {
    NebulaCsr {
        hostname: hostname.to_string(),
        server_keygen: true,
        rekey,
        ..Default::default()
    }
}

pub async fn api_error(resp: Response) -> ApiError {
    resp.json().await.expect("Failed to parse error body")
}
