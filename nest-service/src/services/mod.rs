pub mod bootstrap;
pub mod ca_client;
pub mod conf_client;
pub mod csr_validator;
pub mod downstream;
pub mod enrollment;
pub mod host_lock;
pub mod record_store;

pub use bootstrap::BootstrapAuthenticator;
pub use ca_client::{CaClient, HttpCaClient};
pub use conf_client::{ConfClient, HttpConfClient};
pub use downstream::DownstreamError;
pub use enrollment::EnrollmentService;
pub use record_store::{RecordStore, StoreError};
