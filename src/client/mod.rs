//! Client side of the API: an HTTP interceptor that cooperates with the
//! server pipeline, and the encrypted session storage it reads credentials
//! from.

pub mod interceptor;
pub mod storage;

pub use interceptor::{ApiClient, ClientConfig, ClientError, NoopListener, SessionListener};
pub use storage::{MemorySessionStore, SecureStorage, SessionStore};
