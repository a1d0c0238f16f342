//! Integration and unit tests for Bollwerk.
//!
//! ## Test Modules
//!
//! - **pipeline_tests**: the security pipeline end to end through the router
//! - **auth_api_tests**: registration, login, refresh, logout and admin listing
//! - **uploads_api_tests**: category, MIME and size checks on uploads
//! - **health_api_tests**: health, version and metrics endpoints
//! - **error_tests**: error conversions and rendering
//! - **config_tests**: configuration loading and validation
//! - **client_tests**: the API client against live servers on ephemeral ports
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test pipeline_tests
//! cargo test client_tests
//! ```

pub mod support;

pub mod config_tests;
pub mod pipeline_tests;
