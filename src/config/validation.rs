//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes, thread counts, timeouts > 0)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::{AppConfig, ServerConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.ip_address `{0}` is not a valid IP address")]
    InvalidIp(String),

    #[error("server.max_data_size must be at least 1")]
    ZeroDataSize,

    #[error("server.number_working_threads must be at least 1")]
    NoWorkers,

    #[error("server.{0} must be at least 1 second")]
    ZeroTimeout(&'static str),

    #[error("observability.metrics_address `{0}` is not a valid socket address")]
    InvalidMetricsAddress(String),
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(&config.server, &mut errors);

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    finish(errors)
}

/// Check only the server section. Used when a server is built without
/// going through the config loader.
pub fn validate_server(server: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(server, &mut errors);
    finish(errors)
}

/// Comma-separated messages, for error displays.
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_server(server: &ServerConfig, errors: &mut Vec<ValidationError>) {
    if server.ip_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidIp(server.ip_address.clone()));
    }
    if server.max_data_size == 0 {
        errors.push(ValidationError::ZeroDataSize);
    }
    if server.number_working_threads == 0 {
        errors.push(ValidationError::NoWorkers);
    }
    if server.poll_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("poll_timeout_secs"));
    }
    if server.queue_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("queue_timeout_secs"));
    }
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
