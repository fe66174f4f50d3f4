//! Shared fixtures for the integration tests.

pub mod mock_backend;
