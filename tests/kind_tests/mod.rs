//! Integration tests for the BYOH operator
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how cluster administrators hand machines to the operator.
//!
//! # Test Organization
//!
//! - `tracking_bootstrap`: Stories about the tracking ConfigMap being created
//!   on startup and never overwritten afterwards
//!
//! - `reconcile_pass`: Stories about full passes against a live API server,
//!   with host provisioning recorded instead of performed
//!
//! # Running These Tests
//!
//! ```bash
//! kind create cluster
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod helpers;
mod reconcile_pass;
mod tracking_bootstrap;
