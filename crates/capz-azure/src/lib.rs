//! Azure Resource Manager plumbing for capz
//!
//! Everything the reconcile engine needs to talk to ARM: cloud endpoints,
//! credentials and the process-wide credential cache, resource ID helpers,
//! the long-running operation poller and its persisted form.

#![deny(missing_docs)]

pub mod client;
pub mod cloud;
pub mod credentials;
pub mod future;
pub mod lro;
pub mod resource_id;

pub use client::{ArmClient, HttpArmClient};
pub use cloud::CloudEnvironment;
pub use credentials::{AccessToken, ClientSecretCredential, CredentialCache, TokenCredential};
pub use lro::{HttpMethod, OperationStatus, PollMode, PollerState};
