//! Idempotent host provisioning and deployment for a Python web API.
//!
//! Alicerce (Portuguese for *foundation*) takes a fresh Ubuntu host
//! to a running deployment: system packages, a MySQL database and
//! account with generated credentials, the application in a
//! virtualenv under systemd, an Nginx reverse proxy and a `ufw`
//! firewall. Every step checks before it acts, so running it again
//! repairs whatever an interrupted run left behind.
//!
//! # Architecture
//!
//! A run moves through five stages and stops at the first fatal
//! error:
//!
//! 1. **Check** - privileges and the application source are present
//!    ([`precheck`]). Nothing is changed if this fails.
//! 2. **Bootstrap** - load the credential store, or generate and
//!    apply new secrets with a primary and a fallback path
//!    ([`secrets`], [`mysql`]).
//! 3. **Apply** - an ordered [`Plan`] of [`ProvisioningStep`]s,
//!    fail-fast, never rolled back ([`step`], [`steps`]).
//! 4. **Lifecycle** - enable and (re)start services in dependency
//!    order; failures are recorded, not raised ([`lifecycle`]).
//! 5. **Verify** - live service state, a best-effort health probe
//!    and the final report ([`verify`]).
//!
//! Generated files come from typed builders: [`EnvironmentManifest`]
//! for the application's `.env`, [`ServiceUnit`] for systemd and
//! [`Nginx`] for the proxy site.
//!
//! # Examples
//!
//! ## Deploy with defaults
//!
//! ```rust,no_run
//! use alicerce::{DeployConfig, Pipeline, cmd::LocalHost};
//!
//! fn main() -> anyhow::Result<()> {
//!     let host = LocalHost;
//!     let outcome = Pipeline::new(DeployConfig::default(), &host).install()?;
//!
//!     println!("{}", outcome.report());
//!     Ok(())
//! }
//! ```
//!
//! ## From the command line
//!
//! ```sh
//! # Fresh install (also the default without a subcommand)
//! sudo alicerce install
//!
//! # Push new source and restart the API
//! sudo alicerce --config deploy.yml update
//!
//! # Machine-readable health report
//! alicerce status --json
//!
//! # Show generated files without touching the host
//! alicerce render
//! ```
//!
//! [`ProvisioningStep`]: step::ProvisioningStep

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod cmd;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod mysql;
pub mod nginx;
pub mod pipeline;
pub mod precheck;
pub mod secrets;
pub mod step;
pub mod steps;
pub mod unit;
pub mod verify;

pub use config::{DatabaseConfig, DeployConfig};
pub use error::{DeployError, DeployResult};
pub use lifecycle::ServiceDescriptor;
pub use manifest::EnvironmentManifest;
pub use nginx::Nginx;
pub use pipeline::Pipeline;
pub use secrets::SecretBundle;
pub use step::Plan;
pub use unit::ServiceUnit;
pub use verify::DeploymentOutcome;
