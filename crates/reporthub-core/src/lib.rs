//! `reporthub-core` — shared foundation for the reporthub workspace.
//!
//! Holds the pieces every other crate needs: configuration loading
//! ([`config::ReporthubConfig`]), the workspace-level error type, the
//! injectable [`clock::Clock`] time source, and the collaborator traits
//! ([`external`]) through which the scheduling core talks to the rest of
//! the platform (query engine, mail gateway, tenant directory,
//! authorization).

pub mod clock;
pub mod config;
pub mod error;
pub mod external;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, Result};
