//! Test utilities for dirsweep.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_bouncer_addr(addr)
//!     .with_accounts_root(users.path())
//!     .build();
//! ```

mod config_builder;

pub use crate::accounts::MockAccountSource;
pub use config_builder::TestConfigBuilder;
