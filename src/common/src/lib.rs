pub mod accounts;
pub mod cli;
pub mod config;
pub mod error;
pub mod policy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use accounts::{AccountSet, AccountSource};
pub use error::{Result, SweepError};
pub use policy::DisposalPolicy;
