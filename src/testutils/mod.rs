//! Fixtures shared by the unit tests.

pub mod crypto;
pub mod messages;
