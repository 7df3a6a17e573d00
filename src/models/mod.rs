//! Data models

pub mod capture;
pub mod submission;

pub use capture::*;
pub use submission::*;
