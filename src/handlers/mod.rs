//! HTTP handlers

pub mod health;
pub mod collect;
pub mod harvest;
