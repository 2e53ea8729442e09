//! API Handlers

pub mod applications;
pub mod items;
pub mod pricing;
pub mod reservations;
