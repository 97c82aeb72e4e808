//! Administrator endpoints, mounted under `/admin` behind the admin claim.

pub mod catalog;
pub mod review;
pub mod settings;
pub mod users;
