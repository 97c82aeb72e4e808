//! Users: creation on first login, daily quota refresh, ad option, device
//! signals and bans.
mod builder;
mod service;

pub use builder::*;
pub use service::*;
