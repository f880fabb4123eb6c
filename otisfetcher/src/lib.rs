pub mod client;
pub mod error;
pub mod fetcher;
pub mod mapper;
pub mod models;
pub mod params;

pub use crate::fetcher::OtisFetcher;
pub use crate::params::{ApiPaths, OtisParams, SubscriptionKeys};
