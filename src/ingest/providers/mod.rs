//! Article fetchers.

pub mod rss;

pub use rss::RssFetcher;
