//! Primary source: the e621 JSON API.

pub mod client;
mod model;

pub use client::E621Client;
