//! Task executor adapters.

pub mod http;

pub use http::HttpTaskExecutor;
