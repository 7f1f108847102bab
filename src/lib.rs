pub mod batch;
pub mod config;
pub mod credential;
pub mod decision;
pub mod error;
pub mod fetch;
pub mod history;
pub mod report;
pub mod url;
pub mod version;
