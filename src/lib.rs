pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod feed;
pub mod history;
pub mod logging;
pub mod notify;
pub mod poller;
pub mod settings;
pub mod stats;
pub mod storage;
pub mod view;
pub mod workers;
