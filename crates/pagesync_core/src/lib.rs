pub mod config;
pub mod content;
pub mod drift;
pub mod entry;
pub mod error;
pub mod migrate;
pub mod page;
pub mod page_file;
pub mod page_tag;
pub mod runtime;
pub mod service;
pub mod store;
pub mod validate;
