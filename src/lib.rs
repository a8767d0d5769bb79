pub mod app;
pub mod batch;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod facts;
pub mod fetch;
pub mod output;
pub mod pool;
pub mod reference;
pub mod resolver;
pub mod search;
pub mod storage;
pub mod tiger;
pub mod validate;
