pub mod agenda_feed_client;
pub mod config;
pub mod error;
pub mod logging;
pub mod meeting_repository;
pub mod session_store;
pub mod source_mapper;
pub mod status_row_mapper;
pub mod status_row_store;
pub mod storage;
