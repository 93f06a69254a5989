pub mod bootstrap;
pub mod commands;
pub mod schedule_sources;
pub mod schedule_view;
pub mod status_store;
