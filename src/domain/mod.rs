pub mod event_time;
pub mod models;
pub mod schedule_grid;
