pub mod event_bus;
pub mod live_session;
pub mod monitoring;
pub mod schedule;
