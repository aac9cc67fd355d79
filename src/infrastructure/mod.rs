pub mod broker;
pub mod notify;
pub mod repositories;
