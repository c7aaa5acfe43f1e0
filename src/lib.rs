pub mod actuator;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod interval;
pub mod scheduler;
pub mod status;
pub mod worker;
