pub mod events;
pub mod sensors_manager;
