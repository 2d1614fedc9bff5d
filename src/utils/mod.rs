pub mod channels;
pub mod mqtt_manager;
pub mod protocol;
pub mod topics;
