/// ThingsBoard device API: client-side attributes.
pub const DEVICE_ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";

/// ThingsBoard device API: time-series telemetry.
pub const DEVICE_TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
