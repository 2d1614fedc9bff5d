use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::pubsub::{PubSubChannel, Publisher, Subscriber};
use crate::utils::mqtt_manager::TrackerMqttAction;


const ACTION_CAP: usize = 8;
const ACTION_SUBS: usize = 1;
const ACTION_PUBS: usize = 2;
pub type ActionChannel = PubSubChannel<NoopRawMutex, TrackerMqttAction, ACTION_CAP, ACTION_SUBS, ACTION_PUBS>;
pub type ActionPub = Publisher<'static, NoopRawMutex, TrackerMqttAction, ACTION_CAP, ACTION_SUBS, ACTION_PUBS>;
pub type ActionSub =
    Subscriber<'static, NoopRawMutex, TrackerMqttAction, ACTION_CAP, ACTION_SUBS, ACTION_PUBS>;
