#[derive(Debug, Clone, defmt::Format)]
pub enum TrackerEvents {
    // Application message received on a topic we don't act on
    Downlink { topic: heapless::String<64> },
}
