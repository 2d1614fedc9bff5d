/// Client attributes announced on every new broker session.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Presence {
    pub online: bool,
    pub firmware: &'static str,
    pub dark_threshold: u16,
}
