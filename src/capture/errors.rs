use derive_more::Display;

#[derive(Debug, Display)]
pub enum CaptureError {
    #[display(fmt = "unable to open interface {}: {}", interface, reason)]
    Open { interface: String, reason: String },
    #[display(fmt = "unsupported link type: {}", _0)]
    UnsupportedLinkType(i32),
    #[display(fmt = "unable to read from capture handle: {}", _0)]
    Read(String),
    #[display(fmt = "unable to list capture devices: {}", _0)]
    Interfaces(String),
    #[display(fmt = "unable to spawn capture thread: {}", _0)]
    Spawn(String),
    #[display(fmt = "capture was already started")]
    AlreadyStarted,
}

impl std::error::Error for CaptureError {}

impl From<pcap::Error> for CaptureError {
    fn from(e: pcap::Error) -> Self {
        CaptureError::Read(e.to_string())
    }
}
