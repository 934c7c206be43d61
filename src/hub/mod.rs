pub mod broadcast;
pub mod handlers;
pub mod ws;

pub use broadcast::{Broadcast, Hub, HubHandle, HubSettings, Observer};
pub use handlers::{routes, ServerSettings};
