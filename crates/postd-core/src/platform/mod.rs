//! Social-platform abstraction (Reddit today).

pub mod port;
pub mod throttled;

pub use port::SocialPlatform;
