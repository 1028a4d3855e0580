//! Thumbnail retrieval core: resolve a video URL to a resource key, serve the
//! thumbnail from the cache or the origin, and split it into stream frames.

pub mod domain;
pub mod encoder;
pub mod flight;
pub mod origin;
pub mod ports;
pub mod resolver;
pub mod retrieval;
pub mod sweeper;

pub use domain::{CacheEntry, ResourceKey};
pub use encoder::{Frame, FrameEncoder, Frames};
pub use origin::HttpOrigin;
pub use ports::{CacheStore, Origin};
pub use resolver::{HostPattern, Resolver};
pub use retrieval::Retriever;
