mod feed;
mod tracker;

pub use feed::EventFeed;
pub use tracker::{CallTracker, DEFAULT_FEED_CAPACITY};
