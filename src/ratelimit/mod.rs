//! Per-client rate limiting and visitor state management.

mod bucket;
mod clock;
mod throttle;
mod visitor;

pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use throttle::VisitorThrottle;
pub use visitor::ClientKey;
