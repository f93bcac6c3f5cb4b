//! Driver roles: the stamping publisher and the verifying subscriber.

pub mod publisher;
pub mod subscriber;
