//! Live sync
//!
//! Subscriptions to store change feeds, delivered to the single task that
//! owns the [`LiveSync`] engine.
//!
//! ## How delivery works
//!
//! Each subscription spawns a small task that forwards its store feed into
//! one channel owned by the engine. Frames carry the subscription id and the
//! store's commit version, so the engine can drop anything belonging to a
//! cancelled or replaced subscription and anything older than what it has
//! already delivered for that key.

mod engine;
mod note_list;
mod registry;

pub use engine::{LiveSync, LiveUpdate};
pub use registry::{FeedKey, SubscriptionHandle};
