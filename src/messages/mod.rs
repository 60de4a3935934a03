//! Outgoing message shaping: chunking, typing pace and delivery.

pub mod delivery;
pub mod random;
pub mod split;

pub use delivery::{DeliveryPipeline, DeliveryReport};
pub use random::{RandomSource, ThreadRandom};
