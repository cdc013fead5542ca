//! Content preparation and concurrent delivery
//!
//! A display step flows through [`FanOut`]: each device's content is
//! prepared ([`ImagePreparer`] or [`TransitionRenderer`]), registered with
//! the [`ContentServer`] under a per-device URL, and pushed to the device
//! with bounded retries.

mod content;
mod fanout;
mod prepare;
mod push;
mod server;
mod transition;

#[cfg(test)]
mod tests;

pub use content::{ContentCache, PreparedContent, content_key};
pub use fanout::{ContentRequest, Delivery, DeliveryOutcome, FanOut};
pub(crate) use prepare::display_name;
pub use prepare::{ImageOutput, ImagePreparer, fit_within};
pub use push::{PushPolicy, push};
pub use server::{ContentServer, route_probe};
pub use transition::{
    CrossfadeJob, ProgressFn, TransitionRenderer, VideoOutput, blend, letterbox,
};
