//! Domain types shared by every trustgate component.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SourceId`] | Identifier of a registered external source |
//! | [`FeedId`] | Identifier of a logical oracle feed |
//! | [`Payload`] | Data returned by a source (price point or generic record) |
//! | [`UtcDateTime`] | RFC3339 timestamp normalized to UTC |

mod ids;
mod payload;
mod timestamp;

pub use ids::{FeedId, SourceId};
pub use payload::{lookup_path, Payload, PricePoint};
pub use timestamp::{extract_timestamp, UtcDateTime, TIMESTAMP_FIELDS};
