//! Where the validator gets observations from.

use std::future::Future;
use std::pin::Pin;

use trustgate_core::SourceAccessManager;

use crate::{FeedError, OracleFeed, RawObservation};

pub type ObservationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawObservation, FeedError>> + Send + 'a>>;

/// Supplies the latest raw observation for a feed.
pub trait ObservationSource: Send + Sync {
    fn fetch_observation<'a>(&'a self, feed: &'a OracleFeed) -> ObservationFuture<'a>;
}

/// Fetches the feed's query from its source through the breaker, limiter,
/// and cache of the access manager.
impl ObservationSource for SourceAccessManager {
    fn fetch_observation<'a>(&'a self, feed: &'a OracleFeed) -> ObservationFuture<'a> {
        Box::pin(async move {
            let fetched = self.fetch(&feed.source_id, &feed.query).await?;
            Ok(RawObservation::from_payload(
                fetched.source_id,
                &fetched.payload,
            ))
        })
    }
}
