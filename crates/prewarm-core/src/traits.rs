//! Cross-crate traits

use async_trait::async_trait;
use url::Url;

/// Receives notice that a destination was successfully warmed.
///
/// The prefetch manager calls this once per completed speculative request.
/// Failed requests never reach the recorder, so an implementation may treat
/// every call as a genuine prefetch hit candidate.
#[async_trait]
pub trait PrefetchRecorder: Send + Sync {
    /// Record that `url` was just prefetched
    async fn mark_prefetched(&self, url: &Url);
}
