//! Item detail fetching
//!
//! Thin layer between the scheduler and a source adapter: pulls one item's
//! full detail, rejects unusable responses, and normalizes child ordering so
//! ingestion sees replies oldest-id-first regardless of upstream order.

use crate::source::{FetchFailure, ItemDetail, SourceAdapter};

/// Fetches the full detail for one item and normalizes it
///
/// An empty detail (no payload, no children) means the upstream returned a
/// response we cannot store; it is classified as malformed rather than
/// silently ingested as a blank row.
pub async fn fetch_detail<A>(
    adapter: &A,
    source: &str,
    item_id: i64,
) -> Result<ItemDetail, FetchFailure>
where
    A: SourceAdapter + ?Sized,
{
    let mut detail = adapter.fetch_item(source, item_id).await?;

    if detail.is_empty() {
        return Err(FetchFailure::Malformed(format!(
            "empty detail response for item {}",
            item_id
        )));
    }

    detail.children.sort_by_key(|c| c.child_id);
    Ok(detail)
}
