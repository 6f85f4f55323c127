//! Context augmentation step shared by both hook shapes.

use amaryllis_core::context::{ContextEngine, ContextFormatParams, ContextQuery};
use amaryllis_core::engine::RequestParams;
use amaryllis_core::error::Result;
use tracing::debug;

/// Rewrite `request` with retrieved context.
///
/// An explicit `query` wins over the engine's derived one. With neither, or
/// without a context engine, the request is returned untouched. A search
/// failure is returned as is; the caller must not generate afterwards.
pub async fn augment_request(
    context: Option<&dyn ContextEngine>,
    query: Option<&ContextQuery>,
    request: RequestParams,
) -> Result<RequestParams> {
    let Some(context) = context else {
        return Ok(request);
    };
    let Some(query) = query
        .cloned()
        .or_else(|| context.derive_query(&request.prompt, &request))
    else {
        return Ok(request);
    };

    let items = context.search(&query).await?;
    debug!(items = items.len(), query = %query.text, "Context retrieved for request");
    Ok(context.format_request(&ContextFormatParams {
        prompt: &request.prompt,
        items: &items,
        query: Some(&query),
        request: &request,
    }))
}
