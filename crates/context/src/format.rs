//! Default request formatter: prepends a `Context:` block to the prompt.
//!
//! ```text
//! Context:
//! - first snippet | tags=a, b | meta=k=v
//! - second snippet
//!
//! original prompt
//! ```

use amaryllis_core::context::{ContextFormatParams, ContextItem};
use amaryllis_core::engine::RequestParams;

fn format_tags(item: &ContextItem) -> Option<String> {
    let tags = item.tags();
    (!tags.is_empty()).then(|| format!("tags={}", tags.join(", ")))
}

fn format_metadata(item: &ContextItem) -> Option<String> {
    let metadata = item.metadata.as_ref().filter(|m| !m.is_empty())?;
    let pairs: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
    Some(format!("meta={}", pairs.join(", ")))
}

/// One bullet line body: `text [| tags=...] [| meta=...]`.
pub fn format_context_item(item: &ContextItem) -> String {
    [Some(item.text.trim().to_string()), format_tags(item), format_metadata(item)]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The default formatter. Returns the request unchanged when there are no items.
pub fn default_formatter(params: &ContextFormatParams<'_>) -> RequestParams {
    if params.items.is_empty() {
        return params.request.clone();
    }

    let block = std::iter::once("Context:".to_string())
        .chain(params.items.iter().map(|item| format!("- {}", format_context_item(item))))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = [block.trim(), params.prompt.trim()]
        .into_iter()
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    RequestParams {
        prompt,
        ..params.request.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaryllis_core::engine::ImageInput;

    fn params<'a>(
        prompt: &'a str,
        items: &'a [ContextItem],
        request: &'a RequestParams,
    ) -> ContextFormatParams<'a> {
        ContextFormatParams {
            prompt,
            items,
            query: None,
            request,
        }
    }

    #[test]
    fn no_items_returns_request_unchanged() {
        let request = RequestParams::new("hello");
        assert_eq!(default_formatter(&params("hello", &[], &request)), request);
    }

    #[test]
    fn prepends_context_block() {
        let items = vec![
            ContextItem::with_id("1", "  saved note  "),
            ContextItem::with_id("2", "tagged").tag("a").tag("b").meta("src", "docs").meta("lang", "en"),
        ];
        let request = RequestParams::new("hello").with_image(ImageInput::new("/img.png"));
        let out = default_formatter(&params("hello", &items, &request));
        assert_eq!(
            out.prompt,
            "Context:\n- saved note\n- tagged | tags=a, b | meta=lang=en, src=docs\n\nhello"
        );
        assert_eq!(out.images, request.images);
    }

    #[test]
    fn blank_prompt_keeps_only_context() {
        let items = vec![ContextItem::with_id("1", "note")];
        let request = RequestParams::new(" ");
        let out = default_formatter(&params(" ", &items, &request));
        assert_eq!(out.prompt, "Context:\n- note");
    }

    #[test]
    fn empty_metadata_is_omitted() {
        let mut item = ContextItem::with_id("1", "note");
        item.metadata = Some(Default::default());
        assert_eq!(format_context_item(&item), "note");
    }
}
