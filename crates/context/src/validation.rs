//! Structural checks for context policies, items, queries and media.
//!
//! All checks run before any I/O and fail with [`Error::Validation`] naming
//! the first offending field. Numeric bounds are unsigned in the type model,
//! so "positive" reduces to "non-zero" for them; the only float that crosses
//! this boundary is `recency_bias`, which must be finite.

use std::collections::{BTreeMap, HashSet};

use amaryllis_core::context::{
    ContextItem, ContextPolicy, ContextQuery, MediaReference, MediaValidationPolicy,
};
use amaryllis_core::error::{Error, Result};

const NON_EMPTY: &str = "must be a non-empty string";
const POSITIVE: &str = "must be a positive number";

fn is_non_empty(value: &str) -> bool {
    !value.trim().is_empty()
}

fn assert_non_empty(value: &str, field: &str) -> Result<()> {
    if is_non_empty(value) {
        Ok(())
    } else {
        Err(Error::validation(field, NON_EMPTY))
    }
}

fn assert_positive<T: Default + PartialEq>(value: Option<T>, field: &str) -> Result<()> {
    match value {
        Some(v) if v == T::default() => Err(Error::validation(field, POSITIVE)),
        _ => Ok(()),
    }
}

fn validate_string_list(values: &[String], field: &str) -> Result<()> {
    if values.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    values.iter().try_for_each(|value| assert_non_empty(value, field))
}

fn validate_string_map(map: &BTreeMap<String, String>, field: &str) -> Result<()> {
    for (key, value) in map {
        assert_non_empty(key, &format!("{field} key"))?;
        assert_non_empty(value, &format!("{field} value"))?;
    }
    Ok(())
}

/// Scheme of a URI (`file`, `content`, `https`, ...), lower-cased.
pub fn uri_scheme(uri: &str) -> Option<String> {
    let (scheme, _) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
    valid.then(|| scheme.to_ascii_lowercase())
}

fn is_absolute_path(uri: &str) -> bool {
    if uri.starts_with('/') {
        return true;
    }
    let bytes = uri.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

pub fn validate_context_policy(policy: &ContextPolicy) -> Result<()> {
    assert_positive(policy.max_bytes, "maxBytes")?;
    assert_positive(policy.max_items, "maxItems")?;
    assert_positive(policy.default_ttl_seconds, "defaultTtlSeconds")?;
    // eviction_strategy is a closed enum; unknown values never get this far.
    if let Some(media) = &policy.media {
        validate_media_policy(media)?;
    }
    Ok(())
}

pub fn validate_media_policy(policy: &MediaValidationPolicy) -> Result<()> {
    if let Some(schemes) = &policy.allowed_uri_schemes {
        if schemes.is_empty() {
            return Err(Error::validation("allowedUriSchemes", "must not be empty"));
        }
        for scheme in schemes {
            assert_non_empty(scheme, "allowedUriSchemes item")?;
        }
    }
    assert_positive(policy.max_media_bytes, "maxMediaBytes")?;
    assert_positive(policy.max_media_width, "maxMediaWidth")?;
    assert_positive(policy.max_media_height, "maxMediaHeight")?;
    Ok(())
}

pub fn validate_media_reference(
    reference: &MediaReference,
    policy: Option<&MediaValidationPolicy>,
) -> Result<()> {
    assert_non_empty(&reference.uri, "MediaReference.uri")?;

    let scheme = uri_scheme(&reference.uri);
    if let Some(policy) = policy {
        if policy.require_absolute_uri.unwrap_or(false)
            && scheme.is_none()
            && !is_absolute_path(&reference.uri)
        {
            return Err(Error::validation(
                "MediaReference.uri",
                "must be an absolute path or URI",
            ));
        }

        if let Some(allowed) = &policy.allowed_uri_schemes {
            let Some(scheme) = &scheme else {
                return Err(Error::validation(
                    "MediaReference.uri",
                    "must include a scheme when allowedUriSchemes is set",
                ));
            };
            if !allowed.iter().any(|a| a.eq_ignore_ascii_case(scheme)) {
                return Err(Error::validation(
                    "MediaReference.uri",
                    format!("scheme not allowed: {scheme}"),
                ));
            }
        }
    }

    assert_positive(reference.size_bytes, "MediaReference.sizeBytes")?;
    assert_positive(reference.width, "MediaReference.width")?;
    assert_positive(reference.height, "MediaReference.height")?;

    if let Some(policy) = policy {
        if exceeds(reference.size_bytes, policy.max_media_bytes) {
            return Err(Error::validation(
                "MediaReference.sizeBytes",
                "exceeds policy maxMediaBytes",
            ));
        }
        if exceeds(reference.width, policy.max_media_width) {
            return Err(Error::validation(
                "MediaReference.width",
                "exceeds policy maxMediaWidth",
            ));
        }
        if exceeds(reference.height, policy.max_media_height) {
            return Err(Error::validation(
                "MediaReference.height",
                "exceeds policy maxMediaHeight",
            ));
        }
    }

    Ok(())
}

fn exceeds<T: PartialOrd>(value: Option<T>, limit: Option<T>) -> bool {
    matches!((value, limit), (Some(v), Some(l)) if v > l)
}

pub fn validate_media_references(
    references: Option<&[MediaReference]>,
    policy: Option<&MediaValidationPolicy>,
) -> Result<()> {
    let Some(references) = references else {
        return Ok(());
    };
    if references.is_empty() {
        return Err(Error::validation("media", "must not be an empty array"));
    }
    if let Some(policy) = policy {
        validate_media_policy(policy)?;
    }
    references
        .iter()
        .try_for_each(|reference| validate_media_reference(reference, policy))
}

pub fn validate_context_item(item: &ContextItem, policy: Option<&ContextPolicy>) -> Result<()> {
    assert_non_empty(&item.id, "ContextItem.id")?;
    assert_non_empty(&item.text, "ContextItem.text")?;

    if item.created_at <= 0 {
        return Err(Error::validation("ContextItem.createdAt", POSITIVE));
    }
    if item.updated_at.is_some_and(|t| t <= 0) {
        return Err(Error::validation("ContextItem.updatedAt", POSITIVE));
    }
    assert_positive(item.ttl_seconds, "ContextItem.ttlSeconds")?;

    if let Some(tags) = &item.tags {
        validate_string_list(tags, "ContextItem.tags")?;
    }
    if let Some(metadata) = &item.metadata {
        validate_string_map(metadata, "ContextItem.metadata")?;
    }

    validate_media_references(
        item.media.as_deref(),
        policy.and_then(|p| p.media.as_ref()),
    )
}

/// Validate a batch. Ids must be unique within the batch.
pub fn validate_context_items(items: &[ContextItem], policy: Option<&ContextPolicy>) -> Result<()> {
    if items.is_empty() {
        return Err(Error::validation("items", "must not be empty"));
    }
    if let Some(policy) = policy {
        validate_context_policy(policy)?;
    }
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        validate_context_item(item, policy)?;
        if !seen.insert(item.id.as_str()) {
            return Err(Error::validation(
                "ContextItem.id",
                format!("is duplicated in batch: {}", item.id),
            ));
        }
    }
    Ok(())
}

pub fn validate_context_query(query: &ContextQuery) -> Result<()> {
    assert_non_empty(&query.text, "ContextQuery.text")?;
    assert_positive(query.limit, "ContextQuery.limit")?;

    if query.recency_bias.is_some_and(|b| !b.is_finite()) {
        return Err(Error::validation(
            "ContextQuery.recencyBias",
            "must be a finite number",
        ));
    }
    if let Some(tags) = &query.tags {
        validate_string_list(tags, "ContextQuery.tags")?;
    }
    if let Some(filters) = &query.filters {
        validate_string_map(filters, "ContextQuery.filters")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaryllis_core::context::EvictionStrategy;

    fn item(id: &str, text: &str) -> ContextItem {
        let mut item = ContextItem::with_id(id, text);
        item.created_at = 1;
        item
    }

    fn field_of(result: Result<()>) -> String {
        result.unwrap_err().field().unwrap().to_string()
    }

    #[test]
    fn valid_policies_pass() {
        let policy = ContextPolicy {
            max_bytes: Some(1024),
            max_items: Some(10),
            default_ttl_seconds: Some(60),
            eviction_strategy: Some(EvictionStrategy::Recency),
            media: Some(MediaValidationPolicy {
                allowed_uri_schemes: Some(vec!["file".into()]),
                max_media_bytes: Some(1),
                ..Default::default()
            }),
        };
        assert!(validate_context_policy(&policy).is_ok());
        assert!(validate_context_policy(&ContextPolicy::default()).is_ok());
    }

    #[test]
    fn zero_bounds_rejected() {
        let zero_items = ContextPolicy {
            max_items: Some(0),
            ..Default::default()
        };
        assert_eq!(field_of(validate_context_policy(&zero_items)), "maxItems");

        let zero_bytes = ContextPolicy {
            max_bytes: Some(0),
            ..Default::default()
        };
        assert_eq!(field_of(validate_context_policy(&zero_bytes)), "maxBytes");

        let zero_ttl = ContextPolicy {
            default_ttl_seconds: Some(0),
            ..Default::default()
        };
        assert!(validate_context_policy(&zero_ttl).unwrap_err().is_validation());
    }

    #[test]
    fn media_policy_rejects_empty_scheme_list() {
        let policy = ContextPolicy {
            media: Some(MediaValidationPolicy {
                allowed_uri_schemes: Some(vec![]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(field_of(validate_context_policy(&policy)), "allowedUriSchemes");

        let blank = MediaValidationPolicy {
            allowed_uri_schemes: Some(vec!["  ".into()]),
            ..Default::default()
        };
        assert!(validate_media_policy(&blank).is_err());
    }

    #[test]
    fn blank_query_rejected() {
        let err = validate_context_query(&ContextQuery::new("  ")).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.field(), Some("ContextQuery.text"));
    }

    #[test]
    fn query_bounds() {
        assert!(validate_context_query(&ContextQuery::new("q").with_limit(0)).is_err());
        assert!(validate_context_query(&ContextQuery::new("q").with_recency_bias(f64::NAN)).is_err());
        assert!(
            validate_context_query(&ContextQuery::new("q").with_recency_bias(f64::INFINITY))
                .is_err()
        );
        // Out-of-range but finite bias is clamped at scoring time, not rejected.
        assert!(validate_context_query(&ContextQuery::new("q").with_recency_bias(7.0)).is_ok());

        let empty_tags = ContextQuery {
            tags: Some(vec![]),
            ..ContextQuery::new("q")
        };
        assert_eq!(field_of(validate_context_query(&empty_tags)), "ContextQuery.tags");

        let blank_filter = ContextQuery::new("q").with_filter("k", " ");
        assert_eq!(
            field_of(validate_context_query(&blank_filter)),
            "ContextQuery.filters value"
        );
    }

    #[test]
    fn item_field_checks() {
        assert_eq!(field_of(validate_context_item(&item("", "x"), None)), "ContextItem.id");
        assert_eq!(field_of(validate_context_item(&item("a", " "), None)), "ContextItem.text");

        let mut bad_created = item("a", "x");
        bad_created.created_at = 0;
        assert_eq!(field_of(validate_context_item(&bad_created, None)), "ContextItem.createdAt");

        let mut bad_updated = item("a", "x");
        bad_updated.updated_at = Some(-5);
        assert_eq!(field_of(validate_context_item(&bad_updated, None)), "ContextItem.updatedAt");

        let mut bad_ttl = item("a", "x");
        bad_ttl.ttl_seconds = Some(0);
        assert_eq!(field_of(validate_context_item(&bad_ttl, None)), "ContextItem.ttlSeconds");

        let mut empty_tags = item("a", "x");
        empty_tags.tags = Some(vec![]);
        assert_eq!(field_of(validate_context_item(&empty_tags, None)), "ContextItem.tags");

        let blank_key = item("a", "x").meta(" ", "v");
        assert_eq!(
            field_of(validate_context_item(&blank_key, None)),
            "ContextItem.metadata key"
        );
    }

    #[test]
    fn empty_media_list_rejected() {
        let mut it = item("a", "x");
        it.media = Some(vec![]);
        assert_eq!(field_of(validate_context_item(&it, None)), "media");
    }

    #[test]
    fn media_requires_absolute_uri_under_policy() {
        let policy = MediaValidationPolicy {
            require_absolute_uri: Some(true),
            ..Default::default()
        };
        let relative = MediaReference::new("relative/path.png");
        assert!(validate_media_reference(&relative, Some(&policy)).is_err());
        assert!(validate_media_reference(&relative, None).is_ok());

        assert!(validate_media_reference(&MediaReference::new("/abs/a.png"), Some(&policy)).is_ok());
        assert!(validate_media_reference(&MediaReference::new("C:\\img.png"), Some(&policy)).is_ok());
        assert!(
            validate_media_reference(&MediaReference::new("file:///a.png"), Some(&policy)).is_ok()
        );
    }

    #[test]
    fn media_scheme_whitelist() {
        let policy = MediaValidationPolicy {
            allowed_uri_schemes: Some(vec!["FILE".into(), "content".into()]),
            ..Default::default()
        };
        assert!(validate_media_reference(&MediaReference::new("file:///a.png"), Some(&policy)).is_ok());
        assert!(
            validate_media_reference(&MediaReference::new("content://media/1"), Some(&policy))
                .is_ok()
        );

        let err = validate_media_reference(&MediaReference::new("https://x/a.png"), Some(&policy))
            .unwrap_err();
        assert!(err.to_string().contains("scheme not allowed: https"));

        let err = validate_media_reference(&MediaReference::new("/no/scheme.png"), Some(&policy))
            .unwrap_err();
        assert!(err.to_string().contains("must include a scheme"));
    }

    #[test]
    fn media_size_limits() {
        let policy = MediaValidationPolicy {
            max_media_bytes: Some(100),
            max_media_width: Some(640),
            max_media_height: Some(480),
            ..Default::default()
        };
        let mut media = MediaReference::new("/a.png");
        media.size_bytes = Some(101);
        assert_eq!(
            validate_media_reference(&media, Some(&policy)).unwrap_err().field(),
            Some("MediaReference.sizeBytes")
        );

        media.size_bytes = Some(100);
        media.width = Some(641);
        assert_eq!(
            validate_media_reference(&media, Some(&policy)).unwrap_err().field(),
            Some("MediaReference.width")
        );

        media.width = Some(640);
        media.height = Some(0);
        assert!(validate_media_reference(&media, None).is_err());

        media.height = Some(480);
        assert!(validate_media_reference(&media, Some(&policy)).is_ok());
    }

    #[test]
    fn item_media_checked_against_policy() {
        let policy = ContextPolicy {
            media: Some(MediaValidationPolicy {
                require_absolute_uri: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut it = item("a", "x");
        it.media = Some(vec![MediaReference::new("relative.png")]);
        assert!(validate_context_item(&it, Some(&policy)).is_err());
        assert!(validate_context_item(&it, None).is_ok());
    }

    #[test]
    fn batch_checks() {
        assert_eq!(field_of(validate_context_items(&[], None)), "items");

        let batch = [item("a", "x"), item("", "x")];
        assert_eq!(field_of(validate_context_items(&batch, None)), "ContextItem.id");

        let dupes = [item("a", "x"), item("a", "y")];
        let err = validate_context_items(&dupes, None).unwrap_err();
        assert!(err.to_string().contains("duplicated"));

        let bad_policy = ContextPolicy {
            max_items: Some(0),
            ..Default::default()
        };
        assert!(validate_context_items(&[item("a", "x")], Some(&bad_policy)).is_err());
    }

    #[test]
    fn scheme_parsing() {
        assert_eq!(uri_scheme("File:///x").as_deref(), Some("file"));
        assert_eq!(uri_scheme("content://a").as_deref(), Some("content"));
        assert_eq!(uri_scheme("a+b.c-d:x").as_deref(), Some("a+b.c-d"));
        assert_eq!(uri_scheme("/abs/path"), None);
        assert_eq!(uri_scheme("1abc:x"), None);
        assert_eq!(uri_scheme("no scheme here"), None);
    }
}
