// ! URI handling utilities
// !
// ! Module expands an abbreviated endpoint into one concrete URI per
// ! candidate transport and provides the query-string helpers shared by
// ! the client transports and the server dispatcher.

use std::collections::HashMap;
use url::Url;

use crate::core::error::{VibeError, VibeResult};
use crate::protocol::names::PARAM_TRANSPORT;
use crate::transport::traits::TransportKind;

/// One concrete endpoint the negotiator may try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: TransportKind,
    pub url: Url,
}

/// Parse an endpoint URI
pub fn parse_uri(uri: &str) -> VibeResult<Url> {
    if uri.is_empty() {
        return Err(VibeError::InvalidUri("URI cannot be empty".to_string()));
    }
    Url::parse(uri).map_err(|e| VibeError::InvalidUri(format!("Invalid URI '{uri}': {e}")))
}

/// Expand `uri` into one candidate per transport in `kinds`, preserving order.
///
/// Each candidate carries an explicit `transport=<name>` parameter, and the
/// WebSocket candidate switches `http`/`https` to `ws`/`wss`. A URI that
/// already pins a transport (a `transport` parameter or a `ws`/`wss` scheme)
/// yields a single candidate.
pub fn expand_candidates(uri: &str, kinds: &[TransportKind]) -> VibeResult<Vec<Candidate>> {
    let base = parse_uri(uri)?;

    if let Some(kind) = pinned_kind(&base)? {
        let url = candidate_url(&base, kind)?;
        return Ok(vec![Candidate { kind, url }]);
    }

    match base.scheme() {
        "http" | "https" => {}
        other => {
            return Err(VibeError::InvalidUri(format!(
                "Unsupported scheme '{other}' in '{uri}'"
            )));
        }
    }

    if kinds.is_empty() {
        return Err(VibeError::configuration("no candidate transports configured"));
    }

    let mut candidates = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        if candidates.iter().any(|c: &Candidate| c.kind == kind) {
            continue;
        }
        candidates.push(Candidate {
            kind,
            url: candidate_url(&base, kind)?,
        });
    }
    Ok(candidates)
}

fn pinned_kind(url: &Url) -> VibeResult<Option<TransportKind>> {
    if let Some(name) = query_param(url, PARAM_TRANSPORT) {
        return TransportKind::from_name(&name)
            .map(Some)
            .ok_or(VibeError::UnsupportedTransport(name));
    }
    Ok(match url.scheme() {
        "ws" | "wss" => Some(TransportKind::WebSocket),
        _ => None,
    })
}

fn candidate_url(base: &Url, kind: TransportKind) -> VibeResult<Url> {
    let mut url = base.clone();

    let scheme = match (kind, base.scheme()) {
        (TransportKind::WebSocket, "http") => Some("ws"),
        (TransportKind::WebSocket, "https") => Some("wss"),
        (TransportKind::Stream | TransportKind::LongPoll, "ws") => Some("http"),
        (TransportKind::Stream | TransportKind::LongPoll, "wss") => Some("https"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme).map_err(|_| {
            VibeError::InvalidUri(format!("Cannot use scheme '{scheme}' for '{base}'"))
        })?;
    }

    if query_param(&url, PARAM_TRANSPORT).is_none() {
        url.query_pairs_mut()
            .append_pair(PARAM_TRANSPORT, kind.name());
    }
    Ok(url)
}

/// Copy of `url` with `params` appended to its query
pub fn with_params(url: &Url, params: &[(&str, &str)]) -> Url {
    let mut url = url.clone();
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    url
}

/// First value of query parameter `key`
pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Parse a query string into parameters; later duplicates win
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expand_default_order() {
        let candidates =
            expand_candidates("http://localhost:8080/vibe?room=1", &TransportKind::ALL).unwrap();

        let urls: Vec<String> = candidates.iter().map(|c| c.url.to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "ws://localhost:8080/vibe?room=1&transport=ws",
                "http://localhost:8080/vibe?room=1&transport=stream",
                "http://localhost:8080/vibe?room=1&transport=longpoll",
            ]
        );
    }

    #[test]
    fn test_expand_secure_and_custom_order() {
        let candidates = expand_candidates(
            "https://example.com/vibe",
            &[TransportKind::LongPoll, TransportKind::WebSocket],
        )
        .unwrap();

        assert_eq!(candidates[0].kind, TransportKind::LongPoll);
        assert_eq!(candidates[0].url.scheme(), "https");
        assert_eq!(candidates[1].url.as_str(), "wss://example.com/vibe?transport=ws");
    }

    #[test]
    fn test_pinned_uri_yields_single_candidate() {
        let pinned = expand_candidates(
            "http://localhost/vibe?transport=longpollajax",
            &TransportKind::ALL,
        )
        .unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].kind, TransportKind::LongPoll);
        assert_eq!(
            pinned[0].url.as_str(),
            "http://localhost/vibe?transport=longpollajax"
        );

        let ws = expand_candidates("ws://localhost/vibe", &TransportKind::ALL).unwrap();
        assert_eq!(ws.len(), 1);
        assert_eq!(ws[0].url.as_str(), "ws://localhost/vibe?transport=ws");
    }

    #[test]
    fn test_expand_rejects_bad_input() {
        assert!(matches!(
            expand_candidates("not a uri", &TransportKind::ALL),
            Err(VibeError::InvalidUri(_))
        ));
        assert!(matches!(
            expand_candidates("ftp://host/vibe", &TransportKind::ALL),
            Err(VibeError::InvalidUri(_))
        ));
        assert!(matches!(
            expand_candidates("http://host/vibe?transport=flash", &TransportKind::ALL),
            Err(VibeError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_query_helpers() {
        let url = with_params(
            &parse_uri("http://h/vibe?transport=longpoll").unwrap(),
            &[("when", "poll"), ("id", "a b")],
        );
        assert_eq!(query_param(&url, "when").as_deref(), Some("poll"));
        assert_eq!(query_param(&url, "id").as_deref(), Some("a b"));

        let params = parse_query_string("when=open&transport=sse&callback=cb%5B0%5D");
        assert_eq!(params.get("callback").map(String::as_str), Some("cb[0]"));
        assert_eq!(params.len(), 3);
    }
}
