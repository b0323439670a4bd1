//! Message and route types.
//!
//! A [`Message`] is the unit of work entering the dispatch engine: a logical
//! route plus an opaque payload. The route is a three-part dotted address
//! (`serverType.handler.method`) parsed into a [`RouteRecord`] before any
//! dispatch decision is made.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply payload produced by handlers and returned to the caller.
pub type Response = Value;

/// A client message as seen by the dispatch engine.
///
/// `route` is the logical address; `body` is the payload passed through to
/// user handlers untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub route: String,
    #[serde(default)]
    pub body: Value,
}

impl Message {
    pub fn new(route: impl Into<String>, body: Value) -> Self {
        Self {
            route: route.into(),
            body,
        }
    }
}

/// Parsed form of a message route.
///
/// All four fields are non-empty by construction; the only way to obtain a
/// `RouteRecord` is [`RouteRecord::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    /// The original route string.
    pub route: String,
    /// Logical role of the server that owns the handler (first segment).
    pub server_type: String,
    /// Handler name within that server type (second segment).
    pub handler: String,
    /// Method name within the handler (third segment).
    pub method: String,
}

impl RouteRecord {
    /// Parses a route of exactly three non-empty dot-separated segments.
    ///
    /// Any other arity, and any empty segment, yields `None`. Whitespace is
    /// not trimmed. The parser has no side effects.
    pub fn parse(route: &str) -> Option<RouteRecord> {
        let mut parts = route.split('.');
        let server_type = parts.next()?;
        let handler = parts.next()?;
        let method = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if server_type.is_empty() || handler.is_empty() || method.is_empty() {
            return None;
        }
        Some(RouteRecord {
            route: route.to_string(),
            server_type: server_type.to_string(),
            handler: handler.to_string(),
            method: method.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segment_route() {
        let record = RouteRecord::parse("area.player.login").unwrap();
        assert_eq!(record.route, "area.player.login");
        assert_eq!(record.server_type, "area");
        assert_eq!(record.handler, "player");
        assert_eq!(record.method, "login");
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(RouteRecord::parse("area.player").is_none());
        assert!(RouteRecord::parse("area.player.login.extra").is_none());
        assert!(RouteRecord::parse("area").is_none());
        assert!(RouteRecord::parse("").is_none());
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(RouteRecord::parse(".player.login").is_none());
        assert!(RouteRecord::parse("area..login").is_none());
        assert!(RouteRecord::parse("area.player.").is_none());
        assert!(RouteRecord::parse("..").is_none());
    }

    #[test]
    fn does_not_trim_whitespace() {
        let record = RouteRecord::parse("area. player.login").unwrap();
        assert_eq!(record.handler, " player");
    }
}
