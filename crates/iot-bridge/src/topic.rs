//! Topic patterns and the first-match-wins topic router
//!
//! Pattern syntax, one rule per slash-delimited segment:
//! - `bin` literal, matched exactly
//! - `{id}` named capture of one non-empty segment
//! - `{id:hex}` / `{id:digits}` named capture restricted to a character class
//! - `+` anonymous capture of one non-empty segment
//! - `#` capture of all remaining segments, last position only
//!
//! Each pattern also knows the broker subscription filter that delivers its topics.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::PatternError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureClass {
    Any,
    Hex,
    Digits,
}

impl CaptureClass {
    fn accepts(&self, segment: &str) -> bool {
        if segment.is_empty() {
            return false;
        }
        match self {
            CaptureClass::Any => true,
            CaptureClass::Hex => segment.chars().all(|c| c.is_ascii_hexdigit()),
            CaptureClass::Digits => segment.chars().all(|c| c.is_ascii_digit()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture { name: Option<String>, class: CaptureClass },
    Remainder,
}

/// A compiled topic pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    source: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let raw: Vec<&str> = pattern.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut names: Vec<String> = Vec::new();

        for (i, part) in raw.iter().enumerate() {
            let segment = match *part {
                "" => return Err(PatternError::EmptySegment(i)),
                "+" => Segment::Capture { name: None, class: CaptureClass::Any },
                "#" if i + 1 == raw.len() => Segment::Remainder,
                "#" => return Err(PatternError::MultiLevelNotLast),
                s if s.starts_with('{') && s.ends_with('}') => {
                    let (name, class) = parse_capture(s)?;
                    if names.contains(&name) {
                        return Err(PatternError::DuplicateName(name));
                    }
                    names.push(name.clone());
                    Segment::Capture { name: Some(name), class }
                }
                s if s.contains(['{', '}', '+', '#']) => {
                    return Err(PatternError::MalformedCapture(s.to_string()));
                }
                s => Segment::Literal(s.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { source: pattern.to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a concrete topic, returning captured parameters in pattern order
    pub fn matches(&self, topic: &str) -> Option<TopicParams> {
        let mut levels = topic.split('/');
        let mut params = TopicParams::default();

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if levels.next()? != lit.as_str() {
                        return None;
                    }
                }
                Segment::Capture { name, class } => {
                    let level = levels.next()?;
                    if !class.accepts(level) {
                        return None;
                    }
                    params.push(name.clone(), level.to_string());
                }
                Segment::Remainder => {
                    let rest: Vec<&str> = levels.by_ref().collect();
                    params.push(None, rest.join("/"));
                    return Some(params);
                }
            }
        }

        match levels.next() {
            Some(_) => None,
            None => Some(params),
        }
    }

    /// Broker filter covering every topic this pattern can match
    pub fn subscription_filter(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(lit) => lit.as_str(),
                Segment::Capture { .. } => "+",
                Segment::Remainder => "#",
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn parse_capture(segment: &str) -> Result<(String, CaptureClass), PatternError> {
    let inner = &segment[1..segment.len() - 1];
    let (name, class) = match inner.split_once(':') {
        Some((name, class)) => (name, Some(class)),
        None => (inner, None),
    };

    let valid_name = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(PatternError::MalformedCapture(segment.to_string()));
    }

    let class = match class {
        None | Some("any") => CaptureClass::Any,
        Some("hex") => CaptureClass::Hex,
        Some("digits") => CaptureClass::Digits,
        Some(other) => return Err(PatternError::UnknownClass(other.to_string())),
    };

    Ok((name.to_string(), class))
}

impl FromStr for TopicPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parameters captured from a topic, addressable by position or by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicParams {
    entries: Vec<(Option<String>, String)>,
}

impl TopicParams {
    fn push(&mut self, name: Option<String>, value: String) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn positional(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Target of a routed message. Errors are logged and dropped by the router.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, payload: Bytes, params: TopicParams) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`TopicHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TopicHandler for FnHandler<F>
where
    F: Fn(Bytes, TopicParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: Bytes, params: TopicParams) -> anyhow::Result<()> {
        (self.0)(payload, params).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TopicHandler>
where
    F: Fn(Bytes, TopicParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Route {
    pattern: TopicPattern,
    handler: Arc<dyn TopicHandler>,
}

/// Ordered routing table. The first registered pattern that matches a topic wins.
#[derive(Default)]
pub struct TopicRouter {
    routes: RwLock<Vec<Route>>,
    routed: AtomicU64,
    unrouted: AtomicU64,
    failed: Arc<AtomicU64>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route; registration order is the match order
    pub fn register(&self, pattern: &str, handler: Arc<dyn TopicHandler>) -> Result<(), PatternError> {
        let pattern = TopicPattern::parse(pattern)?;
        debug!(pattern = %pattern, "Registered topic route");
        self.routes.write().push(Route { pattern, handler });
        Ok(())
    }

    /// Route one inbound message.
    ///
    /// The matched handler runs on its own task; the returned handle completes once
    /// it has finished. `None` means no route matched and the message was dropped.
    pub fn dispatch(&self, topic: &str, payload: Bytes) -> Option<JoinHandle<()>> {
        let matched = {
            let routes = self.routes.read();
            routes.iter().find_map(|route| {
                route
                    .pattern
                    .matches(topic)
                    .map(|params| (route.pattern.clone(), route.handler.clone(), params))
            })
        };

        let Some((pattern, handler, params)) = matched else {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %topic, "No route for topic, dropping message");
            return None;
        };

        self.routed.fetch_add(1, Ordering::Relaxed);
        let topic = topic.to_string();
        let failed = self.failed.clone();

        Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(payload, params))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %topic,
                        pattern = %pattern,
                        error = %format!("{:#}", e),
                        "Handler failed, message dropped"
                    );
                }
                Err(_) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    error!(topic = %topic, pattern = %pattern, "Handler panicked, message dropped");
                }
            }
        }))
    }

    /// Distinct broker filters for all registered routes, in registration order
    pub fn subscription_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::new();
        for route in self.routes.read().iter() {
            let filter = route.pattern.subscription_filter();
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        filters
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn unrouted_count(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
