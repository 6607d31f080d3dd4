//! Distributed trace context propagation.
//!
//! Every remote call carries a string map (the [`Carrier`]). A handler
//! extracts the caller's context from the inbound carrier, starts one span
//! for the call, and injects a fresh carrier rooted at that span into each
//! downstream call. Carriers use the W3C `traceparent` and `baggage` formats.
//!
//! Context is threaded explicitly through arguments; nothing is stored in
//! thread-locals. A [`Span`] is finished exactly once: explicitly through
//! [`Span::finish`], or on drop when the owning call returns early.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type Carrier = HashMap<String, String>;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const BAGGAGE_HEADER: &str = "baggage";

const TRACEPARENT_VERSION: &str = "00";
const SAMPLED_FLAGS: &str = "01";

/// Immutable identifiers relating a unit of work to its caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
    baggage: BTreeMap<String, String>,
}

impl TraceContext {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn baggage(&self) -> &BTreeMap<String, String> {
        &self.baggage
    }

    fn from_carrier(carrier: &Carrier) -> Option<Self> {
        let traceparent = carrier.get(TRACEPARENT_HEADER)?;
        let mut parts = traceparent.trim().split('-');
        let (version, trace_id, span_id, _flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some()
            || version != TRACEPARENT_VERSION
            || !is_valid_id(trace_id, 32)
            || !is_valid_id(span_id, 16)
        {
            return None;
        }

        let baggage = carrier
            .get(BAGGAGE_HEADER)
            .map(|value| parse_baggage(value))
            .unwrap_or_default();

        Some(TraceContext {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            baggage,
        })
    }

    fn to_carrier(&self) -> Carrier {
        let mut carrier = Carrier::new();
        carrier.insert(
            TRACEPARENT_HEADER.to_string(),
            format!(
                "{TRACEPARENT_VERSION}-{}-{}-{SAMPLED_FLAGS}",
                self.trace_id, self.span_id
            ),
        );
        if !self.baggage.is_empty() {
            let baggage = self
                .baggage
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(",");
            carrier.insert(BAGGAGE_HEADER.to_string(), baggage);
        }
        carrier
    }
}

fn is_valid_id(id: &str, len: usize) -> bool {
    id.len() == len
        && id.chars().all(|c| c.is_ascii_hexdigit())
        && id.chars().any(|c| c != '0')
}

fn parse_baggage(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Record of a span once it has finished.
#[derive(Clone, Debug)]
pub struct FinishedSpan {
    pub name: &'static str,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub duration: Duration,
}

/// Receives every finished span.
pub trait SpanReporter: Send + Sync {
    fn report(&self, span: FinishedSpan);
}

/// Emits finished spans as debug events.
pub struct LogReporter;

impl SpanReporter for LogReporter {
    fn report(&self, span: FinishedSpan) {
        tracing::debug!(
            span_name = span.name,
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            parent_span_id = ?span.parent_span_id,
            duration_ms = span.duration.as_secs_f64() * 1000.0,
            "Span finished"
        );
    }
}

/// Keeps finished spans in memory.
#[derive(Default)]
pub struct RecordingReporter {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl RecordingReporter {
    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<FinishedSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|span| span.name == name)
            .cloned()
            .collect()
    }
}

impl SpanReporter for RecordingReporter {
    fn report(&self, span: FinishedSpan) {
        self.spans.lock().push(span);
    }
}

/// Creates spans and moves their context in and out of carriers.
#[derive(Clone)]
pub struct Tracer {
    reporter: Arc<dyn SpanReporter>,
}

impl Tracer {
    pub fn new(reporter: Arc<dyn SpanReporter>) -> Self {
        Self { reporter }
    }

    /// Tracer that reports finished spans through `tracing`.
    pub fn logging() -> Self {
        Self::new(Arc::new(LogReporter))
    }

    /// Reads the caller's context. A missing or malformed carrier yields
    /// `None`, and spans started from it become trace roots.
    pub fn extract(&self, carrier: &Carrier) -> Option<TraceContext> {
        let context = TraceContext::from_carrier(carrier);
        if context.is_none() && carrier.contains_key(TRACEPARENT_HEADER) {
            tracing::debug!(carrier = ?carrier, "Ignoring malformed trace carrier");
        }
        context
    }

    pub fn start_span(&self, name: &'static str, parent: Option<&TraceContext>) -> Span {
        let (trace_id, parent_span_id, baggage) = match parent {
            Some(parent) => (
                parent.trace_id.clone(),
                Some(parent.span_id.clone()),
                parent.baggage.clone(),
            ),
            None => (new_trace_id(), None, BTreeMap::new()),
        };

        Span {
            name,
            context: TraceContext {
                trace_id,
                span_id: new_span_id(),
                baggage,
            },
            parent_span_id,
            started: Instant::now(),
            reporter: self.reporter.clone(),
            finished: false,
        }
    }

    /// Fresh carrier for one downstream call, rooted at `span`.
    pub fn inject(&self, span: &Span) -> Carrier {
        span.context.to_carrier()
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// A unit of work being recorded.
pub struct Span {
    name: &'static str,
    context: TraceContext,
    parent_span_id: Option<String>,
    started: Instant,
    reporter: Arc<dyn SpanReporter>,
    finished: bool,
}

impl Span {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Starts a span for a sub-step of this one.
    pub fn child(&self, name: &'static str) -> Span {
        Span {
            name,
            context: TraceContext {
                trace_id: self.context.trace_id.clone(),
                span_id: new_span_id(),
                baggage: self.context.baggage.clone(),
            },
            parent_span_id: Some(self.context.span_id.clone()),
            started: Instant::now(),
            reporter: self.reporter.clone(),
            finished: false,
        }
    }

    pub fn finish(mut self) {
        self.report();
    }

    fn report(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        self.reporter.report(FinishedSpan {
            name: self.name,
            trace_id: self.context.trace_id.clone(),
            span_id: self.context.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            duration: self.started.elapsed(),
        });
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.report();
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("parent_span_id", &self.parent_span_id)
            .finish()
    }
}
