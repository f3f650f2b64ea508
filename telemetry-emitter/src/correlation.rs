//! Per-cycle correlation context.
//!
//! Each emission cycle opens one root span. Its trace and span IDs are
//! copied into a [`CorrelationContext`] that is handed by value to log and
//! metric emission, so all three signals of a cycle join downstream on the
//! same identifiers.

use opentelemetry::KeyValue;
use opentelemetry::trace::Status;
use rand::Rng;

use crate::error::{EmitterError, Result};
use crate::pipeline::{SignalKind, SpanHandle, TracePipeline};

/// Trace and span identifiers of one cycle's root span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    trace_id: String,
    span_id: String,
    detached: bool,
}

impl CorrelationContext {
    /// A context for an existing root span's IDs.
    pub fn new(trace_id: String, span_id: String) -> Self {
        Self {
            trace_id,
            span_id,
            detached: false,
        }
    }

    fn from_span(span: &dyn SpanHandle) -> Self {
        Self {
            trace_id: span.trace_id(),
            span_id: span.span_id(),
            detached: false,
        }
    }

    /// A context with locally generated W3C-shaped IDs, used when no root
    /// span could be opened for the cycle.
    pub fn detached<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let trace_id = rng.gen_range(1..=u128::MAX);
        let span_id = rng.gen_range(1..=u64::MAX);

        Self {
            trace_id: format!("{:032x}", trace_id),
            span_id: format!("{:016x}", span_id),
            detached: true,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Whether the IDs belong to no exported span.
    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

/// Scope of one emission cycle. Owns the root span and ends it exactly once:
/// explicitly through [`end_cycle`], or on drop along any other exit path.
pub struct CycleGuard {
    root: Option<Box<dyn SpanHandle>>,
    context: CorrelationContext,
}

impl CycleGuard {
    /// A guard with no root span, for cycles that continue without tracing.
    pub fn detached(context: CorrelationContext) -> Self {
        Self {
            root: None,
            context,
        }
    }

    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Whether a root span is open for this cycle.
    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    /// Open a child span under the root.
    pub fn start_child(&self, name: &str) -> Result<Box<dyn SpanHandle>> {
        match &self.root {
            Some(root) => root.start_child(name),
            None => Err(EmitterError::emit(
                SignalKind::Traces,
                "no root span for this cycle",
            )),
        }
    }

    /// Set an attribute on the root span, if there is one.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        if let Some(root) = self.root.as_mut() {
            root.set_attribute(attribute);
        }
    }

    /// Set the root span status, if there is one.
    pub fn set_status(&mut self, status: Status) {
        if let Some(root) = self.root.as_mut() {
            root.set_status(status);
        }
    }

    /// Close the root span.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(root) = self.root.take() {
            root.end();
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for CycleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleGuard")
            .field("context", &self.context)
            .field("has_root", &self.root.is_some())
            .finish()
    }
}

/// Open the root span of a new cycle.
pub fn begin_cycle(trace: &dyn TracePipeline, root_name: &str) -> Result<CycleGuard> {
    let root = trace.start_root(root_name)?;
    let context = CorrelationContext::from_span(root.as_ref());

    Ok(CycleGuard {
        root: Some(root),
        context,
    })
}

/// Close the root span of a cycle.
pub fn end_cycle(guard: CycleGuard) {
    guard.end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTracePipeline;
    use crate::pipeline::SignalPipeline;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_context_matches_root_span() {
        let trace = MemoryTracePipeline::new();
        let guard = begin_cycle(&trace, "random-trace").unwrap();
        let context = guard.context().clone();
        end_cycle(guard);

        let spans = trace.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "random-trace");
        assert_eq!(spans[0].trace_id, context.trace_id());
        assert_eq!(spans[0].span_id, context.span_id());
        assert!(!context.is_detached());
    }

    #[test]
    fn test_root_ends_on_drop() {
        let trace = MemoryTracePipeline::new();

        let result: Result<()> = (|| {
            let _guard = begin_cycle(&trace, "random-trace")?;
            assert_eq!(trace.open_roots(), 1);
            Err(EmitterError::emit(SignalKind::Logs, "sink gone"))
        })();

        assert!(result.is_err());
        assert_eq!(trace.open_roots(), 0);
        assert_eq!(trace.finished_spans().len(), 1);
    }

    #[test]
    fn test_child_shares_trace_id() {
        let trace = MemoryTracePipeline::new();
        let guard = begin_cycle(&trace, "random-trace").unwrap();

        let child = guard.start_child("cache-fetch").unwrap();
        assert_eq!(child.trace_id(), guard.context().trace_id());
        assert_ne!(child.span_id(), guard.context().span_id());
        child.end();
        guard.end();

        let spans = trace.finished_spans();
        assert_eq!(spans.len(), 2);
        let child = spans.iter().find(|s| s.name == "cache-fetch").unwrap();
        let root = spans.iter().find(|s| s.name == "random-trace").unwrap();
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
    }

    #[test]
    fn test_begin_cycle_fails_when_closed() {
        let trace = MemoryTracePipeline::new();
        trace.shutdown().unwrap();

        let err = begin_cycle(&trace, "random-trace").unwrap_err();
        assert!(matches!(err, EmitterError::PipelineClosed(SignalKind::Traces)));
    }

    #[test]
    fn test_detached_context() {
        let mut rng = StdRng::seed_from_u64(42);
        let context = CorrelationContext::detached(&mut rng);

        assert!(context.is_detached());
        assert_eq!(context.trace_id().len(), 32);
        assert_eq!(context.span_id().len(), 16);
        assert_ne!(context.trace_id(), "0".repeat(32));

        let guard = CycleGuard::detached(context);
        assert!(!guard.has_root());
        assert!(guard.start_child("api-call").is_err());
    }
}
