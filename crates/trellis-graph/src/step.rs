use futures::future::BoxFuture;

use trellis_core::Result;

/// A named unit of work operating on shared pipeline state.
///
/// Steps borrow the state for the duration of one invocation. The executor
/// drives one step at a time, so a step body never races another step for
/// the top-level state; any concurrency (e.g. batch fan-out) happens inside
/// the body and must merge back before it returns.
pub trait Step<S>: Send + Sync {
    fn run<'a>(&'a self, state: &'a mut S) -> BoxFuture<'a, Result<()>>;
}

/// Adapter so plain functions and closures can be registered as steps.
pub struct FnStep<F>(F);

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<S, F> Step<S> for FnStep<F>
where
    S: Send,
    F: for<'a> Fn(&'a mut S) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    fn run<'a>(&'a self, state: &'a mut S) -> BoxFuture<'a, Result<()>> {
        (self.0)(state)
    }
}

/// A step that does nothing to the state.
///
/// Useful for pure decision points whose only job is to anchor a
/// conditional edge.
pub struct NoopStep;

impl<S: Send> Step<S> for NoopStep {
    fn run<'a>(&'a self, _state: &'a mut S) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
