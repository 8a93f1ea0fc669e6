//! Sequential transform-and-forward dispatch.
//!
//! A [`Pipeline`] threads one payload through a list of pipes. Each pipe gets
//! the payload and a [`Next`] continuation, and either:
//!
//! 1. forwards a (possibly transformed) payload with `next.run(payload)`,
//! 2. returns a value without forwarding, which ends the chain with that value,
//! 3. fails, which aborts the pipeline, or with `continue_on_failure` is
//!    logged and skipped so the next pipe sees the payload the failing pipe
//!    was given.
//!
//! A pipe that fails *after* forwarding always aborts: the rest of the chain
//! already ran and cannot be replayed.
//!
//! # Example
//!
//! ```rust,ignore
//! let slug = Pipeline::send(title)
//!     .pipe(|s: String, next| next.run(s.trim().to_string()))
//!     .pipe(|s: String, next| next.run(s.to_lowercase()))
//!     .then_return()?;
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;

use tracing::{trace, warn};

use crate::error::{BoxError, PipelineError};

/// One stage of a [`Pipeline`].
pub trait Pipe<T> {
    /// Handles the payload, forwarding it through `next` to continue.
    fn handle(&self, payload: T, next: Next<'_, T>) -> Result<T, BoxError>;
}

impl<T, F> Pipe<T> for F
where
    F: Fn(T, Next<'_, T>) -> Result<T, BoxError>,
{
    fn handle(&self, payload: T, next: Next<'_, T>) -> Result<T, BoxError> {
        self(payload, next)
    }
}

/// A boxed pipe.
pub type BoxedPipe<T> = Box<dyn Pipe<T>>;

/// Boxes a closure as a pipe, for use with [`Pipeline::through`].
pub fn pipe_fn<T, F>(f: F) -> BoxedPipe<T>
where
    T: 'static,
    F: Fn(T, Next<'_, T>) -> Result<T, BoxError> + 'static,
{
    Box::new(f)
}

// ============================================================================
// Continuation
// ============================================================================

trait Forward<T> {
    fn forward(&self, index: usize, payload: T) -> Result<T, BoxError>;
}

/// The rest of the chain after the current pipe.
pub struct Next<'a, T> {
    chain: &'a dyn Forward<T>,
    index: usize,
}

impl<T> Next<'_, T> {
    /// Runs the remaining pipes and the destination on `payload`.
    pub fn run(self, payload: T) -> Result<T, BoxError> {
        self.chain.forward(self.index, payload)
    }

    /// Zero-based position of the pipe this continuation leads to.
    pub fn position(&self) -> usize {
        self.index
    }
}

impl<T> fmt::Debug for Next<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

type Destination<'d, T> = Box<dyn FnOnce(T) -> Result<T, BoxError> + 'd>;

struct Chain<'d, T> {
    pipes: &'d [BoxedPipe<T>],
    continue_on_failure: bool,
    destination: RefCell<Option<Destination<'d, T>>>,
    // Deepest position entered so far.
    reached: Cell<usize>,
}

impl<T: Clone> Forward<T> for Chain<'_, T> {
    fn forward(&self, index: usize, payload: T) -> Result<T, BoxError> {
        self.reached.set(self.reached.get().max(index));

        let Some(pipe) = self.pipes.get(index) else {
            let destination = self.destination.borrow_mut().take();
            return match destination {
                Some(destination) => destination(payload)
                    .map_err(|err| Box::new(PipelineError::Destination(err)) as BoxError),
                None => Ok(payload),
            };
        };

        let fallback = self.continue_on_failure.then(|| payload.clone());
        let next = Next {
            chain: self,
            index: index + 1,
        };

        match pipe.handle(payload, next) {
            Ok(payload) => Ok(payload),
            // Already attributed further down the chain.
            Err(err) if err.is::<PipelineError>() => Err(err),
            Err(err) => match fallback {
                Some(payload) if self.reached.get() <= index => {
                    warn!(pipe = index, error = %err, "Pipe failed, continuing with its input");
                    self.forward(index + 1, payload)
                }
                _ => Err(Box::new(PipelineError::Pipe { index, source: err })),
            },
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

type SuccessHook<T> = Box<dyn FnOnce(&T)>;
type FailureHook = Box<dyn FnOnce(&PipelineError)>;

/// Sends a payload through a sequence of pipes.
pub struct Pipeline<T> {
    payload: T,
    pipes: Vec<BoxedPipe<T>>,
    continue_on_failure: bool,
    on_success: Option<SuccessHook<T>>,
    on_failure: Option<FailureHook>,
}

impl<T: Clone + 'static> Pipeline<T> {
    /// Starts a pipeline for `payload`.
    pub fn send(payload: T) -> Self {
        Self {
            payload,
            pipes: Vec::new(),
            continue_on_failure: false,
            on_success: None,
            on_failure: None,
        }
    }

    /// Appends boxed pipes in order.
    pub fn through<I>(mut self, pipes: I) -> Self
    where
        I: IntoIterator<Item = BoxedPipe<T>>,
    {
        self.pipes.extend(pipes);
        self
    }

    /// Appends one closure pipe.
    pub fn pipe<F>(mut self, f: F) -> Self
    where
        F: Fn(T, Next<'_, T>) -> Result<T, BoxError> + 'static,
    {
        self.pipes.push(Box::new(f));
        self
    }

    /// Logs and skips failing pipes instead of aborting.
    pub fn continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    /// Observes the final payload of a successful run.
    pub fn on_success(mut self, hook: impl FnOnce(&T) + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Observes the error of a failed run.
    pub fn on_failure(mut self, hook: impl FnOnce(&PipelineError) + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Runs the pipes, handing the result to `destination`.
    ///
    /// The destination only runs if every pipe forwarded.
    pub fn then<F>(self, destination: F) -> Result<T, PipelineError>
    where
        F: FnOnce(T) -> Result<T, BoxError>,
    {
        let Self {
            payload,
            pipes,
            continue_on_failure,
            on_success,
            on_failure,
        } = self;

        trace!(pipes = pipes.len(), continue_on_failure, "Running pipeline");

        let chain = Chain {
            pipes: &pipes,
            continue_on_failure,
            destination: RefCell::new(Some(Box::new(destination))),
            reached: Cell::new(0),
        };
        let outcome = chain.forward(0, payload).map_err(|err| match err.downcast::<PipelineError>() {
            Ok(err) => *err,
            Err(source) => PipelineError::Pipe { index: 0, source },
        });

        match &outcome {
            Ok(payload) => {
                if let Some(hook) = on_success {
                    hook(payload);
                }
            }
            Err(err) => {
                if let Some(hook) = on_failure {
                    hook(err);
                }
            }
        }
        outcome
    }

    /// Runs the pipes and returns the resulting payload.
    pub fn then_return(self) -> Result<T, PipelineError> {
        self.then(Ok)
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipes", &self.pipes.len())
            .field("continue_on_failure", &self.continue_on_failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn append(suffix: &'static str) -> BoxedPipe<String> {
        pipe_fn(move |s: String, next: Next<'_, String>| next.run(s + suffix))
    }

    fn failing() -> BoxedPipe<String> {
        pipe_fn(|_: String, _: Next<'_, String>| Err("broken pipe".into()))
    }

    #[test]
    fn test_pipes_run_in_order() {
        let out = Pipeline::send("x".to_string())
            .through([append("-a"), append("-b")])
            .then_return()
            .unwrap();
        assert_eq!(out, "x-a-b");
    }

    #[test]
    fn test_returning_without_next_short_circuits() {
        let out = Pipeline::send("x".to_string())
            .through([append("-a")])
            .pipe(|_: String, _| Ok("cached".to_string()))
            .through([append("-never")])
            .then(|s| Ok(s + "-dest"))
            .unwrap();
        assert_eq!(out, "cached");
    }

    #[test]
    fn test_destination_sees_final_payload() {
        let out = Pipeline::send(1_i32)
            .pipe(|n: i32, next| next.run(n * 10))
            .then(|n| Ok(n + 1))
            .unwrap();
        assert_eq!(out, 11);
    }

    #[test]
    fn test_failure_aborts_by_default() {
        let err = Pipeline::send("x".to_string())
            .through([append("-a"), failing(), append("-c")])
            .then_return()
            .unwrap_err();

        match err {
            PipelineError::Pipe { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(source.to_string(), "broken pipe");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_continue_on_failure_skips_failing_pipe() {
        let out = Pipeline::send("x".to_string())
            .through([append("-a"), failing(), append("-c")])
            .continue_on_failure(true)
            .then_return()
            .unwrap();
        assert_eq!(out, "x-a-c");
    }

    #[test]
    fn test_failure_after_forwarding_still_aborts() {
        let err = Pipeline::send("x".to_string())
            .pipe(|s: String, next| {
                next.run(s)?;
                Err("after".into())
            })
            .through([append("-b")])
            .continue_on_failure(true)
            .then_return()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Pipe { index: 0, .. }));
    }

    #[test]
    fn test_downstream_error_keeps_its_index() {
        let err = Pipeline::send("x".to_string())
            .through([append("-a"), append("-b"), failing()])
            .then_return()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Pipe { index: 2, .. }));
    }

    #[test]
    fn test_destination_failure() {
        let err = Pipeline::send("x".to_string())
            .through([append("-a")])
            .then(|_| Err("nowhere to go".into()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Destination(_)));
    }

    #[test]
    fn test_hooks_observe_outcome() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let ok_seen = Rc::clone(&seen);
        Pipeline::send("x".to_string())
            .through([append("-a")])
            .on_success(move |s| ok_seen.borrow_mut().push(format!("ok:{s}")))
            .then_return()
            .unwrap();

        let err_seen = Rc::clone(&seen);
        let _ = Pipeline::send("x".to_string())
            .through([failing()])
            .on_failure(move |e| err_seen.borrow_mut().push(format!("err:{e}")))
            .then_return();

        assert_eq!(
            *seen.borrow(),
            vec!["ok:x-a".to_string(), "err:pipe #0 failed: broken pipe".to_string()]
        );
    }
}
