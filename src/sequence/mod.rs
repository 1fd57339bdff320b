//! Sequence execution engine shared by the SWT, SCA and IC adapters.
//!
//! A sequence is an ordered list of protocol operations run as one call:
//!
//! 1. With `lock == true` the link lock is taken first, without waiting. If another
//!    session holds it the whole call fails with [`AlfError::LinkBusy`] and no step runs.
//! 2. Steps run strictly in input order. A failing step is recorded as
//!    [`StepResult::Error`] at its own position and the next step still runs.
//! 3. The lock, if taken, is released after the last step.
//!
//! The result list is position-matched to the input list.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rust_alf::prelude::*;
//! # async fn demo(registry: &LinkRegistry) -> AlfResult<()> {
//! let mut swt = Swt::open(registry, &CardId::from("#1"), 0)?;
//! let results = swt
//!     .sequence(&[SwtOp::write(0xdeadbeef), SwtOp::wait(100), SwtOp::read(80)], true)
//!     .await?;
//! assert_eq!(results.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod script;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AlfError, AlfResult};
use crate::protocols::ScAdapter;

/// Name of an operation or of its result, as used on the wire (`"write"`, `"read"`, ...).
pub trait StepName {
    fn name(&self) -> &'static str;
}

/// Outcome of one step, position-matched to its input operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult<T> {
    /// The step succeeded with a protocol-specific value.
    Done(T),
    /// The step failed; the message names the operation, the link and the cause.
    Error(String),
}

impl<T: StepName> StepResult<T> {
    /// `"error"` for a failed step, the operation name otherwise.
    pub fn name(&self) -> &'static str {
        match self {
            StepResult::Done(value) => value.name(),
            StepResult::Error(_) => "error",
        }
    }
}

impl<T> StepResult<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, StepResult::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            StepResult::Done(value) => Some(value),
            StepResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepResult::Done(_) => None,
            StepResult::Error(message) => Some(message),
        }
    }
}

/// Run `ops` through `adapter` in order.
///
/// # Errors
///
/// Only [`AlfError::LinkBusy`], and only when `lock` is set and the link is held
/// by another session. Per-step failures are returned as [`StepResult::Error`].
pub async fn execute<A: ScAdapter>(
    adapter: &mut A,
    ops: &[A::Op],
    lock: bool,
) -> AlfResult<Vec<StepResult<A::Output>>> {
    let link = Arc::clone(adapter.link());
    let session = adapter.session();

    let _guard = if lock {
        Some(link.try_lock(session)?)
    } else {
        None
    };

    debug!(
        protocol = A::PROTOCOL,
        link = %link.key(),
        %session,
        steps = ops.len(),
        lock,
        "Executing sequence"
    );

    let mut results = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        match adapter.dispatch(op).await {
            Ok(output) => results.push(StepResult::Done(output)),
            Err(e) => {
                let message = format!(
                    "{}_SEQUENCE {} card={} link={} channel={} error='{}'",
                    A::PROTOCOL,
                    op,
                    link.card(),
                    link.link_id(),
                    link.channel(),
                    e
                );
                warn!(step = index, op = op.name(), "{}", message);
                results.push(StepResult::Error(message));
            }
        }
    }

    Ok(results)
}

/// Suspend the calling task for at least `duration`.
///
/// Only this session is delayed; the link lock (if held) stays with it.
pub async fn pause(duration: Duration) -> u64 {
    tokio::time::sleep(duration).await;
    duration.as_millis() as u64
}

/// Turn the results of a sequence into the newline-separated reply of the
/// server protocol.
///
/// An error step stops the rendering: the reply so far plus the error message
/// is returned as [`AlfError::Sequence`].
pub fn render<T: RenderStep>(results: &[StepResult<T>]) -> AlfResult<String> {
    let mut out = String::new();
    for result in results {
        match result {
            StepResult::Done(value) => value.render(&mut out),
            StepResult::Error(message) => {
                out.push_str(message);
                return Err(AlfError::Sequence(out));
            }
        }
    }
    Ok(out)
}

/// Text form of one successful step in a server reply.
pub trait RenderStep {
    fn render(&self, out: &mut String);
}
