//! Real-time progress streaming for the search workflow.
//!
//! Every agent emits [`StepEvent`]s while a query is being processed. The
//! [`StepBus`] keeps one bounded queue per session; producers never block
//! (overflow drops the newest event), and exactly one SSE consumer drains
//! the queue in FIFO order until a `Complete` event or the stream timeout.

pub mod bus;
pub mod event;

pub use bus::{StepBus, StepStream};
pub use event::{StepEvent, StepKind};
