//! Single transfers.
//!
//! One [`TransferRequest`] in, one [`TransferOutcome`] out.
//! [`execute_blocking`] and [`execute_async`] never return an error: every
//! failure is logged and recorded on the outcome so the orchestrator can keep
//! counting.

mod operation;
mod path;
mod progress;
mod request;

pub use operation::{execute_async, execute_blocking};
pub use path::destination_path;
pub use progress::{
    ChannelProgress, FnProgress, NoopProgress, OperationProgress, ProgressEvent, ProgressSink,
};
pub use request::{Direction, TransferOutcome, TransferRequest};
