//! Operation orchestration: retry, cancellation, progress, lanes.

pub mod cancel;
pub mod lanes;
pub mod operation;
pub mod progress;
pub mod retry;

pub use cancel::CancelToken;
pub use lanes::TaskLanes;
pub use operation::{Operation, OperationState};
pub use progress::{Outcome, ProgressChannel, ProgressEvent};
pub use retry::RetryPolicy;
