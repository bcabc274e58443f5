//! sheetsync daemon runtime: poll ticker + poll processor + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_poll, request_push, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, serve, start_blocking, PollSummary, RuntimeOptions};
