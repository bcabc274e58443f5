pub mod daemon;
pub mod init;
pub mod poll;
pub mod push;

use anyhow::{anyhow, Error};

use sheetsync_daemon::DaemonError;

/// Turn a daemon client error into something a user can act on.
pub(crate) fn explain(err: DaemonError, action: &str) -> Error {
    match err {
        DaemonError::DaemonNotRunning { socket } => anyhow!(
            "daemon is not running (no socket at {}); start it with `sheetsync daemon start`",
            socket.display()
        ),
        DaemonError::Rejected { kind, message } => anyhow!("{action} rejected ({kind}): {message}"),
        other => Error::new(other).context(format!("{action} failed")),
    }
}
