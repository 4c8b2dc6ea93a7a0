use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::hid::command::KeepaliveStatus;

/// Caller supplied control over one long running command.
///
/// The engine only borrows a `CommandState` for the duration of a call. Cancelling the
/// token asks the authenticator to abort, keepalive notifications are pushed into the
/// optional sink while the authenticator waits for the user.
#[derive(Clone, Debug, Default)]
pub struct CommandState {
    cancel: CancellationToken,
    keepalive: Option<UnboundedSender<KeepaliveStatus>>,
}

impl CommandState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keepalive(sink: UnboundedSender<KeepaliveStatus>) -> Self {
        CommandState {
            cancel: CancellationToken::new(),
            keepalive: Some(sink),
        }
    }

    /// Requests cancellation of the operation currently using this state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A handle that can be moved to another task to cancel from there.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn notify_keepalive(&self, status: KeepaliveStatus) {
        if let Some(sink) = &self.keepalive {
            // a dropped receiver only means the caller stopped listening
            if sink.send(status).is_err() {
                trace!(?status, "Keepalive receiver is gone");
            }
        }
    }
}
