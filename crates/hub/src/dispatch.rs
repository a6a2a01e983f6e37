//! Command dispatch back to a plantation's device.
//!
//! A [`CommandLink`] is the hub's half of a live connection: an "open" flag
//! the connection task maintains, plus a one-slot outbound queue that the
//! task drains into the socket. Nothing is buffered past that slot and
//! nothing is retried.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::wire::Command;

/// Outbound slots per link. A command that does not fit is dropped.
const OUTBOUND_SLOTS: usize = 1;

#[derive(Clone)]
pub struct CommandLink {
    open: Arc<AtomicBool>,
    tx: mpsc::Sender<Command>,
}

/// Connection-task side of a [`CommandLink`].
pub struct LinkEnd {
    open: Arc<AtomicBool>,
    pub(crate) rx: mpsc::Receiver<Command>,
}

/// Why a command never reached the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The plantation has no device connection at all (synthetic source).
    NoLink,
    /// Connection not (yet, or any longer) open.
    NotConnected,
    /// The previous command is still waiting to be written.
    Busy,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLink => write!(f, "no device link"),
            Self::NotConnected => write!(f, "device not connected"),
            Self::Busy => write!(f, "send buffer full"),
        }
    }
}

pub fn link() -> (CommandLink, LinkEnd) {
    let open = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel(OUTBOUND_SLOTS);
    (
        CommandLink {
            open: Arc::clone(&open),
            tx,
        },
        LinkEnd { open, rx },
    )
}

impl CommandLink {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close from the hub side; later sends are dropped immediately.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl LinkEnd {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

impl Drop for LinkEnd {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Hand `cmd` to the plantation's connection if it is open right now.
pub fn dispatch(link: Option<&CommandLink>, plantation_id: &str, cmd: Command) -> Result<(), DropReason> {
    let Some(link) = link else {
        tracing::debug!(plantation = %plantation_id, ?cmd, "no device link, command not sent");
        return Err(DropReason::NoLink);
    };
    if !link.is_open() {
        tracing::warn!(plantation = %plantation_id, ?cmd, "device not connected, command dropped");
        return Err(DropReason::NotConnected);
    }
    match link.tx.try_send(cmd) {
        Ok(()) => {
            tracing::info!(plantation = %plantation_id, command = %cmd.encode(), "command sent");
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(plantation = %plantation_id, ?cmd, "send buffer full, command dropped");
            Err(DropReason::Busy)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            link.close();
            tracing::warn!(plantation = %plantation_id, ?cmd, "device connection gone, command dropped");
            Err(DropReason::NotConnected)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_link_is_dropped() {
        assert_eq!(
            dispatch(None, "p1", Command::AutoOn),
            Err(DropReason::NoLink)
        );
    }

    #[test]
    fn closed_link_drops_without_queueing() {
        let (link, mut end) = link();
        assert_eq!(
            dispatch(Some(&link), "p1", Command::Irrigation(true)),
            Err(DropReason::NotConnected)
        );
        assert!(end.rx.try_recv().is_err());
    }

    #[test]
    fn open_link_delivers() {
        let (link, mut end) = link();
        end.set_open(true);
        dispatch(Some(&link), "p1", Command::Illumination(true)).unwrap();
        assert_eq!(end.rx.try_recv().unwrap(), Command::Illumination(true));
    }

    #[test]
    fn second_command_while_first_pending_is_dropped() {
        let (link, mut end) = link();
        end.set_open(true);
        dispatch(Some(&link), "p1", Command::AutoOn).unwrap();
        assert_eq!(
            dispatch(Some(&link), "p1", Command::AutoOff),
            Err(DropReason::Busy)
        );
        assert_eq!(end.rx.try_recv().unwrap(), Command::AutoOn);
        assert!(end.rx.try_recv().is_err());
    }

    #[test]
    fn dropping_link_end_closes_link() {
        let (link, end) = link();
        end.set_open(true);
        assert!(link.is_open());
        drop(end);
        assert!(!link.is_open());
        assert_eq!(
            dispatch(Some(&link), "p1", Command::AutoOn),
            Err(DropReason::NotConnected)
        );
    }

    #[test]
    fn hub_side_close() {
        let (link, end) = link();
        end.set_open(true);
        link.close();
        assert!(!link.is_open());
    }
}
