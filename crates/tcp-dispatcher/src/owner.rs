//! Ownership of live sockets.
//!
//! Every socket the dispatcher knows about is owned by exactly one task. The
//! task holds an [`OwnerGuard`]; the dispatcher holds [`OwnerHandle`]s
//! obtained from it. When the guard goes away, whether through an explicit
//! [`OwnerGuard::exit`], a plain return, a panic or an abort, every handle
//! observes the termination and its [`ExitReason`].
//!
//! ```text
//!   handler task                     dispatcher
//!  ┌─────────────┐   handle()    ┌──────────────────┐
//!  │ OwnerGuard  │──────────────▶│ OwnerHandle      │
//!  │  (watch tx) │               │  is_alive()      │
//!  └──────┬──────┘               │  terminated() ◀──┼── monitor task
//!         │ drop / exit          └──────────────────┘
//!         ▼
//!   Exited(ExitReason)
//! ```

use std::fmt;

use tokio::sync::watch;
use uuid::Uuid;

/// Identity of a socket-owning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(Uuid);

impl OwnerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0.simple())
    }
}

/// Why an owner terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Orderly shutdown, e.g. the peer closed the connection
    Normal,
    /// Crash, abort, I/O failure or any other unplanned exit
    Abnormal(String),
}

impl ExitReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => f.write_str("normal"),
            ExitReason::Abnormal(reason) => write!(f, "abnormal: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
enum Liveness {
    Alive,
    Exited(ExitReason),
}

/// Liveness token held by the task that owns a socket
///
/// Dropping the guard without calling [`exit`](OwnerGuard::exit) reports an
/// abnormal termination.
#[derive(Debug)]
pub struct OwnerGuard {
    id: OwnerId,
    state: watch::Sender<Liveness>,
}

impl OwnerGuard {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Liveness::Alive);
        Self {
            id: OwnerId::new(),
            state,
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// A handle the dispatcher can use to watch this owner
    pub fn handle(&self) -> OwnerHandle {
        OwnerHandle {
            id: self.id,
            state: self.state.subscribe(),
        }
    }

    /// Terminate with an explicit reason
    pub fn exit(self, reason: ExitReason) {
        self.state.send_replace(Liveness::Exited(reason));
    }
}

impl Default for OwnerGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if matches!(*self.state.borrow(), Liveness::Alive) {
            let reason = if std::thread::panicking() {
                "owner panicked"
            } else {
                "owner dropped without exit"
            };
            self.state
                .send_replace(Liveness::Exited(ExitReason::Abnormal(reason.to_string())));
        }
    }
}

/// Observer side of an [`OwnerGuard`]
#[derive(Debug, Clone)]
pub struct OwnerHandle {
    id: OwnerId,
    state: watch::Receiver<Liveness>,
}

impl OwnerHandle {
    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        matches!(*self.state.borrow(), Liveness::Alive)
    }

    /// Wait until the owner terminates and return why
    ///
    /// Resolves immediately for an owner that is already gone.
    pub async fn terminated(mut self) -> ExitReason {
        loop {
            let current = self.state.borrow_and_update().clone();
            if let Liveness::Exited(reason) = current {
                return reason;
            }
            if self.state.changed().await.is_err() {
                let last = self.state.borrow().clone();
                return match last {
                    Liveness::Exited(reason) => reason,
                    Liveness::Alive => ExitReason::Abnormal("owner vanished".to_string()),
                };
            }
        }
    }
}
