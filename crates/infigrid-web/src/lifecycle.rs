#![forbid(unsafe_code)]

//! Lifecycle of the JS-facing grid handle.
//!
//! `init` is asynchronous (adapter probe, device request) and JS may call
//! `destroy` while it is pending. [`Lifecycle`] lets both sides run through
//! shared references: `destroy` flips the phase and cancels the token, and
//! the pending `init` sees that when it resumes and refuses to install
//! anything.
//!
//! [`LoadInbox`] parks image completions that arrive while the session is
//! borrowed, so they are delivered on the next frame instead of being lost.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use infigrid_core::render_loop::CancelToken;

/// Where the handle is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Initializing,
    Running,
    Destroyed,
}

/// Why a lifecycle transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    Destroyed,
    AlreadyInitialized,
    NotInitialized,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Destroyed => write!(f, "grid was destroyed"),
            Self::AlreadyInitialized => write!(f, "grid is already initialized"),
            Self::NotInitialized => write!(f, "grid is not initialized"),
        }
    }
}

impl std::error::Error for LifecycleError {}

#[derive(Debug)]
pub struct Lifecycle {
    phase: Cell<Phase>,
    cancel: CancelToken,
}

impl Lifecycle {
    #[must_use]
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            phase: Cell::new(Phase::Idle),
            cancel,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// `Idle → Initializing`. A second `init` while one is pending is
    /// refused as well as one after success.
    pub fn begin_init(&self) -> Result<(), LifecycleError> {
        match self.phase.get() {
            Phase::Idle => {
                self.phase.set(Phase::Initializing);
                Ok(())
            }
            Phase::Initializing | Phase::Running => Err(LifecycleError::AlreadyInitialized),
            Phase::Destroyed => Err(LifecycleError::Destroyed),
        }
    }

    /// `Initializing → Running`, unless `destroy` ran in the meantime.
    pub fn finish_init(&self) -> Result<(), LifecycleError> {
        match self.phase.get() {
            Phase::Initializing if !self.cancel.is_cancelled() => {
                self.phase.set(Phase::Running);
                Ok(())
            }
            Phase::Initializing | Phase::Destroyed => Err(LifecycleError::Destroyed),
            Phase::Idle => Err(LifecycleError::NotInitialized),
            Phase::Running => Err(LifecycleError::AlreadyInitialized),
        }
    }

    /// `Initializing → Idle` after a failed `init`, so the host may retry.
    pub fn abort_init(&self) {
        if self.phase.get() == Phase::Initializing {
            self.phase.set(Phase::Idle);
        }
    }

    pub fn require_running(&self) -> Result<(), LifecycleError> {
        match self.phase.get() {
            Phase::Running => Ok(()),
            Phase::Destroyed => Err(LifecycleError::Destroyed),
            Phase::Idle | Phase::Initializing => Err(LifecycleError::NotInitialized),
        }
    }

    /// Enter `Destroyed` and cancel the token. Returns `false` when already
    /// destroyed.
    pub fn destroy(&self) -> bool {
        if self.phase.get() == Phase::Destroyed {
            return false;
        }
        self.phase.set(Phase::Destroyed);
        self.cancel.cancel();
        true
    }
}

/// FIFO of completions waiting for a borrowable target.
#[derive(Debug)]
pub struct LoadInbox<T> {
    queue: RefCell<VecDeque<T>>,
}

impl<T> Default for LoadInbox<T> {
    fn default() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
        }
    }
}

/// Result of one [`LoadInbox::deliver`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// This many completions were handed to the target.
    Delivered(usize),
    /// The target was borrowed; everything stays queued.
    Deferred,
    /// The target is gone; this many completions were discarded.
    Dropped(usize),
}

impl<T> LoadInbox<T> {
    pub fn push(&self, completion: T) {
        self.queue.borrow_mut().push_back(completion);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Hand queued completions to the value in `target`, oldest first.
    pub fn deliver<S>(
        &self,
        target: &RefCell<Option<S>>,
        mut apply: impl FnMut(&mut S, T),
    ) -> Delivery {
        if self.is_empty() {
            return Delivery::Delivered(0);
        }
        let Ok(mut slot) = target.try_borrow_mut() else {
            return Delivery::Deferred;
        };
        let Some(value) = slot.as_mut() else {
            let dropped = self.len();
            self.queue.borrow_mut().clear();
            return Delivery::Dropped(dropped);
        };
        let mut delivered = 0;
        loop {
            let Some(next) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            apply(value, next);
            delivered += 1;
        }
        Delivery::Delivered(delivered)
    }
}
