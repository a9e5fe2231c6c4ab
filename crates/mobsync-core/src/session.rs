//! A single automation session bound to one thread.
//!
//! A [`Session`] owns the driver for one backend session together with the
//! immutable [`CapabilitySet`] it was started from. It is created by the
//! [`SessionManager`](crate::manager::SessionManager) and shared as
//! `Arc<Session>`.
//!
//! The state is either [`SessionState::Active`] or
//! [`SessionState::Terminated`], and termination is sticky: once
//! [`close`](Session::close) has run, [`driver`](Session::driver) refuses to
//! hand out the driver, so no command ever reaches the backend through a
//! terminated session.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::capability::{CapabilitySet, Platform};
use crate::driver::{AutomationDriver, DriverError};

const ACTIVE: u8 = 0;
const TERMINATED: u8 = 1;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Active => f.write_str("active"),
            SessionState::Terminated => f.write_str("terminated"),
        }
    }
}

/// Handle to one running backend session.
pub struct Session {
    /// Client-side correlation id, independent of the backend's session id.
    pub id: Uuid,

    /// When this session was created.
    pub created_at: DateTime<Utc>,

    owner: ThreadId,
    capabilities: Arc<CapabilitySet>,
    state: AtomicU8,
    driver: Box<dyn AutomationDriver>,
}

impl Session {
    /// Wraps a driver whose backend session is already running.
    pub fn new(
        owner: ThreadId,
        capabilities: Arc<CapabilitySet>,
        driver: Box<dyn AutomationDriver>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            owner,
            capabilities,
            state: AtomicU8::new(ACTIVE),
            driver,
        }
    }

    /// The thread this session belongs to.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn capabilities(&self) -> &Arc<CapabilitySet> {
        &self.capabilities
    }

    pub fn platform(&self) -> Platform {
        self.capabilities.platform()
    }

    /// Identifier the backend assigned to this session.
    pub fn backend_session_id(&self) -> &str {
        self.driver.session_id()
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => SessionState::Active,
            _ => SessionState::Terminated,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// The driver for this session.
    ///
    /// Returns [`DriverError::SessionTerminated`] once the session has been
    /// closed, and [`DriverError::WrongThread`] when called from any thread
    /// other than the owner.
    pub fn driver(&self) -> Result<&dyn AutomationDriver, DriverError> {
        if !self.is_active() {
            return Err(DriverError::SessionTerminated);
        }
        let caller = thread::current().id();
        if caller != self.owner {
            return Err(DriverError::WrongThread {
                owner: self.owner,
                caller,
            });
        }
        Ok(self.driver.as_ref())
    }

    /// Marks the session terminated and ends it on the backend.
    ///
    /// Only the first call talks to the backend; later calls return `Ok(())`.
    /// Not bound to the owner thread, so cleanup can run wherever the last
    /// handle is dropped.
    pub async fn close(&self) -> Result<(), DriverError> {
        let previous = self.state.swap(TERMINATED, Ordering::AcqRel);
        if previous == TERMINATED {
            debug!(session_id = %self.id, "session already closed");
            return Ok(());
        }
        self.driver.quit().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend_session_id", &self.driver.session_id())
            .field("platform", &self.platform())
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}
