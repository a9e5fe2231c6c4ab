//! Per-thread session registry.
//!
//! [`SessionManager`] hands every worker thread its own [`Session`]. The
//! registry is a concurrent map keyed by [`ThreadId`]; it is the only state
//! shared between workers, and it never holds more than one entry per thread.
//!
//! Each worker is expected to drive its automation on a current-thread tokio
//! runtime, so "the calling thread" stays the same across every `.await` of a
//! test.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mobsync_core::capability::Platform;
//! use mobsync_core::config::MobsyncConfig;
//! use mobsync_core::locator::Locator;
//! use mobsync_core::manager::SessionManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(SessionManager::from_config(&MobsyncConfig::load()));
//!
//! manager.create(Platform::Android).await?;
//! let ui = manager.interactor()?;
//! ui.click(Locator::accessibility_id("login")).await?;
//! manager.terminate().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::capability::{assemble, CapabilityError, CapabilityInput, Platform, PortPool};
use crate::config::MobsyncConfig;
use crate::driver::{DriverError, SessionConnector, SessionTimeouts};
use crate::interaction::Interactor;
use crate::remote_driver::RemoteConnector;
use crate::session::Session;
use crate::wait::WaitSettings;

/// Errors from session lifecycle operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The capability set could not be assembled.
    #[error("invalid configuration: {0}")]
    Config(#[from] CapabilityError),

    /// The calling thread already holds an active session.
    #[error("thread {0:?} already holds an active session")]
    AlreadyActive(ThreadId),

    /// The calling thread has no active session.
    #[error("no active session on thread {0:?}")]
    NoSession(ThreadId),

    /// The backend could not start or configure the session.
    #[error("session startup failed: {0}")]
    Startup(#[source] DriverError),

    /// An app lifecycle command failed.
    #[error("{operation} failed: {source}")]
    Lifecycle {
        operation: &'static str,
        #[source]
        source: DriverError,
    },
}

/// Creates, hands out and tears down one session per thread.
pub struct SessionManager {
    connector: Arc<dyn SessionConnector>,
    android: CapabilityInput,
    ios: CapabilityInput,
    ports: PortPool,
    timeouts: SessionTimeouts,
    waits: WaitSettings,
    registry: DashMap<ThreadId, Arc<Session>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        android: CapabilityInput,
        ios: CapabilityInput,
    ) -> Self {
        Self {
            connector,
            android,
            ios,
            ports: PortPool::default(),
            timeouts: SessionTimeouts::default(),
            waits: WaitSettings::default(),
            registry: DashMap::new(),
        }
    }

    /// Builds a manager that talks to the configured remote backend.
    pub fn from_config(config: &MobsyncConfig) -> Self {
        let connector = RemoteConnector::new(config.backend.host.clone(), config.backend.port);
        Self::new(Arc::new(connector), config.android.clone(), config.ios.clone())
            .with_ports(config.port_pool())
            .with_timeouts(config.session_timeouts())
            .with_wait_settings(config.wait_settings())
    }

    pub fn with_ports(mut self, ports: PortPool) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_wait_settings(mut self, waits: WaitSettings) -> Self {
        self.waits = waits;
        self
    }

    pub fn wait_settings(&self) -> WaitSettings {
        self.waits
    }

    fn profile(&self, platform: Platform) -> &CapabilityInput {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }

    /// Starts a session for the calling thread.
    ///
    /// Nothing is registered unless the backend session started and accepted
    /// the stability timeouts.
    #[instrument(skip(self), fields(thread = ?thread::current().id()))]
    pub async fn create(&self, platform: Platform) -> Result<Arc<Session>, SessionError> {
        let owner = thread::current().id();
        if self.current().is_ok() {
            return Err(SessionError::AlreadyActive(owner));
        }
        // A session closed behind the manager's back leaves a dead entry.
        if self
            .registry
            .remove_if(&owner, |_, registered| !registered.is_active())
            .is_some()
        {
            debug!(thread = ?owner, "dropped terminated registry entry");
        }

        let caps = assemble(platform, self.profile(platform), &self.ports)?;
        let driver = self.connector.open(&caps).await.map_err(|e| {
            error!(error = %e, "backend refused session");
            SessionError::Startup(e)
        })?;

        if let Err(e) = driver.set_timeouts(&self.timeouts).await {
            error!(error = %e, "applying session timeouts failed");
            if let Err(close_err) = driver.quit().await {
                warn!(error = %close_err, "closing half-started session failed");
            }
            return Err(SessionError::Startup(e));
        }

        let session = Arc::new(Session::new(owner, Arc::new(caps), driver));
        let inserted = match self.registry.entry(owner) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
                true
            }
            Entry::Occupied(mut slot) if !slot.get().is_active() => {
                slot.insert(Arc::clone(&session));
                true
            }
            Entry::Occupied(_) => false,
        };
        if !inserted {
            // Another task on this thread won the race.
            if let Err(e) = session.close().await {
                warn!(error = %e, "closing duplicate session failed");
            }
            return Err(SessionError::AlreadyActive(owner));
        }

        info!(
            session_id = %session.id,
            backend_session = session.backend_session_id(),
            %platform,
            "session started"
        );
        Ok(session)
    }

    /// The calling thread's active session.
    pub fn current(&self) -> Result<Arc<Session>, SessionError> {
        let owner = thread::current().id();
        self.registry
            .get(&owner)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| session.is_active())
            .ok_or(SessionError::NoSession(owner))
    }

    pub fn is_active(&self) -> bool {
        self.current().is_ok()
    }

    /// An [`Interactor`] bound to the calling thread's session.
    pub fn interactor(&self) -> Result<Interactor, SessionError> {
        Ok(Interactor::new(self.current()?, self.waits))
    }

    /// Number of registered sessions that are still active.
    pub fn active_sessions(&self) -> usize {
        self.registry
            .iter()
            .filter(|entry| entry.value().is_active())
            .count()
    }

    /// Ends the calling thread's session, if any.
    ///
    /// The registry entry is removed before the backend is contacted. Close
    /// failures are logged and swallowed.
    pub async fn terminate(&self) {
        let owner = thread::current().id();
        match self.registry.remove(&owner) {
            Some((_, session)) => close_logged(session).await,
            None => debug!(thread = ?owner, "no session to terminate"),
        }
    }

    /// Terminates and relaunches the app under test.
    #[instrument(skip(self))]
    pub async fn restart_app(&self) -> Result<(), SessionError> {
        let session = self.current()?;
        let app_id = session.capabilities().app_id().to_string();
        let driver = session.driver().map_err(|source| SessionError::Lifecycle {
            operation: "restart app",
            source,
        })?;

        let was_running = driver
            .terminate_app(&app_id)
            .await
            .map_err(|source| SessionError::Lifecycle {
                operation: "terminate app",
                source,
            })?;
        debug!(app_id, was_running, "app terminated");

        driver
            .activate_app(&app_id)
            .await
            .map_err(|source| SessionError::Lifecycle {
                operation: "activate app",
                source,
            })?;
        info!(app_id, "app restarted");
        Ok(())
    }

    /// Sends the app under test to the background for `duration`.
    #[instrument(skip(self))]
    pub async fn background_app(&self, duration: Duration) -> Result<(), SessionError> {
        let session = self.current()?;
        let lifecycle = |source: DriverError| SessionError::Lifecycle {
            operation: "background app",
            source,
        };
        session
            .driver()
            .map_err(lifecycle)?
            .background_app(duration)
            .await
            .map_err(lifecycle)?;
        info!(duration_ms = duration.as_millis() as u64, "app backgrounded");
        Ok(())
    }

    /// Starts a session whose release is tied to the returned guard.
    pub async fn scoped(&self, platform: Platform) -> Result<SessionGuard<'_>, SessionError> {
        let session = self.create(platform).await?;
        Ok(SessionGuard {
            manager: self,
            session,
            released: false,
        })
    }

    /// Runs `f` with a fresh session and always terminates it afterwards.
    pub async fn with_session<F, Fut, T>(&self, platform: Platform, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(Interactor) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.scoped(platform).await?;
        let out = f(guard.interactor()).await;
        guard.release().await;
        Ok(out)
    }

    /// Drops the registry entry for `session` if it is still the registered
    /// one, and reports whether it was.
    fn unregister(&self, session: &Arc<Session>) -> bool {
        self.registry
            .remove_if(&session.owner(), |_, registered| {
                Arc::ptr_eq(registered, session)
            })
            .is_some()
    }
}

async fn close_logged(session: Arc<Session>) {
    match session.close().await {
        Ok(()) => info!(session_id = %session.id, "session terminated"),
        Err(e) => error!(session_id = %session.id, error = %e, "session close failed"),
    }
}

// ---------------------------------------------------------------------------
// SessionGuard
// ---------------------------------------------------------------------------

/// Owns a session for the duration of a scope.
///
/// Call [`release`](Self::release) to terminate it explicitly. If the guard
/// is dropped instead (early return, panic), the registry entry is removed
/// immediately and the backend close is spawned on the current runtime.
pub struct SessionGuard<'a> {
    manager: &'a SessionManager,
    session: Arc<Session>,
    released: bool,
}

impl SessionGuard<'_> {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// An [`Interactor`] bound to the guarded session.
    pub fn interactor(&self) -> Interactor {
        Interactor::new(Arc::clone(&self.session), self.manager.waits)
    }

    pub async fn release(mut self) {
        self.released = true;
        self.manager.unregister(&self.session);
        close_logged(Arc::clone(&self.session)).await;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.manager.unregister(&self.session);
        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_logged(session));
            }
            Err(_) => warn!(
                session_id = %session.id,
                "no runtime to close session on; backend will expire it"
            ),
        }
    }
}
