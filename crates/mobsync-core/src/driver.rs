//! Backend-agnostic automation driver traits.
//!
//! [`SessionConnector`] opens a new session against an automation backend from
//! a [`CapabilitySet`]; the resulting [`AutomationDriver`] carries out the
//! per-session commands (element lookup, clicks, pointer sequences, screen
//! reads). The wait engine, gesture composer and interaction facade only ever
//! see these traits, so the remote backend and in-memory test doubles are
//! interchangeable.

use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::capability::CapabilitySet;
use crate::gesture::{PointerAction, Viewport};
use crate::locator::{ElementId, ElementState, Locator};

/// Errors that can occur during automation driver operations.
///
/// This enum unifies errors from all backends behind a single type, allowing
/// callers to handle failures uniformly.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A command failed with the given message.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// No element matched the locator.
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// The element handle no longer refers to anything on screen.
    #[error("Stale element: {0}")]
    StaleElement(String),

    /// The backend refused to start a session.
    #[error("Session not created: {0}")]
    SessionNotCreated(String),

    /// The session was terminated; no further commands are sent.
    #[error("Session has been terminated")]
    SessionTerminated,

    /// The backend is not available or not connected.
    #[error("Not connected to automation backend")]
    NotConnected,

    /// The connection to the backend was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A session was used from a thread other than the one that owns it.
    #[error("session belongs to thread {owner:?}, used from {caller:?}")]
    WrongThread { owner: ThreadId, caller: ThreadId },
}

impl DriverError {
    /// Lookup failures that are expected while a screen is still settling.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::NoSuchElement(_) | DriverError::StaleElement(_)
        )
    }
}

/// Stability timeouts applied to every new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Backend-side implicit wait for element lookups.
    pub implicit_wait: Duration,
    /// Page/content load timeout.
    pub page_load: Duration,
    /// Script execution timeout.
    pub script: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        // Implicit wait stays at zero: synchronization is done client-side by
        // the wait engine, and a backend-side wait would stack on top of it.
        Self {
            implicit_wait: Duration::ZERO,
            page_load: Duration::from_secs(30),
            script: Duration::from_secs(30),
        }
    }
}

/// Per-session commands against a running automation backend.
///
/// Every method is a single round-trip; none of them wait or retry. Retrying
/// is the job of [`Waiter`](crate::wait::Waiter).
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Backend-assigned identifier of this session.
    fn session_id(&self) -> &str;

    /// Apply implicit-wait, page-load and script timeouts.
    async fn set_timeouts(&self, timeouts: &SessionTimeouts) -> Result<(), DriverError>;

    /// Resolve a locator to an element handle.
    ///
    /// Returns [`DriverError::NoSuchElement`] when nothing matches.
    async fn find_element(&self, locator: &Locator) -> Result<ElementId, DriverError>;

    /// Native click on an element.
    async fn click(&self, element: &ElementId) -> Result<(), DriverError>;

    /// Clear the contents of an editable element.
    async fn clear(&self, element: &ElementId) -> Result<(), DriverError>;

    /// Type text into an element.
    async fn send_keys(&self, element: &ElementId, text: &str) -> Result<(), DriverError>;

    /// Displayed text of an element.
    async fn text(&self, element: &ElementId) -> Result<String, DriverError>;

    /// Named attribute of an element, if present.
    async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Visibility, enablement and obstruction of an element.
    async fn element_state(&self, element: &ElementId) -> Result<ElementState, DriverError>;

    /// Dispatch a single-finger pointer sequence and wait for the backend to
    /// acknowledge it.
    async fn perform_actions(&self, actions: &[PointerAction]) -> Result<(), DriverError>;

    /// Full screen content representation (XML page source).
    async fn page_source(&self) -> Result<String, DriverError>;

    /// Size of the current viewport in device points.
    async fn window_size(&self) -> Result<Viewport, DriverError>;

    /// Bring an installed app to the foreground, launching it if needed.
    async fn activate_app(&self, app_id: &str) -> Result<(), DriverError>;

    /// Terminate an app. Returns `false` if it was not running.
    async fn terminate_app(&self, app_id: &str) -> Result<bool, DriverError>;

    /// Send the app under test to the background for `duration`, then return
    /// it to the foreground.
    async fn background_app(&self, duration: Duration) -> Result<(), DriverError>;

    /// End the session on the backend.
    async fn quit(&self) -> Result<(), DriverError>;
}

/// Opens sessions against an automation backend.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Start a session described by `capabilities`.
    ///
    /// Any failure to reach the backend or any rejection of the capability
    /// set is returned as an error; no partially started session is handed
    /// back.
    async fn open(
        &self,
        capabilities: &CapabilitySet,
    ) -> Result<Box<dyn AutomationDriver>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::CommandFailed("tap failed".to_string());
        assert!(err.to_string().contains("tap failed"));

        let err = DriverError::NotConnected;
        assert!(err.to_string().contains("Not connected"));

        let err = DriverError::ConnectionLost("reset by peer".to_string());
        assert!(err.to_string().contains("reset by peer"));

        let err = DriverError::Timeout;
        assert!(err.to_string().contains("timed out"));

        let err = DriverError::SessionNotCreated("device offline".to_string());
        assert!(err.to_string().contains("device offline"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(DriverError::NoSuchElement("x".into()).is_transient());
        assert!(DriverError::StaleElement("x".into()).is_transient());
        assert!(!DriverError::Timeout.is_transient());
        assert!(!DriverError::SessionTerminated.is_transient());
    }

    #[test]
    fn test_default_timeouts_leave_implicit_wait_off() {
        let timeouts = SessionTimeouts::default();
        assert_eq!(timeouts.implicit_wait, Duration::ZERO);
        assert!(timeouts.page_load > Duration::ZERO);
    }
}
