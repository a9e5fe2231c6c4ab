//! [`AutomationDriver`] implementation backed by a remote automation backend.
//!
//! [`RemoteConnector`] opens one TCP connection per session: it verifies the
//! backend with a heartbeat, sends [`Request::CreateSession`] with the
//! capability map, and hands the connection to a [`RemoteDriver`]. Every later
//! command travels on that same connection until [`quit`](AutomationDriver::quit)
//! sends [`Request::DeleteSession`].
//!
//! # Example
//!
//! ```no_run
//! use mobsync_core::capability::{assemble, CapabilityInput, Platform, PortPool};
//! use mobsync_core::driver::SessionConnector;
//! use mobsync_core::remote_driver::RemoteConnector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let input = CapabilityInput {
//!     device_name: Some("Pixel 7".into()),
//!     platform_version: Some("14".into()),
//!     app_package: Some("com.example.shop".into()),
//!     app_activity: Some(".MainActivity".into()),
//!     ..Default::default()
//! };
//! let caps = assemble(Platform::Android, &input, &PortPool::default())?;
//!
//! let connector = RemoteConnector::new("127.0.0.1", 4723);
//! let driver = connector.open(&caps).await?;
//! driver.quit().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tracing::{debug, info, instrument};

use crate::backend_client::{BackendClient, BackendClientError, READ_TIMEOUT};
use crate::capability::{CapabilitySet, PlatformCapabilities};
use crate::driver::{AutomationDriver, DriverError, SessionConnector, SessionTimeouts};
use crate::gesture::{PointerAction, Viewport};
use crate::locator::{ElementId, ElementState, Locator};
use crate::protocol::{ErrorCode, Request, Response};

/// Extra read allowance on top of the capability timeouts while the backend
/// creates a session.
const SESSION_START_GRACE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Maps a [`BackendClientError`] to a [`DriverError`].
fn map_client_error(err: BackendClientError) -> DriverError {
    match err {
        BackendClientError::NotConnected => DriverError::NotConnected,
        BackendClientError::ConnectionFailed(msg) => DriverError::ConnectionLost(msg),
        BackendClientError::Io(e) => DriverError::Io(e),
        BackendClientError::Protocol(e) => DriverError::CommandFailed(e.to_string()),
        BackendClientError::Backend { code, message } => match code {
            ErrorCode::NoSuchElement => DriverError::NoSuchElement(message),
            ErrorCode::StaleElement => DriverError::StaleElement(message),
            ErrorCode::SessionNotCreated => DriverError::SessionNotCreated(message),
            ErrorCode::InvalidArgument | ErrorCode::Unknown => DriverError::CommandFailed(message),
        },
        BackendClientError::Timeout => DriverError::Timeout,
    }
}

fn unexpected(response: Response) -> DriverError {
    DriverError::CommandFailed(format!("unexpected response: {response:?}"))
}

/// Checks that the response is [`Response::Ok`].
fn expect_ok(response: Response) -> Result<(), DriverError> {
    match response {
        Response::Ok => Ok(()),
        other => Err(unexpected(other)),
    }
}

/// How long to wait for the `CreateSession` reply.
///
/// Session start covers app install and the on-device agent launch, so the
/// read deadline follows those capability timeouts instead of the per-command
/// default.
pub fn session_start_timeout(caps: &CapabilitySet) -> Duration {
    let agent_launch = match caps.platform_capabilities() {
        PlatformCapabilities::Android {
            agent_launch_timeout,
            ..
        } => *agent_launch_timeout,
        PlatformCapabilities::Ios {
            agent_launch_timeout,
            agent_startup_retries,
            agent_retry_interval,
            ..
        } => *agent_launch_timeout + *agent_retry_interval * *agent_startup_retries,
    };
    caps.install_timeout() + agent_launch + SESSION_START_GRACE
}

// ---------------------------------------------------------------------------
// RemoteConnector
// ---------------------------------------------------------------------------

/// Opens sessions against a backend listening on `host:port`.
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    host: String,
    port: u16,
}

impl RemoteConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the endpoint, connects and verifies it with a heartbeat.
    async fn create_client(&self) -> Result<BackendClient, DriverError> {
        let host_port = format!("{}:{}", self.host, self.port);
        let addr = tokio::net::lookup_host(&host_port)
            .await
            .map_err(|e| DriverError::ConnectionLost(e.to_string()))?
            .next()
            .ok_or_else(|| DriverError::ConnectionLost(format!("could not resolve {host_port}")))?;

        let mut client = BackendClient::new(addr);
        client.connect().await.map_err(map_client_error)?;
        client.heartbeat().await.map_err(map_client_error)?;
        Ok(client)
    }
}

#[async_trait]
impl SessionConnector for RemoteConnector {
    #[instrument(skip(self, capabilities), fields(platform = %capabilities.platform()), level = "debug")]
    async fn open(
        &self,
        capabilities: &CapabilitySet,
    ) -> Result<Box<dyn AutomationDriver>, DriverError> {
        let mut client = self.create_client().await?;

        client.set_read_timeout(session_start_timeout(capabilities));
        let response = client
            .send(&Request::CreateSession {
                capabilities: capabilities.to_json().to_string(),
            })
            .await
            .map_err(|e| match map_client_error(e) {
                DriverError::CommandFailed(msg) => DriverError::SessionNotCreated(msg),
                other => other,
            })?;
        client.set_read_timeout(READ_TIMEOUT);

        let session_id = match response {
            Response::Session { session_id } => session_id,
            other => return Err(DriverError::SessionNotCreated(format!("{other:?}"))),
        };

        info!(
            session_id = %session_id,
            device = capabilities.device_name(),
            port = capabilities.local_port(),
            "backend session created"
        );
        Ok(Box::new(RemoteDriver::new(session_id, client)))
    }
}

// ---------------------------------------------------------------------------
// RemoteDriver
// ---------------------------------------------------------------------------

/// An [`AutomationDriver`] bound to one backend session.
///
/// The client is wrapped in a [`tokio::sync::Mutex`] so that the `&self`
/// trait methods can acquire mutable access for sending requests.
pub struct RemoteDriver {
    session_id: String,
    client: Mutex<BackendClient>,
}

impl RemoteDriver {
    /// Wraps a connection on which `CreateSession` already succeeded.
    pub fn new(session_id: impl Into<String>, client: BackendClient) -> Self {
        Self {
            session_id: session_id.into(),
            client: Mutex::new(client),
        }
    }

    async fn send(&self, request: &Request) -> Result<Response, DriverError> {
        let mut client = self.client.lock().await;
        client.send(request).await.map_err(map_client_error)
    }

    async fn send_ok(&self, request: &Request) -> Result<(), DriverError> {
        expect_ok(self.send(request).await?)
    }
}

#[async_trait]
impl AutomationDriver for RemoteDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn set_timeouts(&self, timeouts: &SessionTimeouts) -> Result<(), DriverError> {
        self.send_ok(&Request::SetTimeouts {
            implicit_ms: timeouts.implicit_wait.as_millis() as u64,
            page_load_ms: timeouts.page_load.as_millis() as u64,
            script_ms: timeouts.script.as_millis() as u64,
        })
        .await
    }

    #[instrument(skip(self), fields(locator = %locator), level = "debug")]
    async fn find_element(&self, locator: &Locator) -> Result<ElementId, DriverError> {
        let response = self
            .send(&Request::FindElement {
                using: locator.by.as_str().to_string(),
                value: locator.value.clone(),
            })
            .await?;
        match response {
            Response::Element { element_id } => Ok(ElementId(element_id)),
            other => Err(unexpected(other)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn click(&self, element: &ElementId) -> Result<(), DriverError> {
        self.send_ok(&Request::Click {
            element: element.0.clone(),
        })
        .await
    }

    async fn clear(&self, element: &ElementId) -> Result<(), DriverError> {
        self.send_ok(&Request::Clear {
            element: element.0.clone(),
        })
        .await
    }

    #[instrument(skip(self, text), level = "debug")]
    async fn send_keys(&self, element: &ElementId, text: &str) -> Result<(), DriverError> {
        self.send_ok(&Request::SendKeys {
            element: element.0.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn text(&self, element: &ElementId) -> Result<String, DriverError> {
        let response = self
            .send(&Request::GetText {
                element: element.0.clone(),
            })
            .await?;
        match response {
            Response::Text { value: Some(text) } => Ok(text),
            Response::Text { value: None } => {
                debug!(element = %element, "backend reported no text, using empty string");
                Ok(String::new())
            }
            other => Err(unexpected(other)),
        }
    }

    async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let response = self
            .send(&Request::GetAttribute {
                element: element.0.clone(),
                name: name.to_string(),
            })
            .await?;
        match response {
            Response::Text { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn element_state(&self, element: &ElementId) -> Result<ElementState, DriverError> {
        let response = self
            .send(&Request::GetElementState {
                element: element.0.clone(),
            })
            .await?;
        match response {
            Response::State {
                displayed,
                enabled,
                obscured,
            } => Ok(ElementState {
                displayed,
                enabled,
                obscured,
            }),
            other => Err(unexpected(other)),
        }
    }

    #[instrument(skip(self, actions), fields(actions = actions.len()), level = "debug")]
    async fn perform_actions(&self, actions: &[PointerAction]) -> Result<(), DriverError> {
        self.send_ok(&Request::PerformActions {
            actions: actions.to_vec(),
        })
        .await
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        match self.send(&Request::PageSource).await? {
            Response::Source { xml } => {
                debug!(bytes = xml.len(), "page source read");
                Ok(xml)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn window_size(&self) -> Result<Viewport, DriverError> {
        match self.send(&Request::WindowSize).await? {
            Response::Size { width, height } => Ok(Viewport::new(width, height)),
            other => Err(unexpected(other)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn activate_app(&self, app_id: &str) -> Result<(), DriverError> {
        self.send_ok(&Request::ActivateApp {
            app_id: app_id.to_string(),
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn terminate_app(&self, app_id: &str) -> Result<bool, DriverError> {
        let response = self
            .send(&Request::TerminateApp {
                app_id: app_id.to_string(),
            })
            .await?;
        match response {
            Response::Bool { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn background_app(&self, duration: Duration) -> Result<(), DriverError> {
        self.send_ok(&Request::BackgroundApp {
            seconds: duration.as_secs_f64(),
        })
        .await
    }

    #[instrument(skip(self), fields(session_id = %self.session_id), level = "debug")]
    async fn quit(&self) -> Result<(), DriverError> {
        let mut client = self.client.lock().await;
        let result = client
            .send(&Request::DeleteSession)
            .await
            .map_err(map_client_error)
            .and_then(expect_ok);
        client.disconnect();
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
