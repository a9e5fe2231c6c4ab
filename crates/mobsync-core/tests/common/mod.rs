//! Shared test helpers for mobsync-core integration tests.
//!
//! Two kinds of fake backend live here:
//!
//! - [`FakeConnector`] / [`FakeDevice`]: an in-memory device whose element
//!   states are scripted per poll, for manager and interaction tests that
//!   need a paused clock.
//! - [`programmable_backend`] / [`serving_backend`]: mock TCP backends that
//!   speak the wire protocol, for tests that go through the remote driver.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mobsync_core::capability::{CapabilityInput, CapabilitySet, PortPool};
use mobsync_core::driver::{AutomationDriver, DriverError, SessionConnector, SessionTimeouts};
use mobsync_core::gesture::{PointerAction, Viewport};
use mobsync_core::locator::{ElementId, ElementState, Locator};
use mobsync_core::manager::SessionManager;
use mobsync_core::protocol::{
    decode_request, encode_response, read_frame_length, ErrorCode, Request, Response,
};
use mobsync_core::wait::WaitSettings;

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

pub fn android_profile() -> CapabilityInput {
    CapabilityInput {
        device_name: Some("Pixel 7".into()),
        platform_version: Some("14".into()),
        app_package: Some("com.example.shop".into()),
        app_activity: Some(".MainActivity".into()),
        ..Default::default()
    }
}

pub fn ios_profile() -> CapabilityInput {
    CapabilityInput {
        device_name: Some("iPhone 15".into()),
        platform_version: Some("17.4".into()),
        bundle_id: Some("com.example.Shop".into()),
        ..Default::default()
    }
}

/// Port ranges away from the defaults. Each test binary passes its own base
/// so parallel binaries don't collide.
pub fn test_ports(base: u16) -> PortPool {
    PortPool::new(base..=base + 49, base + 50..=base + 99)
}

pub const POLL: Duration = Duration::from_millis(100);

/// Wait settings used by most tests: 100ms polls, 500ms (5 polls) deadline.
pub fn five_polls() -> WaitSettings {
    WaitSettings {
        timeout: POLL * 5,
        poll_interval: POLL,
    }
}

// ---------------------------------------------------------------------------
// In-memory device
// ---------------------------------------------------------------------------

/// One element on the fake screen.
///
/// Each `element_state` call pops the next scripted state; once the script is
/// exhausted the last state repeats.
pub struct FakeElement {
    pub id: String,
    pub text: String,
    pub states: VecDeque<ElementState>,
    pub current: ElementState,
    pub stale: bool,
}

impl FakeElement {
    pub fn new(id: &str, text: &str, states: Vec<ElementState>) -> Self {
        let states: VecDeque<ElementState> = states.into();
        let current = states.front().copied().unwrap_or_default();
        Self {
            id: id.to_string(),
            text: text.to_string(),
            states,
            current,
            stale: false,
        }
    }

    /// Ready from the first poll.
    pub fn ready(id: &str, text: &str) -> Self {
        Self::new(id, text, vec![interactable()])
    }

    /// Hidden for `polls` polls, then interactable.
    pub fn ready_after(id: &str, polls: usize) -> Self {
        let mut states = vec![hidden(); polls];
        states.push(interactable());
        Self::new(id, "", states)
    }
}

pub fn interactable() -> ElementState {
    ElementState {
        displayed: true,
        enabled: true,
        obscured: false,
    }
}

pub fn hidden() -> ElementState {
    ElementState::default()
}

#[derive(Default)]
pub struct DeviceState {
    /// Elements keyed by locator value.
    pub elements: HashMap<String, FakeElement>,
    /// Page sources served in order; the last one repeats.
    pub sources: VecDeque<String>,
    pub viewport: Option<Viewport>,
    pub calls: Vec<String>,
    pub typed: Vec<(String, String)>,
    pub gestures: Vec<Vec<PointerAction>>,
    pub timeouts: Option<SessionTimeouts>,
    pub quits: usize,
    pub fail_set_timeouts: bool,
    pub fail_quit: bool,
    pub fail_click: bool,
}

/// Shared state behind every [`FakeDriver`] a [`FakeConnector`] opens.
#[derive(Default)]
pub struct FakeDevice {
    pub state: Mutex<DeviceState>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, locator_value: &str, element: FakeElement) {
        self.state
            .lock()
            .unwrap()
            .elements
            .insert(locator_value.to_string(), element);
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, call: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.as_str() == call).count())
    }

    pub fn quits(&self) -> usize {
        self.with(|s| s.quits)
    }

    fn element_by_id<R>(
        &self,
        id: &ElementId,
        f: impl FnOnce(&mut FakeElement) -> R,
    ) -> Result<R, DriverError> {
        let mut state = self.state.lock().unwrap();
        let element = state
            .elements
            .values_mut()
            .find(|e| e.id == id.0)
            .ok_or_else(|| DriverError::StaleElement(id.0.clone()))?;
        if element.stale {
            return Err(DriverError::StaleElement(id.0.clone()));
        }
        Ok(f(element))
    }
}

pub struct FakeDriver {
    session_id: String,
    device: Arc<FakeDevice>,
}

impl FakeDriver {
    fn record(&self, call: &str) {
        self.device.with(|s| s.calls.push(call.to_string()));
    }
}

#[async_trait]
impl AutomationDriver for FakeDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn set_timeouts(&self, timeouts: &SessionTimeouts) -> Result<(), DriverError> {
        self.record("set_timeouts");
        self.device.with(|s| {
            if s.fail_set_timeouts {
                return Err(DriverError::CommandFailed("timeouts rejected".into()));
            }
            s.timeouts = Some(*timeouts);
            Ok(())
        })
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementId, DriverError> {
        self.record("find_element");
        self.device.with(|s| {
            s.elements
                .get(&locator.value)
                .map(|e| ElementId(e.id.clone()))
                .ok_or_else(|| DriverError::NoSuchElement(locator.to_string()))
        })
    }

    async fn click(&self, element: &ElementId) -> Result<(), DriverError> {
        self.record("click");
        if self.device.with(|s| s.fail_click) {
            return Err(DriverError::CommandFailed("click rejected".into()));
        }
        self.device.element_by_id(element, |_| ())
    }

    async fn clear(&self, element: &ElementId) -> Result<(), DriverError> {
        self.record("clear");
        self.device.element_by_id(element, |e| e.text.clear())
    }

    async fn send_keys(&self, element: &ElementId, text: &str) -> Result<(), DriverError> {
        self.record("send_keys");
        self.device.element_by_id(element, |e| e.text.push_str(text))?;
        self.device
            .with(|s| s.typed.push((element.0.clone(), text.to_string())));
        Ok(())
    }

    async fn text(&self, element: &ElementId) -> Result<String, DriverError> {
        self.record("text");
        self.device.element_by_id(element, |e| e.text.clone())
    }

    async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        self.record("attribute");
        self.device
            .element_by_id(element, |e| (name == "name").then(|| e.id.clone()))
    }

    async fn element_state(&self, element: &ElementId) -> Result<ElementState, DriverError> {
        self.record("element_state");
        self.device.element_by_id(element, |e| {
            if let Some(next) = e.states.pop_front() {
                e.current = next;
            }
            e.current
        })
    }

    async fn perform_actions(&self, actions: &[PointerAction]) -> Result<(), DriverError> {
        self.record("perform_actions");
        self.device.with(|s| s.gestures.push(actions.to_vec()));
        Ok(())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        self.record("page_source");
        self.device.with(|s| {
            let next = if s.sources.len() > 1 {
                s.sources.pop_front()
            } else {
                s.sources.front().cloned()
            };
            Ok(next.unwrap_or_default())
        })
    }

    async fn window_size(&self) -> Result<Viewport, DriverError> {
        self.record("window_size");
        self.device.with(|s| {
            s.viewport
                .ok_or_else(|| DriverError::CommandFailed("no viewport".into()))
        })
    }

    async fn activate_app(&self, _app_id: &str) -> Result<(), DriverError> {
        self.record("activate_app");
        Ok(())
    }

    async fn terminate_app(&self, _app_id: &str) -> Result<bool, DriverError> {
        self.record("terminate_app");
        Ok(true)
    }

    async fn background_app(&self, _duration: Duration) -> Result<(), DriverError> {
        self.record("background_app");
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.record("quit");
        self.device.with(|s| {
            s.quits += 1;
            if s.fail_quit {
                Err(DriverError::ConnectionLost("backend went away".into()))
            } else {
                Ok(())
            }
        })
    }
}

/// Opens [`FakeDriver`]s over a shared [`FakeDevice`].
pub struct FakeConnector {
    pub device: Arc<FakeDevice>,
    pub opened: AtomicUsize,
    pub refuse: bool,
    pub last_capabilities: Mutex<Option<CapabilitySet>>,
}

impl FakeConnector {
    pub fn new(device: Arc<FakeDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            opened: AtomicUsize::new(0),
            refuse: false,
            last_capabilities: Mutex::new(None),
        })
    }

    pub fn refusing(device: Arc<FakeDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            opened: AtomicUsize::new(0),
            refuse: true,
            last_capabilities: Mutex::new(None),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(
        &self,
        capabilities: &CapabilitySet,
    ) -> Result<Box<dyn AutomationDriver>, DriverError> {
        if self.refuse {
            return Err(DriverError::SessionNotCreated("device offline".into()));
        }
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_capabilities.lock().unwrap() = Some(capabilities.clone());
        Ok(Box::new(FakeDriver {
            session_id: format!("fake-{n}"),
            device: Arc::clone(&self.device),
        }))
    }
}

/// A manager over an in-memory device.
pub fn fake_manager(connector: Arc<FakeConnector>, port_base: u16) -> SessionManager {
    SessionManager::new(connector, android_profile(), ios_profile())
        .with_ports(test_ports(port_base))
        .with_wait_settings(five_polls())
}

// ---------------------------------------------------------------------------
// Mock TCP backends
// ---------------------------------------------------------------------------

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.ok()?;
    let len = read_frame_length(&header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.ok()?;
    decode_request(&payload).ok()
}

async fn write_response(stream: &mut TcpStream, response: &Response) {
    let _ = stream.write_all(&encode_response(response)).await;
    let _ = stream.flush().await;
}

/// Describes the behavior a mock backend should exhibit for a single incoming
/// request frame.
pub enum MockBehavior {
    /// Read one request frame and reply with the given response.
    Respond(Response),
    /// Read one request frame, sleep for `Duration`, then reply.
    Delay(Duration, Response),
    /// Read one request frame and then close the connection.
    Drop,
    /// Read one request frame and send invalid (non-protocol) bytes.
    SendGarbage,
}

/// Start a mock TCP backend whose behavior is scripted per request.
///
/// Accepts exactly one connection and processes each [`MockBehavior`] in
/// sequence, then closes the connection.
pub async fn programmable_backend(behaviors: Vec<MockBehavior>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        for behavior in behaviors {
            if read_request(&mut stream).await.is_none() {
                return;
            }
            match behavior {
                MockBehavior::Respond(response) => write_response(&mut stream, &response).await,
                MockBehavior::Delay(duration, response) => {
                    tokio::time::sleep(duration).await;
                    write_response(&mut stream, &response).await;
                }
                MockBehavior::Drop => return,
                MockBehavior::SendGarbage => {
                    let garbage = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0xFF, 0x42, 0x13];
                    let _ = stream.write_all(&garbage).await;
                    let _ = stream.flush().await;
                }
            }
        }
    });

    addr
}

/// The replies a [`serving_backend`] gives, plus every request it saw.
#[derive(Default)]
pub struct BackendScript {
    /// Locator values that resolve to an element (id = `el-<value>`).
    pub known: Vec<String>,
    /// Replies to `GetElementState`, popped per request; then always visible.
    pub states: VecDeque<(bool, bool, bool)>,
    pub text: String,
    pub seen: Vec<Request>,
}

/// Start a mock TCP backend that answers every request by type.
///
/// Unlike [`programmable_backend`], it accepts any number of connections
/// (one per session) and keeps serving each until the client hangs up.
pub async fn serving_backend(script: BackendScript) -> (SocketAddr, Arc<Mutex<BackendScript>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let script = Arc::new(Mutex::new(script));
    let shared = Arc::clone(&script);

    tokio::spawn(async move {
        let mut sessions = 0usize;
        while let Ok((mut stream, _)) = listener.accept().await {
            sessions += 1;
            let script = Arc::clone(&shared);
            let session_id = format!("remote-{sessions}");
            tokio::spawn(async move {
                while let Some(request) = read_request(&mut stream).await {
                    let response = reply(&script, &session_id, &request);
                    script.lock().unwrap().seen.push(request);
                    write_response(&mut stream, &response).await;
                }
            });
        }
    });

    (addr, script)
}

fn reply(script: &Mutex<BackendScript>, session_id: &str, request: &Request) -> Response {
    let mut script = script.lock().unwrap();
    match request {
        Request::CreateSession { .. } => Response::Session {
            session_id: session_id.to_string(),
        },
        Request::FindElement { value, .. } => {
            if script.known.iter().any(|k| k == value) {
                Response::Element {
                    element_id: format!("el-{value}"),
                }
            } else {
                Response::Error {
                    code: ErrorCode::NoSuchElement,
                    message: format!("no element for '{value}'"),
                }
            }
        }
        Request::GetElementState { .. } => {
            let (displayed, enabled, obscured) =
                script.states.pop_front().unwrap_or((true, true, false));
            Response::State {
                displayed,
                enabled,
                obscured,
            }
        }
        Request::GetText { .. } => Response::Text {
            value: Some(script.text.clone()),
        },
        Request::GetAttribute { .. } => Response::Text { value: None },
        Request::PageSource => Response::Source {
            xml: "<hierarchy/>".into(),
        },
        Request::WindowSize => Response::Size {
            width: 1080,
            height: 2400,
        },
        Request::TerminateApp { .. } => Response::Bool { value: true },
        _ => Response::Ok,
    }
}
