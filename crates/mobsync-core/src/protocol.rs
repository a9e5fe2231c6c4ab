//! Binary wire protocol spoken with the automation backend.
//!
//! One TCP connection carries one session: the first command after the
//! heartbeat is [`Request::CreateSession`], every later command is scoped to
//! the session it created, and [`Request::DeleteSession`] ends it.
//!
//! # Packet Structure (Little Endian)
//!
//! ```text
//! [Header: 4 bytes LE u32 len] [OpCode: 1 byte] [Payload: variable]
//! ```
//!
//! The `len` field encodes the total length of the opcode + payload (NOT including
//! the 4-byte header itself).
//!
//! # Encodings
//!
//! - Strings: `u32` LE byte count followed by UTF-8 bytes.
//! - Optional strings: `u8` presence flag (`0` = None, `1` = Some) then the string.
//! - Durations: `u64` LE milliseconds, except [`Request::BackgroundApp`] which
//!   carries `f64` seconds.
//! - Pointer actions: `u32` count, then per action a tag byte
//!   (`0` move, `1` down, `2` pause, `3` up) and its fields.
//!
//! # Example
//!
//! ```
//! use mobsync_core::protocol::{Request, encode_request, decode_request};
//!
//! let req = Request::FindElement { using: "accessibility id".into(), value: "login".into() };
//! let wire = encode_request(&req);
//!
//! // Skip the 4-byte length header to decode
//! let decoded = decode_request(&wire[4..]).unwrap();
//! assert_eq!(decoded, req);
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::gesture::PointerAction;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during protocol encoding or decoding.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// The opcode byte does not correspond to any known operation.
    #[error("invalid opcode: 0x{0:02X}")]
    InvalidOpCode(u8),

    /// The buffer does not contain enough bytes for the expected data.
    #[error("insufficient data in buffer")]
    InsufficientData,

    /// A string field contains invalid UTF-8.
    #[error("invalid UTF-8 in string field")]
    Utf8Error,

    /// The payload structure is invalid for the given opcode.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ---------------------------------------------------------------------------
// OpCode
// ---------------------------------------------------------------------------

/// On-the-wire operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Keep-alive ping (no payload).
    Heartbeat = 0x01,
    /// Start a session (capabilities JSON string).
    CreateSession = 0x02,
    /// End the session bound to this connection (no payload).
    DeleteSession = 0x03,
    /// Apply stability timeouts (u64 implicit, page load, script ms).
    SetTimeouts = 0x04,
    /// Resolve a locator (strategy string + value string).
    FindElement = 0x10,
    /// Native click (element id string).
    Click = 0x11,
    /// Clear an editable element (element id string).
    Clear = 0x12,
    /// Type into an element (element id string + text string).
    SendKeys = 0x13,
    /// Read displayed text (element id string).
    GetText = 0x14,
    /// Read a named attribute (element id string + name string).
    GetAttribute = 0x15,
    /// Read displayed/enabled/obscured flags (element id string).
    GetElementState = 0x16,
    /// Dispatch a pointer action sequence.
    PerformActions = 0x20,
    /// Read the full page source (no payload).
    PageSource = 0x21,
    /// Read the viewport size (no payload).
    WindowSize = 0x22,
    /// Foreground an installed app (app id string).
    ActivateApp = 0x30,
    /// Terminate an app (app id string).
    TerminateApp = 0x31,
    /// Background the app under test (f64 seconds).
    BackgroundApp = 0x32,
    /// Error message from the backend (error code byte + string).
    Error = 0x99,
    /// Generic response (response-type byte + variable data).
    Response = 0xA0,
}

impl OpCode {
    /// Try to convert a raw byte into an `OpCode`.
    pub fn from_u8(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x01 => Ok(OpCode::Heartbeat),
            0x02 => Ok(OpCode::CreateSession),
            0x03 => Ok(OpCode::DeleteSession),
            0x04 => Ok(OpCode::SetTimeouts),
            0x10 => Ok(OpCode::FindElement),
            0x11 => Ok(OpCode::Click),
            0x12 => Ok(OpCode::Clear),
            0x13 => Ok(OpCode::SendKeys),
            0x14 => Ok(OpCode::GetText),
            0x15 => Ok(OpCode::GetAttribute),
            0x16 => Ok(OpCode::GetElementState),
            0x20 => Ok(OpCode::PerformActions),
            0x21 => Ok(OpCode::PageSource),
            0x22 => Ok(OpCode::WindowSize),
            0x30 => Ok(OpCode::ActivateApp),
            0x31 => Ok(OpCode::TerminateApp),
            0x32 => Ok(OpCode::BackgroundApp),
            0x99 => Ok(OpCode::Error),
            0xA0 => Ok(OpCode::Response),
            other => Err(ProtocolError::InvalidOpCode(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response enums
// ---------------------------------------------------------------------------

/// A typed request from the host to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Heartbeat,
    CreateSession { capabilities: String },
    DeleteSession,
    SetTimeouts {
        implicit_ms: u64,
        page_load_ms: u64,
        script_ms: u64,
    },
    FindElement { using: String, value: String },
    Click { element: String },
    Clear { element: String },
    SendKeys { element: String, text: String },
    GetText { element: String },
    GetAttribute { element: String, name: String },
    GetElementState { element: String },
    PerformActions { actions: Vec<PointerAction> },
    PageSource,
    WindowSize,
    ActivateApp { app_id: String },
    TerminateApp { app_id: String },
    BackgroundApp { seconds: f64 },
}

impl Request {
    /// Returns a short, static name for this request type suitable for use in
    /// tracing span metadata. Avoids Debug-formatting large enum payloads.
    pub fn opcode_name(&self) -> &'static str {
        match self {
            Request::Heartbeat => "heartbeat",
            Request::CreateSession { .. } => "create_session",
            Request::DeleteSession => "delete_session",
            Request::SetTimeouts { .. } => "set_timeouts",
            Request::FindElement { .. } => "find_element",
            Request::Click { .. } => "click",
            Request::Clear { .. } => "clear",
            Request::SendKeys { .. } => "send_keys",
            Request::GetText { .. } => "get_text",
            Request::GetAttribute { .. } => "get_attribute",
            Request::GetElementState { .. } => "get_element_state",
            Request::PerformActions { .. } => "perform_actions",
            Request::PageSource => "page_source",
            Request::WindowSize => "window_size",
            Request::ActivateApp { .. } => "activate_app",
            Request::TerminateApp { .. } => "terminate_app",
            Request::BackgroundApp { .. } => "background_app",
        }
    }
}

/// Classification of a backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Unknown = 0x00,
    NoSuchElement = 0x01,
    StaleElement = 0x02,
    SessionNotCreated = 0x03,
    InvalidArgument = 0x04,
}

impl ErrorCode {
    /// Unrecognized codes degrade to [`ErrorCode::Unknown`].
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x01 => ErrorCode::NoSuchElement,
            0x02 => ErrorCode::StaleElement,
            0x03 => ErrorCode::SessionNotCreated,
            0x04 => ErrorCode::InvalidArgument,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Response sub-type byte used inside the `Response` opcode payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ResponseType {
    Ok = 0x00,
    Error = 0x01,
    Session = 0x02,
    Element = 0x03,
    Text = 0x04,
    Bool = 0x05,
    State = 0x06,
    Size = 0x07,
    Source = 0x08,
}

impl ResponseType {
    fn from_u8(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x00 => Ok(ResponseType::Ok),
            0x01 => Ok(ResponseType::Error),
            0x02 => Ok(ResponseType::Session),
            0x03 => Ok(ResponseType::Element),
            0x04 => Ok(ResponseType::Text),
            0x05 => Ok(ResponseType::Bool),
            0x06 => Ok(ResponseType::State),
            0x07 => Ok(ResponseType::Size),
            0x08 => Ok(ResponseType::Source),
            other => Err(ProtocolError::InvalidPayload(format!(
                "unknown response type: 0x{other:02X}"
            ))),
        }
    }
}

/// A typed response from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The operation completed successfully with no additional data.
    Ok,
    /// The operation failed.
    Error { code: ErrorCode, message: String },
    /// A session was created.
    Session { session_id: String },
    /// A locator resolved to an element.
    Element { element_id: String },
    /// Text or attribute value, if any.
    Text { value: Option<String> },
    /// Boolean result (e.g. whether an app was running before terminate).
    Bool { value: bool },
    /// Element interactability flags.
    State {
        displayed: bool,
        enabled: bool,
        obscured: bool,
    },
    /// Viewport size in device points.
    Size { width: i32, height: i32 },
    /// Page source XML.
    Source { xml: String },
}

// ---------------------------------------------------------------------------
// Low-level payload helpers
// ---------------------------------------------------------------------------

/// Write a length-prefixed UTF-8 string into `buf`.
///
/// Format: `[u32 LE byte_count] [UTF-8 bytes]`
fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Write an optional string into `buf`.
fn write_optional_string(buf: &mut Vec<u8>, opt: &Option<String>) {
    match opt {
        None => buf.push(0u8),
        Some(s) => {
            buf.push(1u8);
            write_string(buf, s);
        }
    }
}

/// Write a bool as a single `u8` (0 = false, 1 = true).
fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(if v { 1u8 } else { 0u8 });
}

fn write_millis(buf: &mut Vec<u8>, d: Duration) {
    buf.extend_from_slice(&(d.as_millis() as u64).to_le_bytes());
}

fn write_actions(buf: &mut Vec<u8>, actions: &[PointerAction]) {
    buf.extend_from_slice(&(actions.len() as u32).to_le_bytes());
    for action in actions {
        match action {
            PointerAction::MoveTo { x, y, duration } => {
                buf.push(0u8);
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
                write_millis(buf, *duration);
            }
            PointerAction::Down => buf.push(1u8),
            PointerAction::Pause(duration) => {
                buf.push(2u8);
                write_millis(buf, *duration);
            }
            PointerAction::Up => buf.push(3u8),
        }
    }
}

/// A cursor over a byte slice for sequential reads.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        if self.remaining() < N {
            return Err(ProtocolError::InsufficientData);
        }
        let bytes: [u8; N] = self.data[self.pos..self.pos + N]
            .try_into()
            .map_err(|_| ProtocolError::InsufficientData)?;
        self.pos += N;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take::<4>()?))
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.take::<8>()?))
    }

    fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.take::<8>()?))
    }

    fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_millis(&mut self) -> Result<Duration, ProtocolError> {
        Ok(Duration::from_millis(self.read_u64()?))
    }

    /// Read a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u32()? as usize;
        if self.remaining() < len {
            return Err(ProtocolError::InsufficientData);
        }
        let s = std::str::from_utf8(&self.data[self.pos..self.pos + len])
            .map_err(|_| ProtocolError::Utf8Error)?;
        self.pos += len;
        Ok(s.to_owned())
    }

    /// Read an optional length-prefixed string.
    fn read_optional_string(&mut self) -> Result<Option<String>, ProtocolError> {
        let flag = self.read_u8()?;
        if flag == 0 {
            Ok(None)
        } else {
            Ok(Some(self.read_string()?))
        }
    }

    fn read_actions(&mut self) -> Result<Vec<PointerAction>, ProtocolError> {
        let count = self.read_u32()? as usize;
        // Smallest action is one byte; reject counts the buffer cannot hold.
        if count > self.remaining() {
            return Err(ProtocolError::InsufficientData);
        }
        let mut actions = Vec::with_capacity(count);
        for _ in 0..count {
            let action = match self.read_u8()? {
                0 => PointerAction::MoveTo {
                    x: self.read_i32()?,
                    y: self.read_i32()?,
                    duration: self.read_millis()?,
                },
                1 => PointerAction::Down,
                2 => PointerAction::Pause(self.read_millis()?),
                3 => PointerAction::Up,
                other => {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "unknown pointer action tag: {other}"
                    )))
                }
            };
            actions.push(action);
        }
        Ok(actions)
    }
}

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

/// Largest payload a peer may announce. Page sources of big screens fit well
/// below this.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Wrap a payload (opcode + data) with the 4-byte LE length header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Read the payload length from a 4-byte LE header.
pub fn read_frame_length(header: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*header)
}

// ---------------------------------------------------------------------------
// Encode request
// ---------------------------------------------------------------------------

/// Encode a [`Request`] into wire format including the 4-byte length header.
pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut payload = Vec::new();

    match req {
        Request::Heartbeat => payload.push(OpCode::Heartbeat as u8),
        Request::CreateSession { capabilities } => {
            payload.push(OpCode::CreateSession as u8);
            write_string(&mut payload, capabilities);
        }
        Request::DeleteSession => payload.push(OpCode::DeleteSession as u8),
        Request::SetTimeouts {
            implicit_ms,
            page_load_ms,
            script_ms,
        } => {
            payload.push(OpCode::SetTimeouts as u8);
            payload.extend_from_slice(&implicit_ms.to_le_bytes());
            payload.extend_from_slice(&page_load_ms.to_le_bytes());
            payload.extend_from_slice(&script_ms.to_le_bytes());
        }
        Request::FindElement { using, value } => {
            payload.push(OpCode::FindElement as u8);
            write_string(&mut payload, using);
            write_string(&mut payload, value);
        }
        Request::Click { element } => {
            payload.push(OpCode::Click as u8);
            write_string(&mut payload, element);
        }
        Request::Clear { element } => {
            payload.push(OpCode::Clear as u8);
            write_string(&mut payload, element);
        }
        Request::SendKeys { element, text } => {
            payload.push(OpCode::SendKeys as u8);
            write_string(&mut payload, element);
            write_string(&mut payload, text);
        }
        Request::GetText { element } => {
            payload.push(OpCode::GetText as u8);
            write_string(&mut payload, element);
        }
        Request::GetAttribute { element, name } => {
            payload.push(OpCode::GetAttribute as u8);
            write_string(&mut payload, element);
            write_string(&mut payload, name);
        }
        Request::GetElementState { element } => {
            payload.push(OpCode::GetElementState as u8);
            write_string(&mut payload, element);
        }
        Request::PerformActions { actions } => {
            payload.push(OpCode::PerformActions as u8);
            write_actions(&mut payload, actions);
        }
        Request::PageSource => payload.push(OpCode::PageSource as u8),
        Request::WindowSize => payload.push(OpCode::WindowSize as u8),
        Request::ActivateApp { app_id } => {
            payload.push(OpCode::ActivateApp as u8);
            write_string(&mut payload, app_id);
        }
        Request::TerminateApp { app_id } => {
            payload.push(OpCode::TerminateApp as u8);
            write_string(&mut payload, app_id);
        }
        Request::BackgroundApp { seconds } => {
            payload.push(OpCode::BackgroundApp as u8);
            payload.extend_from_slice(&seconds.to_le_bytes());
        }
    }

    encode_frame(&payload)
}

// ---------------------------------------------------------------------------
// Decode request
// ---------------------------------------------------------------------------

/// Decode wire bytes (opcode + payload, **after** the 4-byte length header) into
/// a [`Request`].
pub fn decode_request(data: &[u8]) -> Result<Request, ProtocolError> {
    let mut cur = Cursor::new(data);
    let opcode = OpCode::from_u8(cur.read_u8()?)?;

    match opcode {
        OpCode::Heartbeat => Ok(Request::Heartbeat),
        OpCode::CreateSession => Ok(Request::CreateSession {
            capabilities: cur.read_string()?,
        }),
        OpCode::DeleteSession => Ok(Request::DeleteSession),
        OpCode::SetTimeouts => Ok(Request::SetTimeouts {
            implicit_ms: cur.read_u64()?,
            page_load_ms: cur.read_u64()?,
            script_ms: cur.read_u64()?,
        }),
        OpCode::FindElement => Ok(Request::FindElement {
            using: cur.read_string()?,
            value: cur.read_string()?,
        }),
        OpCode::Click => Ok(Request::Click {
            element: cur.read_string()?,
        }),
        OpCode::Clear => Ok(Request::Clear {
            element: cur.read_string()?,
        }),
        OpCode::SendKeys => Ok(Request::SendKeys {
            element: cur.read_string()?,
            text: cur.read_string()?,
        }),
        OpCode::GetText => Ok(Request::GetText {
            element: cur.read_string()?,
        }),
        OpCode::GetAttribute => Ok(Request::GetAttribute {
            element: cur.read_string()?,
            name: cur.read_string()?,
        }),
        OpCode::GetElementState => Ok(Request::GetElementState {
            element: cur.read_string()?,
        }),
        OpCode::PerformActions => Ok(Request::PerformActions {
            actions: cur.read_actions()?,
        }),
        OpCode::PageSource => Ok(Request::PageSource),
        OpCode::WindowSize => Ok(Request::WindowSize),
        OpCode::ActivateApp => Ok(Request::ActivateApp {
            app_id: cur.read_string()?,
        }),
        OpCode::TerminateApp => Ok(Request::TerminateApp {
            app_id: cur.read_string()?,
        }),
        OpCode::BackgroundApp => Ok(Request::BackgroundApp {
            seconds: cur.read_f64()?,
        }),
        OpCode::Error | OpCode::Response => Err(ProtocolError::InvalidPayload(format!(
            "opcode 0x{:02X} is not a valid request opcode",
            opcode as u8
        ))),
    }
}

// ---------------------------------------------------------------------------
// Encode response
// ---------------------------------------------------------------------------

/// Encode a [`Response`] into wire format including the 4-byte length header.
pub fn encode_response(resp: &Response) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(OpCode::Response as u8);

    match resp {
        Response::Ok => payload.push(ResponseType::Ok as u8),
        Response::Error { code, message } => {
            payload.push(ResponseType::Error as u8);
            payload.push(*code as u8);
            write_string(&mut payload, message);
        }
        Response::Session { session_id } => {
            payload.push(ResponseType::Session as u8);
            write_string(&mut payload, session_id);
        }
        Response::Element { element_id } => {
            payload.push(ResponseType::Element as u8);
            write_string(&mut payload, element_id);
        }
        Response::Text { value } => {
            payload.push(ResponseType::Text as u8);
            write_optional_string(&mut payload, value);
        }
        Response::Bool { value } => {
            payload.push(ResponseType::Bool as u8);
            write_bool(&mut payload, *value);
        }
        Response::State {
            displayed,
            enabled,
            obscured,
        } => {
            payload.push(ResponseType::State as u8);
            write_bool(&mut payload, *displayed);
            write_bool(&mut payload, *enabled);
            write_bool(&mut payload, *obscured);
        }
        Response::Size { width, height } => {
            payload.push(ResponseType::Size as u8);
            payload.extend_from_slice(&width.to_le_bytes());
            payload.extend_from_slice(&height.to_le_bytes());
        }
        Response::Source { xml } => {
            payload.push(ResponseType::Source as u8);
            write_string(&mut payload, xml);
        }
    }

    encode_frame(&payload)
}

// ---------------------------------------------------------------------------
// Decode response
// ---------------------------------------------------------------------------

/// Decode wire bytes (opcode + payload, **after** the 4-byte length header) into
/// a [`Response`].
pub fn decode_response(data: &[u8]) -> Result<Response, ProtocolError> {
    let mut cur = Cursor::new(data);
    let opcode = OpCode::from_u8(cur.read_u8()?)?;

    match opcode {
        OpCode::Response => {
            let resp_type = ResponseType::from_u8(cur.read_u8()?)?;
            match resp_type {
                ResponseType::Ok => Ok(Response::Ok),
                ResponseType::Error => Ok(Response::Error {
                    code: ErrorCode::from_u8(cur.read_u8()?),
                    message: cur.read_string()?,
                }),
                ResponseType::Session => Ok(Response::Session {
                    session_id: cur.read_string()?,
                }),
                ResponseType::Element => Ok(Response::Element {
                    element_id: cur.read_string()?,
                }),
                ResponseType::Text => Ok(Response::Text {
                    value: cur.read_optional_string()?,
                }),
                ResponseType::Bool => Ok(Response::Bool {
                    value: cur.read_bool()?,
                }),
                ResponseType::State => Ok(Response::State {
                    displayed: cur.read_bool()?,
                    enabled: cur.read_bool()?,
                    obscured: cur.read_bool()?,
                }),
                ResponseType::Size => Ok(Response::Size {
                    width: cur.read_i32()?,
                    height: cur.read_i32()?,
                }),
                ResponseType::Source => Ok(Response::Source {
                    xml: cur.read_string()?,
                }),
            }
        }

        OpCode::Error => {
            // The backend may also send a bare Error opcode.
            let message = cur.read_string()?;
            Ok(Response::Error {
                code: ErrorCode::Unknown,
                message,
            })
        }

        _ => Err(ProtocolError::InvalidPayload(format!(
            "opcode 0x{:02X} is not a valid response opcode",
            opcode as u8
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_request(req: &Request) {
        let wire = encode_request(req);
        let len = read_frame_length(wire[..4].try_into().unwrap()) as usize;
        assert_eq!(len, wire.len() - 4);
        let decoded = decode_request(&wire[4..]).expect("decode_request failed");
        assert_eq!(&decoded, req);
    }

    fn round_trip_response(resp: &Response) {
        let wire = encode_response(resp);
        let len = read_frame_length(wire[..4].try_into().unwrap()) as usize;
        assert_eq!(len, wire.len() - 4);
        let decoded = decode_response(&wire[4..]).expect("decode_response failed");
        assert_eq!(&decoded, resp);
    }

    #[test]
    fn request_create_session_carries_capability_json() {
        round_trip_request(&Request::CreateSession {
            capabilities: r#"{"platformName":"Android","appium:systemPort":8201}"#.into(),
        });
    }

    #[test]
    fn request_perform_actions_full_drag() {
        round_trip_request(&Request::PerformActions {
            actions: vec![
                PointerAction::MoveTo {
                    x: 540,
                    y: 1920,
                    duration: Duration::ZERO,
                },
                PointerAction::Down,
                PointerAction::Pause(Duration::from_millis(100)),
                PointerAction::MoveTo {
                    x: 540,
                    y: 480,
                    duration: Duration::from_millis(300),
                },
                PointerAction::Up,
            ],
        });
    }

    #[test]
    fn request_send_keys_unicode() {
        round_trip_request(&Request::SendKeys {
            element: "el-7".into(),
            text: "cafe\u{0301} \u{1F600}".into(),
        });
    }

    #[test]
    fn request_set_timeouts_and_background() {
        round_trip_request(&Request::SetTimeouts {
            implicit_ms: 0,
            page_load_ms: 30_000,
            script_ms: 30_000,
        });
        round_trip_request(&Request::BackgroundApp { seconds: 2.5 });
    }

    #[test]
    fn response_error_keeps_code() {
        round_trip_response(&Response::Error {
            code: ErrorCode::StaleElement,
            message: "element el-3 is no longer attached".into(),
        });
    }

    #[test]
    fn response_state_and_size() {
        round_trip_response(&Response::State {
            displayed: true,
            enabled: false,
            obscured: true,
        });
        round_trip_response(&Response::Size {
            width: 1080,
            height: 2400,
        });
    }

    #[test]
    fn response_text_none() {
        round_trip_response(&Response::Text { value: None });
    }

    // -- Error cases --------------------------------------------------------

    #[test]
    fn decode_request_empty_input() {
        assert_eq!(decode_request(&[]), Err(ProtocolError::InsufficientData));
    }

    #[test]
    fn decode_request_invalid_opcode() {
        assert_eq!(decode_request(&[0xFF]), Err(ProtocolError::InvalidOpCode(0xFF)));
    }

    #[test]
    fn decode_request_truncated_payload() {
        // SetTimeouts needs 24 bytes after the opcode.
        let result = decode_request(&[OpCode::SetTimeouts as u8, 0, 0, 0, 0]);
        assert_eq!(result, Err(ProtocolError::InsufficientData));
    }

    #[test]
    fn decode_request_rejects_unknown_action_tag() {
        let mut wire = vec![OpCode::PerformActions as u8];
        wire.extend_from_slice(&1u32.to_le_bytes());
        wire.push(9);
        assert!(matches!(
            decode_request(&wire),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn decode_request_rejects_oversized_action_count() {
        let mut wire = vec![OpCode::PerformActions as u8];
        wire.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(decode_request(&wire), Err(ProtocolError::InsufficientData));
    }

    #[test]
    fn decode_response_rejects_request_opcode() {
        assert!(decode_response(&[OpCode::Click as u8]).is_err());
    }

    #[test]
    fn decode_response_invalid_response_type() {
        assert!(decode_response(&[OpCode::Response as u8, 0xFF]).is_err());
    }

    #[test]
    fn decode_response_bare_error_opcode() {
        let mut wire = vec![OpCode::Error as u8];
        let msg = "something broke";
        wire.extend_from_slice(&(msg.len() as u32).to_le_bytes());
        wire.extend_from_slice(msg.as_bytes());
        assert_eq!(
            decode_response(&wire).unwrap(),
            Response::Error {
                code: ErrorCode::Unknown,
                message: "something broke".into()
            }
        );
    }

    #[test]
    fn unknown_error_code_degrades() {
        assert_eq!(ErrorCode::from_u8(0x42), ErrorCode::Unknown);
    }

    // -- Wire format verification -------------------------------------------

    #[test]
    fn heartbeat_wire_format() {
        assert_eq!(encode_request(&Request::Heartbeat), vec![1, 0, 0, 0, 0x01]);
    }

    #[test]
    fn tap_sequence_wire_format() {
        let wire = encode_request(&Request::PerformActions {
            actions: vec![PointerAction::Down, PointerAction::Up],
        });
        // opcode + u32 count + two tag bytes
        assert_eq!(&wire[..4], &7u32.to_le_bytes());
        assert_eq!(wire[4], OpCode::PerformActions as u8);
        assert_eq!(&wire[5..9], &2u32.to_le_bytes());
        assert_eq!(&wire[9..], &[1, 3]);
    }

    #[test]
    fn opcode_round_trip() {
        let codes: Vec<u8> = vec![
            0x01, 0x02, 0x03, 0x04, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x20, 0x21, 0x22,
            0x30, 0x31, 0x32, 0x99, 0xA0,
        ];
        for &code in &codes {
            assert_eq!(OpCode::from_u8(code).unwrap() as u8, code);
        }
    }
}
