//! Capability assembly for Android and iOS sessions.
//!
//! [`assemble`] turns a requested [`Platform`] and the externally supplied
//! [`CapabilityInput`] into an immutable [`CapabilitySet`]. Fields that only
//! exist on one platform live in the matching [`PlatformCapabilities`]
//! variant, so an Android set can never carry a WebDriverAgent port and vice
//! versa.
//!
//! # Example
//!
//! ```no_run
//! use mobsync_core::capability::{assemble, CapabilityInput, Platform, PortPool};
//!
//! let input = CapabilityInput {
//!     device_name: Some("Pixel 7".into()),
//!     platform_version: Some("14".into()),
//!     app_package: Some("com.example.shop".into()),
//!     app_activity: Some(".MainActivity".into()),
//!     ..Default::default()
//! };
//! let caps = assemble(Platform::Android, &input, &PortPool::default()).unwrap();
//! println!("{}", caps.to_json());
//! ```

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Stability defaults
// ---------------------------------------------------------------------------

/// Idle time after which the backend drops a session with no commands.
pub const DEFAULT_NEW_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
/// App install timeout applied on both platforms.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(180);
/// Timeout for individual `adb` invocations made by the Android backend.
pub const DEFAULT_ADB_EXEC_TIMEOUT: Duration = Duration::from_secs(60);
/// Launch timeout for the on-device automation agent.
pub const DEFAULT_ANDROID_AGENT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Launch timeout for WebDriverAgent on iOS.
pub const DEFAULT_IOS_AGENT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(120);
/// How many times the iOS agent launch is retried.
pub const DEFAULT_AGENT_STARTUP_RETRIES: u32 = 4;
/// Pause between iOS agent launch retries.
pub const DEFAULT_AGENT_RETRY_INTERVAL: Duration = Duration::from_secs(20);

/// Upper bound for any configured timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);
/// Upper bound for agent startup retries.
pub const MAX_STARTUP_RETRIES: u32 = 10;

/// Local ports handed out to Android `systemPort`.
pub const ANDROID_PORT_RANGE: RangeInclusive<u16> = 8200..=8299;
/// Local ports handed out to iOS `wdaLocalPort`.
pub const IOS_PORT_RANGE: RangeInclusive<u16> = 8100..=8199;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration errors raised before any session is attempted.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CapabilityError {
    /// The platform string is neither `android` nor `ios`.
    #[error("unsupported platform '{0}' (expected 'android' or 'ios')")]
    UnsupportedPlatform(String),

    /// A field required by the selected platform is absent or blank.
    #[error("{platform} capability '{field}' is required")]
    MissingField {
        platform: Platform,
        field: &'static str,
    },

    /// Every port in the platform's range is in use.
    #[error("no free local port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The two supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// Value of the `platformName` capability.
    pub fn platform_name(&self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::Ios => "iOS",
        }
    }

    /// Automation engine used when the input does not pick one.
    pub fn default_automation_name(&self) -> &'static str {
        match self {
            Platform::Android => "UiAutomator2",
            Platform::Ios => "XCUITest",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android => f.write_str("android"),
            Platform::Ios => f.write_str("ios"),
        }
    }
}

impl FromStr for Platform {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            _ => Err(CapabilityError::UnsupportedPlatform(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// How much app state the backend wipes when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Keep app data and the installed build.
    #[default]
    NoReset,
    /// Clear app data but keep the installed build.
    FastReset,
    /// Uninstall and reinstall the app.
    FullReset,
}

/// Externally supplied device profile for one platform.
///
/// Every field is optional at this level; [`assemble`] decides which ones the
/// selected platform requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityInput {
    pub device_name: Option<String>,
    pub platform_version: Option<String>,
    pub udid: Option<String>,
    pub automation_name: Option<String>,
    /// Local build artifact (`.apk` / `.app` / `.ipa`).
    pub app_path: Option<PathBuf>,
    /// Android package of the installed app.
    pub app_package: Option<String>,
    /// Android launch activity of the installed app.
    pub app_activity: Option<String>,
    /// iOS bundle identifier of the installed app.
    pub bundle_id: Option<String>,
    pub auto_grant_permissions: Option<bool>,
    pub reset: ResetPolicy,
    pub new_command_timeout_secs: Option<u64>,
    pub install_timeout_secs: Option<u64>,
    pub agent_launch_timeout_secs: Option<u64>,
    pub agent_startup_retries: Option<u32>,
    pub agent_retry_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Port allocation
// ---------------------------------------------------------------------------

/// Hands out local ports from a fixed range without reusing one while the
/// cursor has not wrapped.
///
/// Each candidate is probed by binding `127.0.0.1:port`; ports that another
/// process already holds are skipped.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    cursor: AtomicU32,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            start: *range.start(),
            end: *range.end(),
            cursor: AtomicU32::new(0),
        }
    }

    /// Returns the next free port in the range.
    pub fn allocate(&self) -> Result<u16, CapabilityError> {
        let span = u32::from(self.end.saturating_sub(self.start)) + 1;
        for _ in 0..span {
            let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % span;
            let port = self.start + offset as u16;
            if port_is_free(port) {
                debug!(port, "allocated local port");
                return Ok(port);
            }
            debug!(port, "port in use, skipping");
        }
        Err(CapabilityError::NoFreePort {
            start: self.start,
            end: self.end,
        })
    }
}

fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// One [`PortAllocator`] per platform.
#[derive(Debug)]
pub struct PortPool {
    android: PortAllocator,
    ios: PortAllocator,
}

impl PortPool {
    pub fn new(android: RangeInclusive<u16>, ios: RangeInclusive<u16>) -> Self {
        Self {
            android: PortAllocator::new(android),
            ios: PortAllocator::new(ios),
        }
    }

    pub fn for_platform(&self, platform: Platform) -> &PortAllocator {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new(ANDROID_PORT_RANGE, IOS_PORT_RANGE)
    }
}

// ---------------------------------------------------------------------------
// Capability set
// ---------------------------------------------------------------------------

/// Where the backend gets the app under test from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppReference {
    /// A build artifact on the local filesystem, installed by the backend.
    Local(PathBuf),
    /// An app that is already installed on the device; identity comes from
    /// [`PlatformCapabilities`].
    Installed,
}

/// Fields that only exist on one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCapabilities {
    Android {
        app_package: String,
        app_activity: String,
        system_port: u16,
        adb_exec_timeout: Duration,
        agent_launch_timeout: Duration,
    },
    Ios {
        bundle_id: String,
        wda_local_port: u16,
        agent_launch_timeout: Duration,
        agent_startup_retries: u32,
        agent_retry_interval: Duration,
    },
}

/// Immutable startup configuration for one session.
///
/// Built by [`assemble`]; there are no mutating accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    device_name: String,
    platform_version: String,
    udid: Option<String>,
    automation_name: String,
    app: AppReference,
    auto_grant_permissions: bool,
    reset: ResetPolicy,
    new_command_timeout: Duration,
    install_timeout: Duration,
    platform: PlatformCapabilities,
}

impl CapabilitySet {
    pub fn platform(&self) -> Platform {
        match self.platform {
            PlatformCapabilities::Android { .. } => Platform::Android,
            PlatformCapabilities::Ios { .. } => Platform::Ios,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn platform_version(&self) -> &str {
        &self.platform_version
    }

    pub fn udid(&self) -> Option<&str> {
        self.udid.as_deref()
    }

    pub fn automation_name(&self) -> &str {
        &self.automation_name
    }

    pub fn app(&self) -> &AppReference {
        &self.app
    }

    pub fn auto_grant_permissions(&self) -> bool {
        self.auto_grant_permissions
    }

    pub fn reset(&self) -> ResetPolicy {
        self.reset
    }

    pub fn new_command_timeout(&self) -> Duration {
        self.new_command_timeout
    }

    pub fn install_timeout(&self) -> Duration {
        self.install_timeout
    }

    pub fn platform_capabilities(&self) -> &PlatformCapabilities {
        &self.platform
    }

    /// Package name (Android) or bundle id (iOS) of the app under test.
    pub fn app_id(&self) -> &str {
        match &self.platform {
            PlatformCapabilities::Android { app_package, .. } => app_package,
            PlatformCapabilities::Ios { bundle_id, .. } => bundle_id,
        }
    }

    /// The local agent port reserved for this session.
    pub fn local_port(&self) -> u16 {
        match self.platform {
            PlatformCapabilities::Android { system_port, .. } => system_port,
            PlatformCapabilities::Ios { wda_local_port, .. } => wda_local_port,
        }
    }

    /// Renders the capability map sent to the backend.
    pub fn to_json(&self) -> Value {
        let mut caps = Map::new();
        caps.insert("platformName".into(), json!(self.platform().platform_name()));
        caps.insert("appium:platformVersion".into(), json!(self.platform_version));
        caps.insert("appium:deviceName".into(), json!(self.device_name));
        if let Some(udid) = &self.udid {
            caps.insert("appium:udid".into(), json!(udid));
        }
        caps.insert("appium:automationName".into(), json!(self.automation_name));
        caps.insert(
            "appium:newCommandTimeout".into(),
            json!(self.new_command_timeout.as_secs()),
        );
        caps.insert(
            "appium:noReset".into(),
            json!(self.reset == ResetPolicy::NoReset),
        );
        caps.insert(
            "appium:fullReset".into(),
            json!(self.reset == ResetPolicy::FullReset),
        );
        if let AppReference::Local(path) = &self.app {
            caps.insert("appium:app".into(), json!(path.to_string_lossy()));
        }

        match &self.platform {
            PlatformCapabilities::Android {
                app_package,
                app_activity,
                system_port,
                adb_exec_timeout,
                agent_launch_timeout,
            } => {
                caps.insert("appium:appPackage".into(), json!(app_package));
                caps.insert("appium:appActivity".into(), json!(app_activity));
                caps.insert(
                    "appium:autoGrantPermissions".into(),
                    json!(self.auto_grant_permissions),
                );
                caps.insert("appium:systemPort".into(), json!(system_port));
                caps.insert(
                    "appium:adbExecTimeout".into(),
                    json!(adb_exec_timeout.as_millis() as u64),
                );
                caps.insert(
                    "appium:androidInstallTimeout".into(),
                    json!(self.install_timeout.as_millis() as u64),
                );
                caps.insert(
                    "appium:uiautomator2ServerLaunchTimeout".into(),
                    json!(agent_launch_timeout.as_millis() as u64),
                );
                caps.insert(
                    "appium:uiautomator2ServerInstallTimeout".into(),
                    json!(agent_launch_timeout.as_millis() as u64),
                );
            }
            PlatformCapabilities::Ios {
                bundle_id,
                wda_local_port,
                agent_launch_timeout,
                agent_startup_retries,
                agent_retry_interval,
            } => {
                caps.insert("appium:bundleId".into(), json!(bundle_id));
                caps.insert(
                    "appium:autoAcceptAlerts".into(),
                    json!(self.auto_grant_permissions),
                );
                caps.insert("appium:wdaLocalPort".into(), json!(wda_local_port));
                caps.insert(
                    "appium:wdaLaunchTimeout".into(),
                    json!(agent_launch_timeout.as_millis() as u64),
                );
                caps.insert(
                    "appium:wdaStartupRetries".into(),
                    json!(agent_startup_retries),
                );
                caps.insert(
                    "appium:wdaStartupRetryInterval".into(),
                    json!(agent_retry_interval.as_millis() as u64),
                );
                caps.insert(
                    "appium:appPushTimeout".into(),
                    json!(self.install_timeout.as_millis() as u64),
                );
            }
        }

        Value::Object(caps)
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

fn required(
    platform: Platform,
    field: &'static str,
    value: &Option<String>,
) -> Result<String, CapabilityError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(CapabilityError::MissingField { platform, field }),
    }
}

fn timeout_or(secs: Option<u64>, default: Duration) -> Duration {
    secs.map(Duration::from_secs)
        .unwrap_or(default)
        .min(MAX_TIMEOUT)
}

fn resolve_app(platform: Platform, input: &CapabilityInput, app_id: &str) -> AppReference {
    match &input.app_path {
        Some(path) if path.exists() => {
            info!(%platform, path = %path.display(), "using local app artifact");
            AppReference::Local(path.clone())
        }
        Some(path) => {
            warn!(
                %platform,
                path = %path.display(),
                app_id,
                "app artifact not found, falling back to installed app"
            );
            AppReference::Installed
        }
        None => {
            info!(%platform, app_id, "no app artifact configured, using installed app");
            AppReference::Installed
        }
    }
}

/// Builds a validated [`CapabilitySet`] for `platform`.
///
/// Fails with a [`CapabilityError`] before touching the backend if any field
/// the platform requires is missing or no local port is free.
pub fn assemble(
    platform: Platform,
    input: &CapabilityInput,
    ports: &PortPool,
) -> Result<CapabilitySet, CapabilityError> {
    let device_name = required(platform, "device_name", &input.device_name)?;
    let platform_version = required(platform, "platform_version", &input.platform_version)?;

    let platform_caps = match platform {
        Platform::Android => {
            let app_package = required(platform, "app_package", &input.app_package)?;
            let app_activity = required(platform, "app_activity", &input.app_activity)?;
            PlatformCapabilities::Android {
                app_package,
                app_activity,
                system_port: ports.for_platform(platform).allocate()?,
                adb_exec_timeout: DEFAULT_ADB_EXEC_TIMEOUT,
                agent_launch_timeout: timeout_or(
                    input.agent_launch_timeout_secs,
                    DEFAULT_ANDROID_AGENT_LAUNCH_TIMEOUT,
                ),
            }
        }
        Platform::Ios => {
            let bundle_id = required(platform, "bundle_id", &input.bundle_id)?;
            PlatformCapabilities::Ios {
                bundle_id,
                wda_local_port: ports.for_platform(platform).allocate()?,
                agent_launch_timeout: timeout_or(
                    input.agent_launch_timeout_secs,
                    DEFAULT_IOS_AGENT_LAUNCH_TIMEOUT,
                ),
                agent_startup_retries: input
                    .agent_startup_retries
                    .unwrap_or(DEFAULT_AGENT_STARTUP_RETRIES)
                    .min(MAX_STARTUP_RETRIES),
                agent_retry_interval: timeout_or(
                    input.agent_retry_interval_secs,
                    DEFAULT_AGENT_RETRY_INTERVAL,
                ),
            }
        }
    };

    let app_id = match &platform_caps {
        PlatformCapabilities::Android { app_package, .. } => app_package.as_str(),
        PlatformCapabilities::Ios { bundle_id, .. } => bundle_id.as_str(),
    };
    let app = resolve_app(platform, input, app_id);

    let automation_name = input
        .automation_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| platform.default_automation_name().to_string());

    Ok(CapabilitySet {
        device_name,
        platform_version,
        udid: input.udid.clone().filter(|u| !u.trim().is_empty()),
        automation_name,
        app,
        auto_grant_permissions: input.auto_grant_permissions.unwrap_or(true),
        reset: input.reset,
        new_command_timeout: timeout_or(
            input.new_command_timeout_secs,
            DEFAULT_NEW_COMMAND_TIMEOUT,
        ),
        install_timeout: timeout_or(input.install_timeout_secs, DEFAULT_INSTALL_TIMEOUT),
        platform: platform_caps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn android_input() -> CapabilityInput {
        CapabilityInput {
            device_name: Some("Pixel 7".into()),
            platform_version: Some("14".into()),
            app_package: Some("com.example.shop".into()),
            app_activity: Some(".MainActivity".into()),
            ..Default::default()
        }
    }

    fn ios_input() -> CapabilityInput {
        CapabilityInput {
            device_name: Some("iPhone 15".into()),
            platform_version: Some("17.4".into()),
            bundle_id: Some("com.example.Shop".into()),
            ..Default::default()
        }
    }

    // Narrow ranges well away from the defaults so parallel tests don't
    // exhaust each other's ports.
    fn pool() -> PortPool {
        PortPool::new(41200..=41299, 41300..=41399)
    }

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("Android".parse::<Platform>().unwrap(), Platform::Android);
        assert_eq!(" IOS ".parse::<Platform>().unwrap(), Platform::Ios);
    }

    #[test]
    fn unknown_platform_is_a_configuration_error() {
        let err = "windows".parse::<Platform>().unwrap_err();
        assert_eq!(err, CapabilityError::UnsupportedPlatform("windows".into()));
        assert!(err.to_string().contains("windows"));
    }

    #[test]
    fn android_assembly_defaults() {
        let caps = assemble(Platform::Android, &android_input(), &pool()).unwrap();
        assert_eq!(caps.platform(), Platform::Android);
        assert_eq!(caps.automation_name(), "UiAutomator2");
        assert_eq!(caps.app(), &AppReference::Installed);
        assert_eq!(caps.app_id(), "com.example.shop");
        assert!(caps.auto_grant_permissions());
        assert_eq!(caps.new_command_timeout(), DEFAULT_NEW_COMMAND_TIMEOUT);
        assert!((41200..=41299).contains(&caps.local_port()));
    }

    #[test]
    fn ios_assembly_defaults() {
        let caps = assemble(Platform::Ios, &ios_input(), &pool()).unwrap();
        assert_eq!(caps.platform(), Platform::Ios);
        assert_eq!(caps.automation_name(), "XCUITest");
        match caps.platform_capabilities() {
            PlatformCapabilities::Ios {
                agent_startup_retries,
                agent_launch_timeout,
                ..
            } => {
                assert_eq!(*agent_startup_retries, DEFAULT_AGENT_STARTUP_RETRIES);
                assert_eq!(*agent_launch_timeout, DEFAULT_IOS_AGENT_LAUNCH_TIMEOUT);
            }
            other => panic!("expected Ios variant, got {other:?}"),
        }
    }

    #[test]
    fn missing_common_field_fails() {
        let mut input = android_input();
        input.device_name = None;
        let err = assemble(Platform::Android, &input, &pool()).unwrap_err();
        assert_eq!(
            err,
            CapabilityError::MissingField {
                platform: Platform::Android,
                field: "device_name"
            }
        );
    }

    #[test]
    fn blank_field_counts_as_missing() {
        let mut input = ios_input();
        input.platform_version = Some("   ".into());
        let err = assemble(Platform::Ios, &input, &pool()).unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::MissingField {
                field: "platform_version",
                ..
            }
        ));
    }

    #[test]
    fn missing_platform_specific_field_fails() {
        let mut input = android_input();
        input.app_activity = None;
        assert!(matches!(
            assemble(Platform::Android, &input, &pool()),
            Err(CapabilityError::MissingField {
                field: "app_activity",
                ..
            })
        ));

        // An Android profile has no bundle id, so it cannot start an iOS session.
        assert!(matches!(
            assemble(Platform::Ios, &android_input(), &pool()),
            Err(CapabilityError::MissingField {
                field: "bundle_id",
                ..
            })
        ));
    }

    #[test]
    fn other_platform_keys_are_absent() {
        let android = assemble(Platform::Android, &android_input(), &pool())
            .unwrap()
            .to_json();
        assert!(android.get("appium:systemPort").is_some());
        assert!(android.get("appium:wdaLocalPort").is_none());
        assert!(android.get("appium:bundleId").is_none());

        let ios = assemble(Platform::Ios, &ios_input(), &pool()).unwrap().to_json();
        assert_eq!(ios["platformName"], "iOS");
        assert!(ios.get("appium:wdaLocalPort").is_some());
        assert!(ios.get("appium:systemPort").is_none());
        assert!(ios.get("appium:appPackage").is_none());
    }

    #[test]
    fn existing_artifact_is_referenced_directly() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("shop.apk");
        std::fs::write(&apk, b"apk").unwrap();

        let mut input = android_input();
        input.app_path = Some(apk.clone());
        let caps = assemble(Platform::Android, &input, &pool()).unwrap();
        assert_eq!(caps.app(), &AppReference::Local(apk.clone()));
        assert_eq!(
            caps.to_json()["appium:app"],
            apk.to_string_lossy().to_string()
        );
    }

    #[test]
    fn missing_artifact_falls_back_to_installed_app() {
        let mut input = ios_input();
        input.app_path = Some(PathBuf::from("/definitely/not/here/Shop.app"));
        let caps = assemble(Platform::Ios, &input, &pool()).unwrap();
        assert_eq!(caps.app(), &AppReference::Installed);
        let json = caps.to_json();
        assert!(json.get("appium:app").is_none());
        assert_eq!(json["appium:bundleId"], "com.example.Shop");
    }

    #[test]
    fn overrides_are_clamped() {
        let mut input = ios_input();
        input.new_command_timeout_secs = Some(86_400);
        input.agent_startup_retries = Some(1_000);
        let caps = assemble(Platform::Ios, &input, &pool()).unwrap();
        assert_eq!(caps.new_command_timeout(), MAX_TIMEOUT);
        match caps.platform_capabilities() {
            PlatformCapabilities::Ios {
                agent_startup_retries,
                ..
            } => assert_eq!(*agent_startup_retries, MAX_STARTUP_RETRIES),
            other => panic!("expected Ios variant, got {other:?}"),
        }
    }

    #[test]
    fn consecutive_sessions_get_distinct_ports() {
        let ports = pool();
        let a = assemble(Platform::Android, &android_input(), &ports).unwrap();
        let b = assemble(Platform::Android, &android_input(), &ports).unwrap();
        assert_ne!(a.local_port(), b.local_port());
    }

    #[test]
    fn occupied_port_is_skipped() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = listener.local_addr().unwrap().port();
        let allocator = PortAllocator::new(taken..=taken);
        assert_eq!(
            allocator.allocate(),
            Err(CapabilityError::NoFreePort {
                start: taken,
                end: taken
            })
        );
    }

    #[test]
    fn reset_policy_maps_to_flags() {
        let mut input = android_input();
        input.reset = ResetPolicy::FullReset;
        let json = assemble(Platform::Android, &input, &pool()).unwrap().to_json();
        assert_eq!(json["appium:fullReset"], true);
        assert_eq!(json["appium:noReset"], false);
    }
}
