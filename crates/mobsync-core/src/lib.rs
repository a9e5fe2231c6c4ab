//! # mobsync-core
//!
//! Session lifecycle and interaction synchronization for mobile app automation
//! on Android and iOS.
//!
//! Each worker thread gets its own automation session from a
//! [`SessionManager`](manager::SessionManager) and drives the app under test
//! through an [`Interactor`](interaction::Interactor), which turns raw,
//! asynchronous device commands into deterministic waits and gestures.
//!
//! ## Modules
//!
//! - [`capability`] - Validated, immutable session capability sets and local port allocation
//! - [`manager`] - Per-thread session registry with guaranteed release
//! - [`session`] - A single backend session and its sticky terminated state
//! - [`wait`] - Strict and soft polling waits with cancellation
//! - [`gesture`] - Percentage-based single-finger pointer sequences
//! - [`interaction`] - Click/type/read operations, instant probes and the screen stability probe
//! - [`locator`] - Element target descriptors
//! - [`driver`] - Backend-agnostic driver traits and the unified driver error
//! - [`protocol`] - Binary wire protocol spoken with the automation backend
//! - [`backend_client`] - Framed request/response transport
//! - [`remote_driver`] - Network implementation of the driver traits
//! - [`config`] - Persistent configuration in `~/.mobsync/config.json`
//!
//! ## Example
//!
//! ```no_run
//! use mobsync_core::capability::Platform;
//! use mobsync_core::config::MobsyncConfig;
//! use mobsync_core::gesture::Direction;
//! use mobsync_core::locator::Locator;
//! use mobsync_core::manager::SessionManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SessionManager::from_config(&MobsyncConfig::load());
//!
//! manager
//!     .with_session(Platform::Ios, |ui| async move {
//!         ui.type_text(Locator::accessibility_id("email"), "qa@example.com").await?;
//!         ui.click(Locator::accessibility_id("sign-in")).await?;
//!         ui.scroll(Direction::ScrollDown).await?;
//!         Ok::<_, mobsync_core::interaction::InteractionError>(())
//!     })
//!     .await??;
//! # Ok(())
//! # }
//! ```

pub mod backend_client;
pub mod capability;
pub mod config;
pub mod driver;
pub mod gesture;
pub mod interaction;
pub mod locator;
pub mod manager;
pub mod protocol;
pub mod remote_driver;
pub mod session;
pub mod wait;
