//! Synchronized element interactions.
//!
//! An [`Interactor`] is bound to one [`Session`] and exposes three kinds of
//! operation, each with fixed failure semantics:
//!
//! | Kind          | Operations                                            | On timeout / failure      |
//! |---------------|-------------------------------------------------------|---------------------------|
//! | strict        | `click`, `type_text`, `read_text`, `wait_for_visible` | [`InteractionError`]      |
//! | soft          | `wait_for_gone`                                       | `false`                   |
//! | instant probe | `is_displayed`, `is_enabled`                          | `false`                   |
//!
//! Strict operations wait for the element state they need, then make exactly
//! one raw driver call. Element-level waits are the primary synchronization
//! tool; [`Interactor::wait_for_stable_screen`] is reserved for screens with no
//! element worth anchoring on.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::driver::{AutomationDriver, DriverError};
use crate::gesture::{Direction, GestureComposer, GestureError, Point};
use crate::locator::{ElementId, ElementState, Target};
use crate::session::Session;
use crate::wait::{WaitError, WaitSettings, Waiter};

/// Placeholder used when a target cannot be described.
pub const STALE_PLACEHOLDER: &str = "<stale element>";

/// Errors from strict interactions.
#[derive(Error, Debug)]
pub enum InteractionError {
    /// The target never reached the required state.
    #[error("{operation} on {target}: not ready: {source}")]
    NotReady {
        operation: &'static str,
        target: String,
        #[source]
        source: WaitError,
    },

    /// The target was ready but the command itself failed.
    #[error("{operation} on {target} failed: {source}")]
    Failed {
        operation: &'static str,
        target: String,
        #[source]
        source: DriverError,
    },

    #[error(transparent)]
    Gesture(#[from] GestureError),

    /// The screen kept changing until the probe gave up.
    #[error("screen did not settle within {}ms: {source}", .timeout.as_millis())]
    Unstable {
        timeout: Duration,
        #[source]
        source: WaitError,
    },
}

/// Settings for [`Interactor::wait_for_stable_screen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityProbe {
    /// Pause between page-source samples.
    pub sample_interval: Duration,
    /// How long the content must stay unchanged.
    pub min_stable: Duration,
    /// Overall deadline.
    pub timeout: Duration,
}

impl Default for StabilityProbe {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            min_stable: Duration::from_millis(1500),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Short label for log lines; never touches the backend.
fn label(target: &Target) -> String {
    match target {
        Target::Locator(locator) => locator.to_string(),
        Target::Element(id) => format!("element {id}"),
    }
}

/// Human-readable description of `target` for failure messages.
///
/// Never fails: an element handle that can no longer be read is described as
/// [`STALE_PLACEHOLDER`].
pub async fn describe_target(session: &Session, target: &Target) -> String {
    let id = match target {
        Target::Locator(locator) => return locator.to_string(),
        Target::Element(id) => id,
    };
    let Ok(driver) = session.driver() else {
        return STALE_PLACEHOLDER.to_string();
    };
    match driver.text(id).await {
        Ok(text) if !text.trim().is_empty() => format!("element '{}'", text.trim()),
        Ok(_) => match driver.attribute(id, "name").await {
            Ok(Some(name)) if !name.is_empty() => format!("element '{name}'"),
            Ok(_) => format!("element {id}"),
            Err(_) => STALE_PLACEHOLDER.to_string(),
        },
        Err(_) => STALE_PLACEHOLDER.to_string(),
    }
}

async fn resolve(driver: &dyn AutomationDriver, target: &Target) -> Result<ElementId, DriverError> {
    match target {
        Target::Locator(locator) => driver.find_element(locator).await,
        Target::Element(id) => Ok(id.clone()),
    }
}

async fn probe(
    driver: &dyn AutomationDriver,
    target: &Target,
) -> Result<(ElementId, ElementState), DriverError> {
    let id = resolve(driver, target).await?;
    let state = driver.element_state(&id).await?;
    Ok((id, state))
}

fn displayed(state: &ElementState) -> bool {
    state.displayed
}

fn interactable(state: &ElementState) -> bool {
    state.is_interactable()
}

/// Element interactions against one session.
#[derive(Clone)]
pub struct Interactor {
    session: Arc<Session>,
    waiter: Waiter,
    timeout: Duration,
    gestures: GestureComposer,
}

impl Interactor {
    pub fn new(session: Arc<Session>, settings: WaitSettings) -> Self {
        Self {
            session,
            waiter: Waiter::new(settings.poll_interval),
            timeout: settings.timeout,
            gestures: GestureComposer::default(),
        }
    }

    /// Override the deadline used by strict and soft waits.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cut waits short when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.waiter = self.waiter.with_cancellation(cancel);
        self
    }

    pub fn with_gestures(mut self, gestures: GestureComposer) -> Self {
        self.gestures = gestures;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fail(&self, operation: &'static str, target: &Target, source: DriverError) -> InteractionError {
        let target = describe_target(&self.session, target).await;
        error!(operation, element = %target, error = %source, "interaction failed");
        InteractionError::Failed {
            operation,
            target,
            source,
        }
    }

    fn driver_for(&self, operation: &'static str, target: &Target) -> Result<&dyn AutomationDriver, InteractionError> {
        self.session.driver().map_err(|source| {
            error!(operation, element = %label(target), error = %source, "session unavailable");
            InteractionError::Failed {
                operation,
                target: label(target),
                source,
            }
        })
    }

    /// Strict wait until `ready` holds for the target's state.
    async fn await_state(
        &self,
        operation: &'static str,
        target: &Target,
        ready: fn(&ElementState) -> bool,
    ) -> Result<ElementId, InteractionError> {
        let driver = self.driver_for(operation, target)?;
        let result = self
            .waiter
            .until(self.timeout, move || async move {
                let (id, state) = probe(driver, target).await?;
                Ok(ready(&state).then_some(id))
            })
            .await;

        match result {
            Ok(id) => Ok(id),
            Err(source) => {
                let target = describe_target(&self.session, target).await;
                error!(operation, element = %target, error = %source, "element not ready");
                Err(InteractionError::NotReady {
                    operation,
                    target,
                    source,
                })
            }
        }
    }

    /// Wait until the target is visible, enabled and unobstructed, then click
    /// it.
    #[instrument(skip(self, target), fields(element = tracing::field::Empty))]
    pub async fn click(&self, target: impl Into<Target>) -> Result<(), InteractionError> {
        let target = target.into();
        tracing::Span::current().record("element", label(&target).as_str());
        let id = self.await_state("click", &target, interactable).await?;
        let driver = self.driver_for("click", &target)?;
        match driver.click(&id).await {
            Ok(()) => {
                info!(element = %label(&target), "clicked");
                Ok(())
            }
            Err(e) => Err(self.fail("click", &target, e).await),
        }
    }

    /// Wait until the target is visible, clear it, and type `text`.
    pub async fn type_text(&self, target: impl Into<Target>, text: &str) -> Result<(), InteractionError> {
        let target = target.into();
        let id = self.await_state("type", &target, displayed).await?;
        let driver = self.driver_for("type", &target)?;
        if let Err(e) = driver.clear(&id).await {
            return Err(self.fail("clear", &target, e).await);
        }
        if let Err(e) = driver.send_keys(&id, text).await {
            return Err(self.fail("type", &target, e).await);
        }
        info!(element = %label(&target), text, "typed text");
        Ok(())
    }

    /// Wait until the target is visible and return its displayed text.
    pub async fn read_text(&self, target: impl Into<Target>) -> Result<String, InteractionError> {
        let target = target.into();
        let id = self.await_state("read text", &target, displayed).await?;
        let driver = self.driver_for("read text", &target)?;
        match driver.text(&id).await {
            Ok(value) => {
                info!(element = %label(&target), value = %value, "read text");
                Ok(value)
            }
            Err(e) => Err(self.fail("read text", &target, e).await),
        }
    }

    /// Strict wait for visibility, returning the resolved element.
    pub async fn wait_for_visible(&self, target: impl Into<Target>) -> Result<ElementId, InteractionError> {
        let target = target.into();
        let id = self.await_state("wait for visible", &target, displayed).await?;
        debug!(element = %label(&target), "element visible");
        Ok(id)
    }

    /// Whether the target is currently displayed. Never waits, never fails.
    pub async fn is_displayed(&self, target: impl Into<Target>) -> bool {
        self.instant_check("displayed", &target.into(), displayed).await
    }

    /// Whether the target is currently enabled. Never waits, never fails.
    pub async fn is_enabled(&self, target: impl Into<Target>) -> bool {
        self.instant_check("enabled", &target.into(), |s| s.enabled).await
    }

    async fn instant_check(
        &self,
        check: &'static str,
        target: &Target,
        holds: fn(&ElementState) -> bool,
    ) -> bool {
        let Ok(driver) = self.session.driver() else {
            debug!(check, element = %label(target), "session terminated, reporting false");
            return false;
        };
        match probe(driver, target).await {
            Ok((_, state)) => holds(&state),
            Err(e) => {
                debug!(check, element = %label(target), error = %e, "probe failed, reporting false");
                false
            }
        }
    }

    /// Soft wait until the target is hidden or gone.
    ///
    /// Returns `false` if it is still visible when the deadline passes.
    pub async fn wait_for_gone(&self, target: impl Into<Target>) -> bool {
        self.wait_for_gone_within(target, self.timeout).await
    }

    pub async fn wait_for_gone_within(&self, target: impl Into<Target>, timeout: Duration) -> bool {
        let target = target.into();
        let Ok(driver) = self.session.driver() else {
            return false;
        };
        let target_ref = &target;
        let gone = self
            .waiter
            .until_soft(timeout, move || async move {
                match probe(driver, target_ref).await {
                    Ok((_, state)) => Ok(!state.displayed),
                    Err(e) if e.is_transient() => Ok(true),
                    Err(e) => Err(e),
                }
            })
            .await;
        if gone {
            info!(element = %label(&target), "element gone");
        } else {
            info!(element = %label(&target), timeout_ms = timeout.as_millis() as u64, "element still visible");
        }
        gone
    }

    /// Wait until the page source stops changing for `probe.min_stable`.
    pub async fn wait_for_stable_screen(&self, probe: StabilityProbe) -> Result<(), InteractionError> {
        let driver = self.session.driver().map_err(|source| InteractionError::Failed {
            operation: "stability probe",
            target: "screen".to_string(),
            source,
        })?;

        struct Last {
            source: Option<String>,
            since: Instant,
        }
        let last = Mutex::new(Last {
            source: None,
            since: Instant::now(),
        });
        let last = &last;
        let min_stable = probe.min_stable;

        let sampler = Waiter::new(probe.sample_interval).with_cancellation(self.waiter.cancellation_token());
        let result = sampler
            .until_true(probe.timeout, move || async move {
                let sample = driver.page_source().await;
                let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let now = Instant::now();
                let sample = match sample {
                    Ok(sample) => sample,
                    Err(e) => {
                        last.source = None;
                        return Err(e);
                    }
                };
                if last.source.as_deref() == Some(sample.as_str()) {
                    Ok(now - last.since >= min_stable)
                } else {
                    last.source = Some(sample);
                    last.since = now;
                    Ok(false)
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!("screen stable");
                Ok(())
            }
            Err(source) => {
                error!(error = %source, "screen never settled");
                Err(InteractionError::Unstable {
                    timeout: probe.timeout,
                    source,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Gestures
    // -----------------------------------------------------------------------

    fn gesture_driver(&self, gesture: &str) -> Result<&dyn AutomationDriver, InteractionError> {
        self.session.driver().map_err(|source| {
            InteractionError::Gesture(GestureError::Dispatch {
                gesture: gesture.to_string(),
                source,
            })
        })
    }

    /// Scroll or swipe across the current viewport.
    pub async fn scroll(&self, direction: Direction) -> Result<(), InteractionError> {
        let driver = self.gesture_driver(direction.name())?;
        self.gestures.swipe(driver, direction).await?;
        Ok(())
    }

    pub async fn tap_at(&self, point: Point) -> Result<(), InteractionError> {
        let driver = self.gesture_driver("tap")?;
        self.gestures.tap(driver, point).await?;
        Ok(())
    }

    pub async fn long_press_at(&self, point: Point, hold: Duration) -> Result<(), InteractionError> {
        let driver = self.gesture_driver("long press")?;
        self.gestures.long_press(driver, point, hold).await?;
        Ok(())
    }
}
