//! Element target descriptors shared by every automation backend.
//!
//! A [`Locator`] describes *how* to find an element; a [`Target`] is what the
//! interaction layer operates on, either a locator that is resolved on every
//! attempt or an [`ElementId`] that was resolved earlier and may since have
//! gone stale.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Strategy used by the backend to resolve a [`Locator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum By {
    /// Accessibility identifier (`content-desc` on Android, `accessibilityIdentifier` on iOS).
    AccessibilityId,
    /// Platform resource id (`resource-id` on Android, `name` on iOS).
    Id,
    /// XPath over the page source.
    XPath,
    /// Element class or type name (e.g. `android.widget.Button`, `XCUIElementTypeButton`).
    ClassName,
    /// Visible text or label.
    Text,
}

impl By {
    /// Wire name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            By::AccessibilityId => "accessibility id",
            By::Id => "id",
            By::XPath => "xpath",
            By::ClassName => "class name",
            By::Text => "text",
        }
    }

    /// Parses a wire name back into a strategy.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "accessibility id" => Some(By::AccessibilityId),
            "id" => Some(By::Id),
            "xpath" => Some(By::XPath),
            "class name" => Some(By::ClassName),
            "text" => Some(By::Text),
            _ => None,
        }
    }
}

/// A strategy/value pair describing how to find one element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub by: By,
    pub value: String,
}

impl Locator {
    pub fn new(by: By, value: impl Into<String>) -> Self {
        Self {
            by,
            value: value.into(),
        }
    }

    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Self::new(By::AccessibilityId, value)
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(By::Id, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(By::XPath, value)
    }

    pub fn class_name(value: impl Into<String>) -> Self {
        Self::new(By::ClassName, value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(By::Text, value)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}='{}'", self.by.as_str(), self.value)
    }
}

/// Backend-assigned handle of a resolved element.
///
/// Handles are only meaningful within the session that produced them and can
/// go stale when the screen re-renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an interaction operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Re-resolved through the backend on every attempt.
    Locator(Locator),
    /// A previously resolved handle, used as-is.
    Element(ElementId),
}

impl From<Locator> for Target {
    fn from(locator: Locator) -> Self {
        Target::Locator(locator)
    }
}

impl From<ElementId> for Target {
    fn from(id: ElementId) -> Self {
        Target::Element(id)
    }
}

/// Snapshot of an element's interactability as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementState {
    /// Rendered and inside the viewport.
    pub displayed: bool,
    /// Accepts input.
    pub enabled: bool,
    /// Another view currently covers the element's hit point.
    pub obscured: bool,
}

impl ElementState {
    /// Visible, enabled and not covered by another view.
    pub fn is_interactable(&self) -> bool {
        self.displayed && self.enabled && !self.obscured
    }
}
