//! Core types for AdChoices

use serde::{Deserialize, Serialize};

/// Disclosure session identifier. Shared by every frame taking part in one
/// ad delivery, so it travels on the wire as a plain number.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Opaque reference to a browsing context (window, iframe or popup).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameRef(u64);

impl FrameRef {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FrameRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// A registered disclosure entry exactly as an ad tag supplied it.
///
/// Registration accepts any subset of the whitelisted fields; validity is only
/// checked when the entry is turned into a [`DisclosureItem`] for rendering.
/// Unknown fields are dropped by serde.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_popup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_close_button: Option<bool>,
}

impl RawItem {
    /// Shorthand for the three fields every renderable item needs.
    pub fn new(
        title: impl Into<String>,
        link_text: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: Some(title.into()),
            link_text: Some(link_text.into()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_use_popup(mut self, use_popup: bool) -> Self {
        self.use_popup = Some(use_popup);
        self
    }

    pub fn with_render_close_button(mut self, render: bool) -> Self {
        self.render_close_button = Some(render);
        self
    }

    /// Title, link label and URL must all be present and non-empty.
    pub fn is_valid(&self) -> bool {
        present(&self.title) && present(&self.link_text) && present(&self.url)
    }

    /// Explicit `usePopup: false` on the entry.
    pub fn opts_out_of_popup(&self) -> bool {
        self.use_popup == Some(false)
    }

    /// Explicit `renderCloseButton: false` on the entry.
    pub fn opts_out_of_close_button(&self) -> bool {
        self.render_close_button == Some(false)
    }
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}

/// One `register` call: the session-level container id plus the item fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
    #[serde(flatten)]
    pub item: RawItem,
}

impl Registration {
    pub fn item(item: RawItem) -> Self {
        Self { dom_id: None, item }
    }

    pub fn with_dom_id(mut self, dom_id: impl Into<String>) -> Self {
        self.dom_id = Some(dom_id.into());
        self
    }
}

impl From<RawItem> for Registration {
    fn from(item: RawItem) -> Self {
        Self::item(item)
    }
}

/// A validated advertiser disclosure, ready to render.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisclosureItem {
    pub title: String,
    pub text: Option<String>,
    pub url: String,
    pub link_text: String,
    pub use_popup: bool,
    pub render_close_button: bool,
}

impl DisclosureItem {
    /// Returns `None` for entries missing a title, link label or URL.
    pub fn from_raw(raw: &RawItem) -> Option<Self> {
        if !raw.is_valid() {
            return None;
        }
        Some(Self {
            title: raw.title.clone().unwrap_or_default(),
            text: raw.text.clone().filter(|t| !t.is_empty()),
            url: raw.url.clone().unwrap_or_default(),
            link_text: raw.link_text.clone().unwrap_or_default(),
            use_popup: raw.use_popup.unwrap_or(false),
            render_close_button: raw.render_close_button.unwrap_or(true),
        })
    }

    /// Copy with `<` and `>` neutralised in every text field.
    pub fn escaped(&self) -> Self {
        Self {
            title: safe_string(&self.title),
            text: self.text.as_deref().map(safe_string),
            url: safe_string(&self.url),
            link_text: safe_string(&self.link_text),
            ..self.clone()
        }
    }
}

/// HTML-escapes angle brackets.
pub fn safe_string(s: &str) -> String {
    s.replace('<', "&lt;").replace('>', "&gt;")
}

/// How the current frame can reach the next window outward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessClass {
    /// Same origin and the library is loaded there: read its registry directly.
    SameOriginFriendly,
    /// Location readable but no library: ask over postMessage.
    PostMessageRequired,
    /// Location unreadable or undefined.
    OpaqueForeign,
}

impl AccessClass {
    pub fn needs_messaging(&self) -> bool {
        !matches!(self, Self::SameOriginFriendly)
    }
}

impl std::fmt::Display for AccessClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SameOriginFriendly => write!(f, "FRIENDLY_IFRAME"),
            Self::PostMessageRequired => write!(f, "POSTMESSAGE_SEARCH"),
            Self::OpaqueForeign => write!(f, "FOREIGN_IFRAME"),
        }
    }
}

/// Corner the AdChoices button is anchored to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments to `createPlayer`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_popup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_close_button: Option<bool>,
}

impl PlayerOptions {
    pub fn in_container(dom_id: impl Into<String>) -> Self {
        Self {
            dom_id: Some(dom_id.into()),
            ..Self::default()
        }
    }
}
