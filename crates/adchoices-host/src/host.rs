//! Host trait and timer/popup handles
//!
//! One library instance lives in one browsing context. Everything it can
//! observe or do outside its own memory goes through [`FrameHost`]: reading
//! other windows (which may fail cross-origin), posting messages, opening
//! popups and arming timers. Browsers implement this over the DOM; the runtime
//! crate implements it over a simulated frame tree.

use adchoices_core::{FrameRef, RawItem, Result, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handle returned by [`FrameHost::set_timeout`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimerHandle(pub u64);

/// Handle to an opened popup window.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PopupRef(pub u64);

/// What a timer means when it fires. Delivered back to the engine's
/// `on_timer`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Timer {
    /// Bounded wait for postMessage replies elapsed.
    PullTimeout(SessionId),
    /// Retry placing the AdChoices button.
    InjectRetry(SessionId),
    /// Scheduled chain-init discovery round.
    Discovery(SessionId),
}

impl Timer {
    pub fn session(&self) -> SessionId {
        match self {
            Self::PullTimeout(id) | Self::InjectRetry(id) | Self::Discovery(id) => *id,
        }
    }
}

/// The library's view of the browser around it.
///
/// Reads of another window return `Err(Error::AccessDenied)` where a browser
/// would throw a security exception.
pub trait FrameHost: Send + Sync {
    /// The window this instance runs in.
    fn current(&self) -> FrameRef;

    /// Parent of `frame`. The top window is its own parent.
    fn parent(&self, frame: FrameRef) -> Result<FrameRef>;

    /// Window that opened `frame` via a popup call, if any.
    fn opener(&self, frame: FrameRef) -> Option<FrameRef>;

    /// `location.href` of `frame`; `Ok(None)` when it reads as undefined.
    fn location_href(&self, frame: FrameRef) -> Result<Option<String>>;

    /// Whether the library's global is visible on `frame`.
    fn has_library(&self, frame: FrameRef) -> Result<bool>;

    /// `name` of `frame`.
    fn window_name(&self, frame: FrameRef) -> Result<Option<String>>;

    /// Direct read of `frame`'s registry entries for `id`.
    fn read_registry(&self, frame: FrameRef, id: SessionId) -> Result<Vec<RawItem>>;

    /// Whether the postMessage transport exists in this browser.
    fn supports_post_message(&self) -> bool;

    /// Post `payload` to `target` with a wildcard origin.
    fn post_message(&self, target: FrameRef, payload: String) -> Result<()>;

    /// `window.open('', name, features)`.
    fn open_popup(&self, name: &str, features: &str) -> Result<PopupRef>;

    /// `window.open('about:blank')`.
    fn open_blank(&self) -> Option<PopupRef>;

    fn close_popup(&self, popup: PopupRef);

    /// Arm a one-shot timer; the host delivers `timer` to the engine when it
    /// fires unless it was cleared first.
    fn set_timeout(&self, delay: Duration, timer: Timer) -> TimerHandle;

    fn clear_timeout(&self, handle: TimerHandle);

    fn is_top(&self) -> bool {
        let current = self.current();
        self.parent(current).map(|p| p == current).unwrap_or(false)
    }
}
