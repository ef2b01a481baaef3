//! Player — per-session presentation state
//!
//! The player owns what the user sees for one session: the button placement,
//! whether the disclosure goes to a popup or an inline panel, and the
//! aggregated items once collection finishes. Markup, CSS and translation
//! tables live behind [`Renderer`].

use adchoices_core::{DisclosureItem, PlayerOptions, Position, SessionId};
use adchoices_host::PopupRef;
use serde::Serialize;

/// Localized strings the renderer may supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    /// Button label ("AdChoices", "Datenschutzinfo", ...).
    ButtonLabel,
    Header,
    Footer,
}

/// The DOM side of presentation.
pub trait Renderer: Send + Sync {
    /// Whether an element with this id is in the document yet.
    fn container_exists(&self, dom_id: &str) -> bool;

    /// Insert a fresh button container at the top of the body and return its
    /// id. Used by iframes that were given no container.
    fn create_button_container(&self) -> Option<String>;

    fn render_button(&self, view: &ButtonView);

    /// Show the inline panel, creating it on first use. Returns `false` when
    /// the button wrapper it attaches to is missing.
    fn render_panel(&self, view: &PanelView) -> bool;

    fn hide_panel(&self, id: SessionId);

    /// Write the full panel document into a popup window and focus it.
    fn write_popup(&self, popup: PopupRef, title: &str, view: &PanelView);

    fn localized_text(&self, _kind: TextKind) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonView {
    pub id: SessionId,
    pub dom_id: String,
    pub position: Position,
    pub label: String,
}

/// What the panel close button does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    HidePanel,
    CloseWindow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelView {
    pub id: SessionId,
    pub position: Position,
    pub header: Option<String>,
    pub publisher_info: Option<String>,
    pub footer: Option<String>,
    /// Escaped, in aggregation order.
    pub items: Vec<DisclosureItem>,
    pub close_button: bool,
    pub close_action: CloseAction,
}

/// Where a show lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    Panel,
    Popup(PopupRef),
}

/// Side effects of one `show`, computed without touching the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowPlan {
    pub close_popup: Option<PopupRef>,
    pub target: ShowTarget,
    pub view: PanelView,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: SessionId,
    pub dom_id: Option<String>,
    pub position: Position,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub publisher_info: Option<String>,
    pub use_popup: bool,
    pub render_close_button: bool,
    pub popup: Option<PopupRef>,
    /// `None` until the first aggregation round is submitted.
    pub items: Option<Vec<DisclosureItem>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub injected: bool,
}

impl Player {
    pub fn new(
        id: SessionId,
        options: &PlayerOptions,
        default_position: Position,
        publisher_info: Option<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id,
            dom_id: options.dom_id.clone(),
            position: options.position.unwrap_or(default_position),
            header: options.header.clone().filter(|h| !h.is_empty()),
            footer: options.footer.clone().filter(|f| !f.is_empty()),
            publisher_info: publisher_info.filter(|p| !p.is_empty()),
            use_popup: options.use_popup.unwrap_or(true),
            render_close_button: options.render_close_button != Some(false),
            popup: None,
            items: None,
            attempts: 0,
            max_attempts,
            injected: false,
        }
    }

    /// Aggregation already produced something to show.
    pub fn has_privacy_info(&self) -> bool {
        self.items.as_ref().is_some_and(|items| !items.is_empty())
    }

    /// Record a failed container lookup. Returns `false` once the attempt
    /// budget is spent.
    pub fn note_missing_container(&mut self) -> bool {
        self.attempts += 1;
        self.attempts <= self.max_attempts
    }

    pub fn button_view(&self, dom_id: &str, label: String) -> ButtonView {
        ButtonView { id: self.id, dom_id: dom_id.to_string(), position: self.position, label }
    }

    pub fn panel_view(&self) -> PanelView {
        let close_action = if self.use_popup { CloseAction::CloseWindow } else { CloseAction::HidePanel };
        PanelView {
            id: self.id,
            position: self.position,
            header: self.header.clone(),
            publisher_info: self.publisher_info.clone(),
            footer: self.footer.clone(),
            items: self
                .items
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(DisclosureItem::escaped)
                .collect(),
            close_button: !self.use_popup || self.render_close_button,
            close_action,
        }
    }

    /// Decide how to show the panel. Inline display drops any popup that was
    /// opened for this session.
    pub fn plan_show(&mut self) -> ShowPlan {
        let view = self.panel_view();
        if !self.use_popup {
            return ShowPlan { close_popup: self.popup.take(), target: ShowTarget::Panel, view };
        }
        let target = match self.popup {
            Some(popup) => ShowTarget::Popup(popup),
            None => ShowTarget::Panel,
        };
        ShowPlan { close_popup: None, target, view }
    }
}
