//! Recording renderer — presentation as an ordered event log
//!
//! One log is shared by every simulated frame; each frame's engine gets a
//! [`FrameRenderer`] that tags its events with the frame they happened in.

use adchoices_core::{FrameRef, SessionId};
use adchoices_host::PopupRef;
use adchoices_registry::{ButtonView, PanelView, Renderer, TextKind};
use dashmap::DashSet;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderEvent {
    Button { frame: FrameRef, view: ButtonView },
    Panel { frame: FrameRef, view: PanelView },
    Popup { frame: FrameRef, popup: PopupRef, title: String, view: PanelView },
    Hide { frame: FrameRef, id: SessionId },
}

impl RenderEvent {
    pub fn frame(&self) -> FrameRef {
        match self {
            Self::Button { frame, .. }
            | Self::Panel { frame, .. }
            | Self::Popup { frame, .. }
            | Self::Hide { frame, .. } => *frame,
        }
    }

    /// The panel shown, for panel and popup events.
    pub fn shown(&self) -> Option<&PanelView> {
        match self {
            Self::Panel { view, .. } | Self::Popup { view, .. } => Some(view),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<RenderEvent>>,
    containers: DashSet<(FrameRef, String)>,
    next_container: AtomicU64,
    button_label: Option<String>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Localized button label handed to every frame.
    pub fn with_button_label(mut self, label: impl Into<String>) -> Self {
        self.button_label = Some(label.into());
        self
    }

    pub fn for_frame(self: &Arc<Self>, frame: FrameRef) -> FrameRenderer {
        FrameRenderer { frame, log: Arc::clone(self) }
    }

    pub fn add_container(&self, frame: FrameRef, dom_id: impl Into<String>) {
        self.containers.insert((frame, dom_id.into()));
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.lock().clone()
    }

    /// Every panel or popup write, in order.
    pub fn shown(&self) -> Vec<PanelView> {
        self.lock().iter().filter_map(RenderEvent::shown).cloned().collect()
    }

    pub fn shown_in(&self, frame: FrameRef) -> Vec<PanelView> {
        self.lock()
            .iter()
            .filter(|e| e.frame() == frame)
            .filter_map(RenderEvent::shown)
            .cloned()
            .collect()
    }

    pub fn buttons(&self) -> Vec<ButtonView> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                RenderEvent::Button { view, .. } => Some(view.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: RenderEvent) {
        debug!("Render {:?}", event);
        self.lock().push(event);
    }

    fn has_button(&self, frame: FrameRef, id: SessionId) -> bool {
        self.lock()
            .iter()
            .any(|e| matches!(e, RenderEvent::Button { frame: f, view } if *f == frame && view.id == id))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RenderEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// [`Renderer`] for one frame, writing into the shared log.
pub struct FrameRenderer {
    frame: FrameRef,
    log: Arc<RecordingRenderer>,
}

impl Renderer for FrameRenderer {
    fn container_exists(&self, dom_id: &str) -> bool {
        self.log.containers.contains(&(self.frame, dom_id.to_string()))
    }

    fn create_button_container(&self) -> Option<String> {
        let n = self.log.next_container.fetch_add(1, Ordering::SeqCst) + 1;
        let dom_id = format!("iframe-button-{}", n);
        self.log.add_container(self.frame, dom_id.clone());
        Some(dom_id)
    }

    fn render_button(&self, view: &ButtonView) {
        self.log.record(RenderEvent::Button { frame: self.frame, view: view.clone() });
    }

    fn render_panel(&self, view: &PanelView) -> bool {
        if !self.log.has_button(self.frame, view.id) {
            return false;
        }
        self.log.record(RenderEvent::Panel { frame: self.frame, view: view.clone() });
        true
    }

    fn hide_panel(&self, id: SessionId) {
        self.log.record(RenderEvent::Hide { frame: self.frame, id });
    }

    fn write_popup(&self, popup: PopupRef, title: &str, view: &PanelView) {
        self.log.record(RenderEvent::Popup {
            frame: self.frame,
            popup,
            title: title.to_string(),
            view: view.clone(),
        });
    }

    fn localized_text(&self, kind: TextKind) -> Option<String> {
        match kind {
            TextKind::ButtonLabel => self.log.button_label.clone(),
            TextKind::Header | TextKind::Footer => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adchoices_core::Position;
    use adchoices_registry::CloseAction;

    fn panel(id: u32) -> PanelView {
        PanelView {
            id: SessionId::new(id),
            position: Position::TopRight,
            header: None,
            publisher_info: None,
            footer: None,
            items: vec![],
            close_button: true,
            close_action: CloseAction::HidePanel,
        }
    }

    #[test]
    fn panel_needs_button_in_same_frame() {
        let log = Arc::new(RecordingRenderer::new());
        let a = log.for_frame(FrameRef::new(1));
        let b = log.for_frame(FrameRef::new(2));
        assert!(!a.render_panel(&panel(5)));

        a.render_button(&ButtonView {
            id: SessionId::new(5),
            dom_id: "x".into(),
            position: Position::TopRight,
            label: "AdChoices".into(),
        });
        assert!(!b.render_panel(&panel(5)));
        assert!(a.render_panel(&panel(5)));
        assert_eq!(log.shown_in(FrameRef::new(1)).len(), 1);
        assert!(log.shown_in(FrameRef::new(2)).is_empty());
    }

    #[test]
    fn containers_are_per_frame() {
        let log = Arc::new(RecordingRenderer::new());
        let a = log.for_frame(FrameRef::new(1));
        let b = log.for_frame(FrameRef::new(2));
        let created = a.create_button_container().unwrap();
        assert_eq!(created, "iframe-button-1");
        assert!(a.container_exists(&created));
        assert!(!b.container_exists(&created));
    }
}
