//! Simulated browsing-context tree
//!
//! A `World` is a fixed set of frames, each optionally running its own
//! `AdChoices` engine behind a [`SimHost`]. Cross-frame effects go through a
//! single unbounded event queue:
//!
//! - `post_message` enqueues a [`WorldEvent::Message`] for the target frame
//! - `set_timeout` spawns a tokio sleep that enqueues a [`WorldEvent::Timer`]
//!
//! [`World::run_until_idle`] is the only consumer. It dispatches events one at
//! a time until the queue is drained and no timer is live, so engines never
//! run concurrently and never see a message while handling another.

use crate::renderer::RecordingRenderer;
use adchoices_core::{AdChoicesConfig, Error, FrameRef, RawItem, Result, SessionId};
use adchoices_host::{FrameHost, PopupRef, Timer, TimerHandle};
use adchoices_registry::AdChoices;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn yes() -> bool {
    true
}

/// One simulated window or iframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub id: u64,
    /// Absent for a top window.
    #[serde(default)]
    pub parent: Option<u64>,
    /// Set for popups opened by another frame.
    #[serde(default)]
    pub opener: Option<u64>,
    pub origin: String,
    /// `false` makes `location.href` read as undefined.
    #[serde(default = "yes")]
    pub href: bool,
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the library is loaded in this frame.
    #[serde(default = "yes")]
    pub library: bool,
    #[serde(default = "yes")]
    pub post_message: bool,
    #[serde(default)]
    pub popup_blocked: bool,
    /// Element ids present in the document for button placement.
    #[serde(default)]
    pub containers: Vec<String>,
}

impl FrameSpec {
    pub fn new(id: u64, origin: impl Into<String>) -> Self {
        Self {
            id,
            parent: None,
            opener: None,
            origin: origin.into(),
            href: true,
            name: None,
            library: true,
            post_message: true,
            popup_blocked: false,
            containers: Vec::new(),
        }
    }

    pub fn child_of(mut self, parent: u64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn without_library(mut self) -> Self {
        self.library = false;
        self
    }

    pub fn without_post_message(mut self) -> Self {
        self.post_message = false;
        self
    }

    pub fn with_container(mut self, dom_id: impl Into<String>) -> Self {
        self.containers.push(dom_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn frame(&self) -> FrameRef {
        FrameRef::new(self.id)
    }
}

/// An event waiting in the world queue.
#[derive(Debug, Clone)]
pub enum WorldEvent {
    Message { target: FrameRef, source: FrameRef, payload: String },
    Timer { frame: FrameRef, handle: TimerHandle, timer: Timer },
}

/// A popup opened by some frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupRecord {
    pub popup: PopupRef,
    pub opener: FrameRef,
    pub name: String,
    pub closed: bool,
}

/// Items a frame still holds for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub frame: FrameRef,
    pub session: SessionId,
    pub titles: Vec<String>,
}

pub(crate) struct WorldInner {
    frames: HashMap<FrameRef, FrameSpec>,
    engines: HashMap<FrameRef, Arc<AdChoices>>,
    names: DashMap<FrameRef, String>,
    renderer: Arc<RecordingRenderer>,
    tx: mpsc::UnboundedSender<WorldEvent>,
    timers: DashMap<TimerHandle, CancellationToken>,
    popups: DashMap<PopupRef, PopupRecord>,
    next_id: AtomicU64,
    runtime: Handle,
}

impl WorldInner {
    fn spec(&self, frame: FrameRef) -> Result<&FrameSpec> {
        self.frames.get(&frame).ok_or(Error::FrameNotFound(frame.get()))
    }

    fn same_origin(&self, from: FrameRef, target: FrameRef) -> Result<bool> {
        Ok(self.spec(from)?.origin == self.spec(target)?.origin)
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn enqueue(&self, event: WorldEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::Internal("world event queue closed".into()))
    }

    fn arm_timer(&self, frame: FrameRef, delay: Duration, timer: Timer) -> TimerHandle {
        let handle = TimerHandle(self.next());
        let token = CancellationToken::new();
        self.timers.insert(handle, token.clone());
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(WorldEvent::Timer { frame, handle, timer });
                }
            }
        });
        debug!("{} armed {:?} ({:?}) for {}ms", frame, handle, timer, delay.as_millis());
        handle
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        if let Some((_, token)) = self.timers.remove(&handle) {
            token.cancel();
        }
    }

    fn open_popup(&self, opener: FrameRef, name: &str) -> Result<PopupRef> {
        if self.spec(opener)?.popup_blocked {
            return Err(Error::access_denied("window.open blocked"));
        }
        let popup = PopupRef(self.next());
        self.popups.insert(
            popup,
            PopupRecord { popup, opener, name: name.to_string(), closed: false },
        );
        Ok(popup)
    }
}

/// [`FrameHost`] for one simulated frame.
pub struct SimHost {
    world: Weak<WorldInner>,
    frame: FrameRef,
}

impl SimHost {
    fn world(&self) -> Result<Arc<WorldInner>> {
        self.world
            .upgrade()
            .ok_or_else(|| Error::Internal("world dropped".into()))
    }

    /// Cross-window reads require the same origin.
    fn readable(&self, world: &WorldInner, target: FrameRef, what: &str) -> Result<()> {
        if world.same_origin(self.frame, target)? {
            Ok(())
        } else {
            Err(Error::access_denied(format!("{} of {} from {}", what, target, self.frame)))
        }
    }
}

impl FrameHost for SimHost {
    fn current(&self) -> FrameRef {
        self.frame
    }

    fn parent(&self, frame: FrameRef) -> Result<FrameRef> {
        let world = self.world()?;
        Ok(world.spec(frame)?.parent.map(FrameRef::new).unwrap_or(frame))
    }

    fn opener(&self, frame: FrameRef) -> Option<FrameRef> {
        let world = self.world().ok()?;
        let opener = world.spec(frame).ok()?.opener;
        opener.map(FrameRef::new)
    }

    fn location_href(&self, frame: FrameRef) -> Result<Option<String>> {
        let world = self.world()?;
        self.readable(&world, frame, "location")?;
        let spec = world.spec(frame)?;
        Ok(spec.href.then(|| format!("{}/frame/{}", spec.origin, spec.id)))
    }

    fn has_library(&self, frame: FrameRef) -> Result<bool> {
        let world = self.world()?;
        self.readable(&world, frame, "library")?;
        Ok(world.spec(frame)?.library)
    }

    fn window_name(&self, frame: FrameRef) -> Result<Option<String>> {
        let world = self.world()?;
        if frame != self.frame {
            self.readable(&world, frame, "name")?;
        }
        Ok(world.names.get(&frame).map(|n| n.value().clone()))
    }

    fn read_registry(&self, frame: FrameRef, id: SessionId) -> Result<Vec<RawItem>> {
        let world = self.world()?;
        self.readable(&world, frame, "registry")?;
        let engine = world
            .engines
            .get(&frame)
            .ok_or_else(|| Error::access_denied(format!("no library in {}", frame)))?;
        Ok(engine.registry().get_by_id(id))
    }

    fn supports_post_message(&self) -> bool {
        self.world()
            .ok()
            .and_then(|w| w.spec(self.frame).ok().map(|s| s.post_message))
            .unwrap_or(false)
    }

    fn post_message(&self, target: FrameRef, payload: String) -> Result<()> {
        let world = self.world()?;
        world.spec(target)?;
        world.enqueue(WorldEvent::Message { target, source: self.frame, payload })
    }

    fn open_popup(&self, name: &str, _features: &str) -> Result<PopupRef> {
        self.world()?.open_popup(self.frame, name)
    }

    fn open_blank(&self) -> Option<PopupRef> {
        self.world().ok()?.open_popup(self.frame, "about:blank").ok()
    }

    fn close_popup(&self, popup: PopupRef) {
        if let Ok(world) = self.world() {
            if let Some(mut record) = world.popups.get_mut(&popup) {
                record.closed = true;
            }
        }
    }

    fn set_timeout(&self, delay: Duration, timer: Timer) -> TimerHandle {
        match self.world() {
            Ok(world) => world.arm_timer(self.frame, delay, timer),
            Err(e) => {
                warn!("Timer {:?} not armed: {}", timer, e);
                TimerHandle(0)
            }
        }
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        if let Ok(world) = self.world() {
            world.cancel_timer(handle);
        }
    }
}

pub struct World {
    inner: Arc<WorldInner>,
    rx: Mutex<mpsc::UnboundedReceiver<WorldEvent>>,
}

impl World {
    /// Build the frame tree. Must be called from inside a tokio runtime.
    pub fn new(frames: Vec<FrameSpec>, config: AdChoicesConfig) -> Result<Self> {
        Self::with_renderer(frames, config, RecordingRenderer::new())
    }

    pub fn with_renderer(
        frames: Vec<FrameSpec>,
        config: AdChoicesConfig,
        renderer: RecordingRenderer,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("world needs a tokio runtime: {}", e)))?;
        let frames = validate(frames)?;
        let renderer = Arc::new(renderer);
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|weak: &Weak<WorldInner>| {
            let mut engines = HashMap::new();
            let names = DashMap::new();
            for spec in frames.values() {
                for dom_id in &spec.containers {
                    renderer.add_container(spec.frame(), dom_id.clone());
                }
                if let Some(name) = &spec.name {
                    names.insert(spec.frame(), name.clone());
                }
                if !spec.library {
                    continue;
                }
                let host = Arc::new(SimHost { world: weak.clone(), frame: spec.frame() });
                let frame_renderer = Arc::new(renderer.for_frame(spec.frame()));
                engines.insert(
                    spec.frame(),
                    Arc::new(AdChoices::new(host, frame_renderer, config.clone())),
                );
            }
            WorldInner {
                frames,
                engines,
                names,
                renderer: renderer.clone(),
                tx,
                timers: DashMap::new(),
                popups: DashMap::new(),
                next_id: AtomicU64::new(0),
                runtime,
            }
        });

        info!(
            "World built: {} frames, {} running the library",
            inner.frames.len(),
            inner.engines.len()
        );
        Ok(Self { inner, rx: Mutex::new(rx) })
    }

    /// The engine running in `frame`.
    pub fn engine(&self, frame: u64) -> Result<Arc<AdChoices>> {
        self.inner
            .engines
            .get(&FrameRef::new(frame))
            .cloned()
            .ok_or(Error::FrameNotFound(frame))
    }

    /// A host bound to `frame`, for probing the tree as that frame sees it.
    pub fn host(&self, frame: u64) -> SimHost {
        SimHost { world: Arc::downgrade(&self.inner), frame: FrameRef::new(frame) }
    }

    pub fn renderer(&self) -> &Arc<RecordingRenderer> {
        &self.inner.renderer
    }

    pub fn add_container(&self, frame: u64, dom_id: impl Into<String>) {
        self.inner.renderer.add_container(FrameRef::new(frame), dom_id);
    }

    pub fn set_window_name(&self, frame: u64, name: impl Into<String>) -> Result<()> {
        let frame = FrameRef::new(frame);
        self.inner.spec(frame)?;
        self.inner.names.insert(frame, name.into());
        Ok(())
    }

    pub fn popups(&self) -> Vec<PopupRecord> {
        let mut popups: Vec<_> = self.inner.popups.iter().map(|p| p.value().clone()).collect();
        popups.sort_by_key(|p| p.popup.0);
        popups
    }

    /// Every live session in every frame, ordered by frame then id.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions = Vec::new();
        for (frame, engine) in &self.inner.engines {
            for session in engine.registry().ids() {
                let titles = engine
                    .registry()
                    .get_by_id(session)
                    .into_iter()
                    .filter_map(|item| item.title)
                    .collect();
                sessions.push(SessionSnapshot { frame: *frame, session, titles });
            }
        }
        sessions.sort_by_key(|s| (s.frame, s.session));
        sessions
    }

    pub fn live_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Dispatch queued events until the queue is empty and no timer can still
    /// fire. Returns how many events were dispatched.
    pub async fn run_until_idle(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dispatched = 0;
        loop {
            let event = match rx.try_recv() {
                Ok(event) => event,
                Err(_) if self.inner.timers.is_empty() => break,
                Err(_) => match rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };
            if self.dispatch(event) {
                dispatched += 1;
            }
        }
        debug!("World idle after {} events", dispatched);
        dispatched
    }

    fn dispatch(&self, event: WorldEvent) -> bool {
        match event {
            WorldEvent::Message { target, source, payload } => {
                let Some(engine) = self.inner.engines.get(&target).cloned() else {
                    debug!("{} has no library, message from {} dropped", target, source);
                    return false;
                };
                if let Err(e) = engine.handle_message(source, &payload) {
                    debug!("{} rejected message from {}: {}", target, source, e);
                }
                true
            }
            WorldEvent::Timer { frame, handle, timer } => {
                if self.inner.timers.remove(&handle).is_none() {
                    debug!("{:?} in {} was cleared, dropping", handle, frame);
                    return false;
                }
                let Some(engine) = self.inner.engines.get(&frame).cloned() else {
                    return false;
                };
                if let Err(e) = engine.on_timer(timer) {
                    warn!("{:?} in {} failed: {}", timer, frame, e);
                }
                true
            }
        }
    }
}

fn validate(frames: Vec<FrameSpec>) -> Result<HashMap<FrameRef, FrameSpec>> {
    let mut map = HashMap::new();
    for spec in frames {
        if map.insert(spec.frame(), spec.clone()).is_some() {
            return Err(Error::ConfigError(format!("duplicate frame id {}", spec.id)));
        }
    }
    for spec in map.values() {
        for link in [spec.parent, spec.opener].into_iter().flatten() {
            if !map.contains_key(&FrameRef::new(link)) {
                return Err(Error::ConfigError(format!(
                    "frame {} refers to unknown frame {}",
                    spec.id, link
                )));
            }
        }
    }
    // Parent links must end at a top window.
    for spec in map.values() {
        let mut current = spec;
        for _ in 0..=map.len() {
            match current.parent {
                Some(parent) => current = &map[&FrameRef::new(parent)],
                None => break,
            }
        }
        if current.parent.is_some() {
            return Err(Error::ConfigError(format!("frame {} has a cyclic parent chain", spec.id)));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adchoices_core::AccessClass;
    use adchoices_host::probe;

    fn tree() -> Vec<FrameSpec> {
        vec![
            FrameSpec::new(1, "https://pub.example"),
            FrameSpec::new(2, "https://ads.example").child_of(1),
            FrameSpec { href: false, ..FrameSpec::new(3, "https://ads.example").child_of(2) },
            FrameSpec::new(4, "https://ads.example").child_of(3).without_library(),
        ]
    }

    #[tokio::test]
    async fn access_follows_origin() {
        let world = World::new(tree(), AdChoicesConfig::default()).unwrap();
        let host = world.host(4);
        assert!(host.location_href(FrameRef::new(1)).unwrap_err().is_access_denied());
        assert_eq!(host.location_href(FrameRef::new(3)).unwrap(), None);
        assert!(host.location_href(FrameRef::new(2)).unwrap().is_some());
        assert_eq!(probe(&host, FrameRef::new(2)), AccessClass::SameOriginFriendly);
        assert_eq!(probe(&host, FrameRef::new(3)), AccessClass::OpaqueForeign);
        assert_eq!(probe(&host, FrameRef::new(1)), AccessClass::OpaqueForeign);
        assert!(!host.is_top());
        assert!(world.host(1).is_top());
    }

    #[tokio::test]
    async fn frames_without_library_have_no_engine() {
        let world = World::new(tree(), AdChoicesConfig::default()).unwrap();
        assert!(world.engine(2).is_ok());
        assert!(matches!(world.engine(4), Err(Error::FrameNotFound(4))));
    }

    #[tokio::test]
    async fn rejects_bad_topology() {
        let dup = vec![FrameSpec::new(1, "a"), FrameSpec::new(1, "b")];
        assert!(matches!(World::new(dup, AdChoicesConfig::default()), Err(Error::ConfigError(_))));

        let dangling = vec![FrameSpec::new(1, "a").child_of(9)];
        assert!(World::new(dangling, AdChoicesConfig::default()).is_err());

        let cycle = vec![FrameSpec::new(1, "a").child_of(2), FrameSpec::new(2, "a").child_of(1)];
        assert!(World::new(cycle, AdChoicesConfig::default()).is_err());
    }

    #[test]
    fn needs_runtime() {
        assert!(matches!(
            World::new(tree(), AdChoicesConfig::default()),
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_dispatches() {
        let world = World::new(tree(), AdChoicesConfig::default()).unwrap();
        let host = world.host(2);
        let id = SessionId::new(1);
        let handle = host.set_timeout(Duration::from_millis(50), Timer::Discovery(id));
        assert_eq!(world.live_timers(), 1);
        host.clear_timeout(handle);
        assert_eq!(world.live_timers(), 0);
        assert_eq!(world.run_until_idle().await, 0);
    }

    #[tokio::test]
    async fn messages_to_frames_without_library_are_dropped() {
        let world = World::new(tree(), AdChoicesConfig::default()).unwrap();
        world.host(2).post_message(FrameRef::new(4), "{}".into()).unwrap();
        assert_eq!(world.run_until_idle().await, 0);
        assert!(world.host(2).post_message(FrameRef::new(99), "{}".into()).is_err());
    }
}
