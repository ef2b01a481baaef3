//! Window chain classification
//!
//! Walks outward from the current window to the top of the frame tree, tagging
//! every hop with how its outer window can be reached. Probing never fails:
//! any access error is itself the classification.

use crate::host::FrameHost;
use adchoices_core::{AccessClass, FrameRef};
use serde::Serialize;
use tracing::debug;

/// Guard against hosts reporting a cyclic parent relation.
const MAX_CHAIN_HOPS: usize = 64;

/// One hop outward: `window` and the window it nests in (or was opened by).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameDescriptor {
    pub window: FrameRef,
    /// `None` for the top window.
    pub parent: Option<FrameRef>,
    pub access: AccessClass,
    /// This hop follows `window.opener` rather than `window.parent`.
    pub via_opener: bool,
}

impl FrameDescriptor {
    /// Nothing to collect: the top window, or a hop that points back at the
    /// collecting window.
    pub fn is_self_hop(&self, current: FrameRef) -> bool {
        match self.parent {
            None => true,
            Some(parent) => parent == current,
        }
    }
}

/// Ordered hops from the current window outward. Computed once per session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WindowChain {
    entries: Vec<FrameDescriptor>,
}

impl WindowChain {
    pub fn entries(&self) -> &[FrameDescriptor] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameDescriptor> {
        self.entries.iter()
    }

    /// 1-based, innermost hop first.
    pub fn get(&self, index: usize) -> Option<&FrameDescriptor> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Access class of `target` as seen from the current window.
pub fn probe(host: &dyn FrameHost, target: FrameRef) -> AccessClass {
    match host.location_href(target) {
        Ok(Some(_)) => match host.has_library(target) {
            Ok(true) => AccessClass::SameOriginFriendly,
            _ => AccessClass::PostMessageRequired,
        },
        Ok(None) | Err(_) => AccessClass::OpaqueForeign,
    }
}

/// Access class of `window`'s parent.
pub fn classify(host: &dyn FrameHost, window: FrameRef) -> AccessClass {
    match host.parent(window) {
        Ok(parent) => probe(host, parent),
        Err(e) => {
            debug!("Parent of {} unreadable: {}", window, e);
            AccessClass::OpaqueForeign
        }
    }
}

/// Build the chain for the current window, plus one trailing opener hop when
/// the window was opened as a popup.
pub fn build_chain(host: &dyn FrameHost) -> WindowChain {
    let current = host.current();
    let mut entries = Vec::new();
    let mut window = current;

    loop {
        let parent = match host.parent(window) {
            Ok(parent) => parent,
            Err(e) => {
                debug!("Chain stops at {}: {}", window, e);
                entries.push(FrameDescriptor {
                    window,
                    parent: None,
                    access: AccessClass::OpaqueForeign,
                    via_opener: false,
                });
                break;
            }
        };
        if parent == window {
            entries.push(FrameDescriptor {
                window,
                parent: None,
                access: probe(host, window),
                via_opener: false,
            });
            break;
        }
        entries.push(FrameDescriptor {
            window,
            parent: Some(parent),
            access: probe(host, parent),
            via_opener: false,
        });
        if entries.len() >= MAX_CHAIN_HOPS {
            debug!("Chain from {} exceeds {} hops, truncating", current, MAX_CHAIN_HOPS);
            break;
        }
        window = parent;
    }

    if let Some(opener) = host.opener(current) {
        entries.push(FrameDescriptor {
            window: current,
            parent: Some(opener),
            access: probe(host, opener),
            via_opener: true,
        });
    }

    debug!(
        "Window chain for {}: {}",
        current,
        entries
            .iter()
            .map(|e| format!("{}->{}", e.window, e.access))
            .collect::<Vec<_>>()
            .join(", ")
    );
    WindowChain { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PopupRef, Timer, TimerHandle};
    use adchoices_core::{Error, RawItem, Result, SessionId};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Frame {
        parent: u64,
        origin: &'static str,
        href: bool,
        library: bool,
        opener: Option<u64>,
    }

    struct FakeHost {
        current: u64,
        frames: HashMap<u64, Frame>,
        broken_parent: Option<u64>,
    }

    impl FakeHost {
        fn frame(&self, f: FrameRef) -> Result<&Frame> {
            self.frames.get(&f.get()).ok_or(Error::FrameNotFound(f.get()))
        }

        fn same_origin(&self, f: FrameRef) -> Result<bool> {
            Ok(self.frame(f)?.origin == self.frame(self.current())?.origin)
        }
    }

    impl FrameHost for FakeHost {
        fn current(&self) -> FrameRef {
            FrameRef::new(self.current)
        }
        fn parent(&self, f: FrameRef) -> Result<FrameRef> {
            if self.broken_parent == Some(f.get()) {
                return Err(Error::access_denied("parent"));
            }
            Ok(FrameRef::new(self.frame(f)?.parent))
        }
        fn opener(&self, f: FrameRef) -> Option<FrameRef> {
            self.frame(f).ok().and_then(|fr| fr.opener).map(FrameRef::new)
        }
        fn location_href(&self, f: FrameRef) -> Result<Option<String>> {
            if !self.same_origin(f)? {
                return Err(Error::access_denied("location"));
            }
            Ok(self.frame(f)?.href.then(|| "http://x/".to_string()))
        }
        fn has_library(&self, f: FrameRef) -> Result<bool> {
            if !self.same_origin(f)? {
                return Err(Error::access_denied("library"));
            }
            Ok(self.frame(f)?.library)
        }
        fn window_name(&self, _: FrameRef) -> Result<Option<String>> {
            Ok(None)
        }
        fn read_registry(&self, _: FrameRef, _: SessionId) -> Result<Vec<RawItem>> {
            Ok(Vec::new())
        }
        fn supports_post_message(&self) -> bool {
            true
        }
        fn post_message(&self, _: FrameRef, _: String) -> Result<()> {
            Ok(())
        }
        fn open_popup(&self, _: &str, _: &str) -> Result<PopupRef> {
            Ok(PopupRef(0))
        }
        fn open_blank(&self) -> Option<PopupRef> {
            None
        }
        fn close_popup(&self, _: PopupRef) {}
        fn set_timeout(&self, _: Duration, _: Timer) -> TimerHandle {
            TimerHandle(0)
        }
        fn clear_timeout(&self, _: TimerHandle) {}
    }

    fn frame(parent: u64, origin: &'static str, library: bool) -> Frame {
        Frame { parent, origin, href: true, library, opener: None }
    }

    /// top(1, pub) <- 2 (pub, lib) <- 3 (ads) <- 4 (ads, current)
    fn nested() -> FakeHost {
        let mut frames = HashMap::new();
        frames.insert(1, frame(1, "pub", true));
        frames.insert(2, frame(1, "pub", true));
        frames.insert(3, frame(2, "ads", true));
        frames.insert(4, frame(3, "ads", true));
        FakeHost { current: 4, frames, broken_parent: None }
    }

    #[test]
    fn probe_levels() {
        let mut host = nested();
        assert_eq!(probe(&host, FrameRef::new(3)), AccessClass::SameOriginFriendly);
        assert_eq!(probe(&host, FrameRef::new(2)), AccessClass::OpaqueForeign);
        host.frames.get_mut(&3).unwrap().library = false;
        assert_eq!(probe(&host, FrameRef::new(3)), AccessClass::PostMessageRequired);
        host.frames.get_mut(&3).unwrap().href = false;
        assert_eq!(probe(&host, FrameRef::new(3)), AccessClass::OpaqueForeign);
        assert_eq!(probe(&host, FrameRef::new(99)), AccessClass::OpaqueForeign);
    }

    #[test]
    fn classify_looks_at_the_parent() {
        let host = nested();
        assert_eq!(classify(&host, FrameRef::new(4)), AccessClass::SameOriginFriendly);
        assert_eq!(classify(&host, FrameRef::new(3)), AccessClass::OpaqueForeign);
    }

    #[test]
    fn chain_walks_to_top() {
        let host = nested();
        let chain = build_chain(&host);
        assert_eq!(chain.len(), 4);
        let first = chain.get(1).unwrap();
        assert_eq!(first.window, FrameRef::new(4));
        assert_eq!(first.parent, Some(FrameRef::new(3)));
        assert_eq!(first.access, AccessClass::SameOriginFriendly);
        assert_eq!(chain.get(2).unwrap().access, AccessClass::OpaqueForeign);
        let top = chain.get(4).unwrap();
        assert_eq!(top.window, FrameRef::new(1));
        assert_eq!(top.parent, None);
        assert!(top.is_self_hop(host.current()));
        assert!(chain.get(0).is_none());
        assert!(chain.get(5).is_none());
    }

    #[test]
    fn top_window_chain_is_single_self_hop() {
        let mut host = nested();
        host.current = 1;
        let chain = build_chain(&host);
        assert_eq!(chain.len(), 1);
        assert!(chain.get(1).unwrap().is_self_hop(FrameRef::new(1)));
        assert!(host.is_top());
    }

    #[test]
    fn opener_adds_trailing_hop() {
        let mut host = nested();
        host.frames.insert(7, Frame { parent: 7, origin: "ads", href: true, library: true, opener: Some(4) });
        host.current = 7;
        let chain = build_chain(&host);
        assert_eq!(chain.len(), 2);
        let hop = chain.get(2).unwrap();
        assert!(hop.via_opener);
        assert_eq!(hop.window, FrameRef::new(7));
        assert_eq!(hop.parent, Some(FrameRef::new(4)));
        assert_eq!(hop.access, AccessClass::SameOriginFriendly);
    }

    #[test]
    fn unreadable_parent_ends_chain() {
        let mut host = nested();
        host.broken_parent = Some(3);
        let chain = build_chain(&host);
        assert_eq!(chain.len(), 2);
        let last = chain.get(2).unwrap();
        assert_eq!(last.window, FrameRef::new(3));
        assert_eq!(last.parent, None);
        assert_eq!(last.access, AccessClass::OpaqueForeign);
    }

    #[test]
    fn cyclic_parents_are_truncated() {
        let mut frames = HashMap::new();
        frames.insert(1, frame(2, "a", true));
        frames.insert(2, frame(1, "a", true));
        let host = FakeHost { current: 1, frames, broken_parent: None };
        assert_eq!(build_chain(&host).len(), MAX_CHAIN_HOPS);
    }
}
