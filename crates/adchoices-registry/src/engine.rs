//! Aggregation engine — collects disclosure items along the window chain
//!
//! One `AdChoices` instance runs per browsing context. A collection round
//! moves a session through
//!
//!   Idle → ChainBuilt → SyncCollecting → (AsyncPending) → Merged → Presented
//!
//! Friendly ancestors are read synchronously. Everything else is asked over
//! postMessage; the round then waits for either every reply or the pull
//! timeout, whichever comes first. Only message and timer events move an
//! `AsyncPending` round forward, and a `Presented` round ignores late replies.

use crate::player::{Player, Renderer, ShowTarget, TextKind};
use crate::registry::{Registry, Round};
use adchoices_core::{
    codec, AdChoicesConfig, DisclosureItem, Error, FrameRef, PlayerOptions, RawItem,
    Registration, Result, SessionId, WireMessage,
};
use adchoices_host::{build_chain, FrameDescriptor, FrameHost, PopupRef, Timer, WindowChain};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

const DEFAULT_BUTTON_LABEL: &str = "AdChoices";

/// What started a collection round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Click on the AdChoices button; may open a popup.
    UserAction,
    /// Scheduled chain-init discovery; never opens windows.
    Discovery,
}

/// Commands the panel markup can issue back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerCommand {
    Show,
    Hide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Injected,
    /// Container missing; a retry timer is armed.
    Retrying,
    GaveUp,
    /// Top window with no container: nothing to place.
    Skipped,
}

/// Outcome of a counter decrement.
enum Countdown {
    Ignored,
    Waiting(usize),
    Done(Option<adchoices_host::TimerHandle>),
}

pub struct AdChoices {
    registry: Registry,
    host: Arc<dyn FrameHost>,
    renderer: Arc<dyn Renderer>,
    config: AdChoicesConfig,
    publisher_info: OnceLock<String>,
}

impl AdChoices {
    pub fn new(host: Arc<dyn FrameHost>, renderer: Arc<dyn Renderer>, config: AdChoicesConfig) -> Self {
        Self {
            registry: Registry::new(config.registry.id_space),
            host,
            renderer,
            config,
            publisher_info: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn host(&self) -> &dyn FrameHost {
        self.host.as_ref()
    }

    pub fn config(&self) -> &AdChoicesConfig {
        &self.config
    }

    pub fn frame(&self) -> FrameRef {
        self.host.current()
    }

    // -----------------------------------------------------------------------
    // Registration API
    // -----------------------------------------------------------------------

    pub fn register(&self, id: SessionId, registration: impl Into<Registration>) {
        self.registry.register(id, registration);
    }

    /// Register from the loose argument object an ad tag passes in.
    pub fn register_json(&self, id: SessionId, args: &serde_json::Value) -> Result<()> {
        let registration: Registration = serde_json::from_value(args.clone())?;
        self.registry.register(id, registration);
        Ok(())
    }

    pub fn unregister(&self, id: SessionId) {
        self.registry.unregister(id);
    }

    pub fn generate_id(&self) -> Result<SessionId> {
        self.registry.generate_id()
    }

    /// First call wins.
    pub fn set_publisher_info(&self, info: impl Into<String>) {
        if self.publisher_info.set(info.into()).is_err() {
            debug!("Publisher info already set, ignoring");
        }
    }

    pub fn publisher_info(&self) -> Option<&str> {
        self.publisher_info.get().map(String::as_str)
    }

    /// Prepend ancestor items and cancel the session's pending discovery
    /// round, since ancestor data has arrived another way.
    pub fn register_parent_items(&self, id: SessionId, items: Vec<RawItem>) -> bool {
        let discovery = self.registry.with_session(id, |s| s.discovery_timer.take()).flatten();
        if let Some(handle) = discovery {
            self.host.clear_timeout(handle);
            debug!("Cancelled discovery for ID {}: parent items arrived", id);
        }
        self.registry.prepend_items(id, items)
    }

    // -----------------------------------------------------------------------
    // Player
    // -----------------------------------------------------------------------

    pub fn create_player(&self, id: SessionId, options: PlayerOptions) -> Result<InjectOutcome> {
        info!("createPlayer called for ID {}", id);
        let player_options = self.registry.with_session_or_create(id, |s| {
            if options.dom_id.is_some() {
                s.dom_id = options.dom_id.clone();
            }
            PlayerOptions { dom_id: s.dom_id.clone(), ..options }
        });
        let player = Player::new(
            id,
            &player_options,
            self.config.presentation.default_position,
            self.publisher_info().map(String::from),
            self.config.presentation.max_inject_attempts,
        );
        self.registry.with_session(id, |s| s.player = Some(player));
        let outcome = self.inject(id)?;
        info!("AdPlayer created for ID {}", id);
        Ok(outcome)
    }

    /// Place the button, retrying on a timer while the container is missing.
    pub fn inject(&self, id: SessionId) -> Result<InjectOutcome> {
        let dom_id = self
            .registry
            .with_session(id, |s| s.player.as_ref().map(|p| p.dom_id.clone()))
            .ok_or(Error::SessionNotFound(id))?
            .ok_or(Error::PlayerNotFound(id))?;

        let dom_id = match dom_id {
            Some(dom_id) => Some(dom_id),
            None if self.host.is_top() => {
                debug!("No container for ID {} in top window, not injecting", id);
                return Ok(InjectOutcome::Skipped);
            }
            None => {
                let created = self.renderer.create_button_container();
                if let Some(created) = &created {
                    self.registry.with_session(id, |s| {
                        if let Some(p) = s.player.as_mut() {
                            p.dom_id = Some(created.clone());
                        }
                    });
                }
                created
            }
        };

        if let Some(dom_id) = dom_id.filter(|d| self.renderer.container_exists(d)) {
            let label = self
                .renderer
                .localized_text(TextKind::ButtonLabel)
                .unwrap_or_else(|| DEFAULT_BUTTON_LABEL.to_string());
            let view = self.registry.with_session(id, |s| {
                s.player.as_mut().map(|p| {
                    p.injected = true;
                    p.button_view(&dom_id, label)
                })
            });
            if let Some(view) = view.flatten() {
                self.renderer.render_button(&view);
            }
            return Ok(InjectOutcome::Injected);
        }

        let retry = self
            .registry
            .with_session(id, |s| s.player.as_mut().map(Player::note_missing_container))
            .flatten()
            .unwrap_or(false);
        if retry {
            self.host.set_timeout(self.config.inject_retry(), Timer::InjectRetry(id));
            Ok(InjectOutcome::Retrying)
        } else {
            debug!("Too many attempts to place the button for ID {}", id);
            Ok(InjectOutcome::GaveUp)
        }
    }

    /// Recompute the player's items from the registry and run `cmd`.
    pub fn player_cmd(&self, id: SessionId, cmd: PlayerCommand) -> Result<()> {
        self.registry
            .with_session(id, |s| match s.player.as_mut() {
                Some(player) => {
                    player.items = None;
                    apply_items(player, &s.items);
                    Ok(())
                }
                None => Err(Error::PlayerNotFound(id)),
            })
            .ok_or(Error::SessionNotFound(id))??;
        match cmd {
            PlayerCommand::Show => self.show(id),
            PlayerCommand::Hide => {
                self.renderer.hide_panel(id);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Aggregation
    // -----------------------------------------------------------------------

    /// Button click entry point.
    pub fn collect_privacy(&self, id: SessionId) -> Result<()> {
        self.collect(id, Trigger::UserAction)
    }

    pub fn collect(&self, id: SessionId, trigger: Trigger) -> Result<()> {
        let (opted_out, popup, has_items, round) = self
            .registry
            .with_session(id, |s| {
                s.player.as_ref().map(|p| {
                    (
                        s.items.iter().any(RawItem::opts_out_of_popup),
                        p.popup,
                        p.has_privacy_info(),
                        s.round,
                    )
                })
            })
            .ok_or(Error::SessionNotFound(id))?
            .ok_or(Error::PlayerNotFound(id))?;

        if trigger == Trigger::UserAction && !opted_out {
            if let Some(old) = popup {
                self.host.close_popup(old);
            }
            let fresh = self.open_popup();
            self.registry.with_session(id, |s| {
                if let Some(p) = s.player.as_mut() {
                    p.popup = fresh;
                }
            });
        }

        if round == Round::AsyncPending {
            debug!("Collection for ID {} already waiting on replies", id);
            return Ok(());
        }

        if has_items {
            self.set_round(id, Round::Merged);
            return self.submit_privacy(id).map(|_| ());
        }

        let chain = self.window_chain(id)?;
        self.registry.with_session(id, |s| {
            s.round = Round::SyncCollecting;
            s.collected.clear();
            s.awaiting.clear();
        });

        let current = self.host.current();
        let mut pending = Vec::new();
        for (index, entry) in chain.iter().enumerate() {
            let hop = index + 1;
            if entry.is_self_hop(current) {
                continue;
            }
            if entry.access.needs_messaging() {
                pending.push((hop, entry.clone()));
                continue;
            }
            let items = self.collect_friendly(id, entry);
            self.stash(id, hop, items);
        }

        if pending.is_empty() {
            return self.merge_and_submit(id);
        }
        if self.host.supports_post_message() {
            self.init_by_post_message(id, &pending)
        } else {
            self.init_by_window_name(id, &pending)
        }
    }

    /// Memoized per session; topology does not change once computed.
    pub fn window_chain(&self, id: SessionId) -> Result<WindowChain> {
        if let Some(chain) = self
            .registry
            .with_session(id, |s| s.chain.clone())
            .ok_or(Error::SessionNotFound(id))?
        {
            return Ok(chain);
        }
        let chain = build_chain(self.host.as_ref());
        self.registry.with_session(id, |s| {
            s.chain = Some(chain.clone());
            s.round = Round::ChainBuilt;
        });
        Ok(chain)
    }

    /// Name token on the child window first, then the parent's registry.
    fn collect_friendly(&self, id: SessionId, entry: &FrameDescriptor) -> Vec<RawItem> {
        let from_name = self.items_from_name(entry.window);
        if !from_name.is_empty() {
            return from_name;
        }
        let Some(parent) = entry.parent else {
            return Vec::new();
        };
        self.host.read_registry(parent, id).unwrap_or_else(|e| {
            debug!("Direct read of {} for ID {} failed: {}", parent, id, e);
            Vec::new()
        })
    }

    fn items_from_name(&self, window: FrameRef) -> Vec<RawItem> {
        match self.host.window_name(window) {
            Ok(Some(name)) => codec::items_from_window_name(&name),
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!("Name of {} unreadable: {}", window, e);
                Vec::new()
            }
        }
    }

    /// Send one pull per ancestor and arm the timeout. Each target is
    /// awaited once, under the innermost hop that reaches it.
    fn init_by_post_message(&self, id: SessionId, pending: &[(usize, FrameDescriptor)]) -> Result<()> {
        let mut awaiting = HashMap::new();
        let mut targets = Vec::new();
        for (hop, entry) in pending {
            if let Some(parent) = entry.parent {
                if awaiting.insert(parent, *hop).is_none() {
                    targets.push(parent);
                }
            }
        }
        if targets.is_empty() {
            return self.merge_and_submit(id);
        }
        let timeout = self.host.set_timeout(self.config.pull_timeout(), Timer::PullTimeout(id));
        self.registry.with_session(id, |s| {
            s.awaiting = awaiting;
            s.pull_timeout = Some(timeout);
            s.round = Round::AsyncPending;
        });

        let payload = WireMessage::pull(id).to_wire();
        let mut failed = Vec::new();
        for target in &targets {
            if let Err(e) = self.host.post_message(*target, payload.clone()) {
                debug!("Pull for ID {} to {} not sent: {}", id, target, e);
                failed.push(*target);
            }
        }
        debug!("Sent {} pull requests for ID {}", targets.len() - failed.len(), id);
        for target in failed {
            self.check_and_reduce_post_message_counter(id, target)?;
        }
        Ok(())
    }

    /// No postMessage: read each ancestor's items from the window name and
    /// present right away.
    fn init_by_window_name(&self, id: SessionId, pending: &[(usize, FrameDescriptor)]) -> Result<()> {
        for (hop, entry) in pending {
            let items = self.items_from_name(entry.window);
            self.stash(id, *hop, items);
        }
        self.merge_and_submit(id)
    }

    /// Keep a hop's items until the round merges.
    fn stash(&self, id: SessionId, hop: usize, items: Vec<RawItem>) {
        if items.is_empty() {
            return;
        }
        self.registry.with_session(id, |s| {
            s.collected.insert(hop, items);
        });
    }

    /// Record a pull reply from `source`. Returns `false` unless `source` was
    /// sent a pull this round and has not answered yet.
    pub(crate) fn accept_reply(&self, id: SessionId, source: FrameRef, items: Vec<RawItem>) -> bool {
        self.registry
            .with_session(id, |s| {
                if s.round != Round::AsyncPending {
                    return false;
                }
                let Some(&hop) = s.awaiting.get(&source) else {
                    return false;
                };
                if !items.is_empty() {
                    s.collected.insert(hop, items);
                }
                true
            })
            .unwrap_or(false)
    }

    /// `source` is settled for this round. The last one cancels the timeout,
    /// merges and submits. Sources not awaited do not count.
    pub fn check_and_reduce_post_message_counter(&self, id: SessionId, source: FrameRef) -> Result<bool> {
        let countdown = self
            .registry
            .with_session(id, |s| {
                if s.round != Round::AsyncPending {
                    return Countdown::Ignored;
                }
                if s.awaiting.remove(&source).is_none() {
                    return Countdown::Ignored;
                }
                if !s.awaiting.is_empty() {
                    return Countdown::Waiting(s.awaiting.len());
                }
                s.round = Round::Merged;
                Countdown::Done(s.pull_timeout.take())
            })
            .unwrap_or(Countdown::Ignored);

        match countdown {
            Countdown::Ignored => {
                debug!("Reply for ID {} from {} not awaited, ignoring", id, source);
                Ok(false)
            }
            Countdown::Waiting(left) => {
                debug!("ID {} waiting on {} more replies", id, left);
                Ok(false)
            }
            Countdown::Done(timeout) => {
                if let Some(handle) = timeout {
                    self.host.clear_timeout(handle);
                }
                self.merge_collected(id);
                self.submit_privacy(id)
            }
        }
    }

    fn merge_and_submit(&self, id: SessionId) -> Result<()> {
        self.set_round(id, Round::Merged);
        self.merge_collected(id);
        self.submit_privacy(id).map(|_| ())
    }

    /// Prepend everything gathered this round, outermost hop first.
    fn merge_collected(&self, id: SessionId) {
        let collected = self
            .registry
            .with_session(id, |s| std::mem::take(&mut s.collected))
            .unwrap_or_default();
        let items: Vec<RawItem> = collected.into_values().rev().flatten().collect();
        if !items.is_empty() {
            self.register_parent_items(id, items);
        }
    }

    /// Hand the aggregated items to the player and show them, once per round.
    /// Returns whether anything was shown.
    pub fn submit_privacy(&self, id: SessionId) -> Result<bool> {
        let submitted = self
            .registry
            .with_session(id, |s| {
                if s.round == Round::Presented {
                    return Ok(false);
                }
                let Some(player) = s.player.as_mut() else {
                    return Err(Error::PlayerNotFound(id));
                };
                if !player.has_privacy_info() {
                    apply_items(player, &s.items);
                }
                s.round = Round::Presented;
                Ok(true)
            })
            .ok_or(Error::SessionNotFound(id))??;
        if !submitted {
            debug!("ID {} already presented this round", id);
            return Ok(false);
        }
        self.show(id)?;
        Ok(true)
    }

    fn show(&self, id: SessionId) -> Result<()> {
        let mut plan = self
            .registry
            .with_session(id, |s| s.player.as_mut().map(Player::plan_show))
            .ok_or(Error::SessionNotFound(id))?
            .ok_or(Error::PlayerNotFound(id))?;
        if plan.view.header.is_none() {
            plan.view.header = self.renderer.localized_text(TextKind::Header);
        }
        if plan.view.footer.is_none() {
            plan.view.footer = self.renderer.localized_text(TextKind::Footer);
        }
        if let Some(popup) = plan.close_popup {
            self.host.close_popup(popup);
        }
        match plan.target {
            ShowTarget::Panel => {
                if !self.renderer.render_panel(&plan.view) {
                    debug!("No button wrapper for ID {}, panel not shown", id);
                }
            }
            ShowTarget::Popup(popup) => {
                let title = self
                    .renderer
                    .localized_text(TextKind::ButtonLabel)
                    .unwrap_or_else(|| DEFAULT_BUTTON_LABEL.to_string());
                self.renderer.write_popup(popup, &title, &plan.view);
            }
        }
        info!("Presented {} items for ID {}", plan.view.items.len(), id);
        Ok(())
    }

    fn open_popup(&self) -> Option<PopupRef> {
        let popup = &self.config.popup;
        let suffix = rand::rng().random_range(0..popup.name_suffix_max.max(1));
        let name = format!("{}{}", popup.name_prefix, suffix);
        match self.host.open_popup(&name, &popup.features) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Popup {} failed ({}), opening blank page", name, e);
                self.host.open_blank()
            }
        }
    }

    fn set_round(&self, id: SessionId, round: Round) {
        self.registry.with_session(id, |s| s.round = round);
    }

    pub fn round(&self, id: SessionId) -> Option<Round> {
        self.registry.with_session(id, |s| s.round)
    }

    // -----------------------------------------------------------------------
    // Chain-init discovery and window-name transport
    // -----------------------------------------------------------------------

    /// Run a popup-less collection round after the discovery wait, unless
    /// ancestor items arrive first.
    pub fn schedule_discovery(&self, id: SessionId) -> Result<()> {
        if !self.registry.has_id(id) {
            return Err(Error::SessionNotFound(id));
        }
        let handle = self.host.set_timeout(self.config.discovery_wait(), Timer::Discovery(id));
        let previous = self
            .registry
            .with_session(id, |s| s.discovery_timer.replace(handle))
            .flatten();
        if let Some(previous) = previous {
            self.host.clear_timeout(previous);
        }
        Ok(())
    }

    /// Token for a child iframe's name when postMessage is unavailable. Pulls
    /// this frame's items so they are handed over once. Empty otherwise.
    pub fn create_iframe_name(&self, id: SessionId) -> Result<String> {
        if self.host.supports_post_message() {
            return Ok(String::new());
        }
        codec::encode(&self.registry.pull_by_id(id))
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub fn on_timer(&self, timer: Timer) -> Result<()> {
        match timer {
            Timer::PullTimeout(id) => {
                let expired = self
                    .registry
                    .with_session(id, |s| {
                        if s.round != Round::AsyncPending {
                            return None;
                        }
                        let outstanding = s.awaiting.len();
                        s.awaiting.clear();
                        s.pull_timeout = None;
                        s.round = Round::Merged;
                        Some(outstanding)
                    })
                    .flatten();
                match expired {
                    Some(outstanding) => {
                        info!(
                            "Pull timeout for ID {} with {} replies outstanding, presenting partial result",
                            id, outstanding
                        );
                        self.merge_collected(id);
                        self.submit_privacy(id).map(|_| ())
                    }
                    None => {
                        debug!("Stale pull timeout for ID {}", id);
                        Ok(())
                    }
                }
            }
            Timer::InjectRetry(id) => self.inject(id).map(|_| ()),
            Timer::Discovery(id) => {
                let armed = self
                    .registry
                    .with_session(id, |s| s.discovery_timer.take().is_some())
                    .unwrap_or(false);
                if !armed {
                    debug!("Discovery for ID {} was cancelled", id);
                    return Ok(());
                }
                match self.collect(id, Trigger::Discovery) {
                    Err(Error::PlayerNotFound(_)) => {
                        warn!("Discovery for ID {} without a player, skipping", id);
                        Ok(())
                    }
                    other => other,
                }
            }
        }
    }
}

/// Validate raw entries onto the player. Any entry opting out of the popup or
/// the close button downgrades the whole player.
fn apply_items(player: &mut Player, raw: &[RawItem]) {
    let mut items = Vec::with_capacity(raw.len());
    for entry in raw {
        if entry.opts_out_of_popup() {
            player.use_popup = false;
        }
        if entry.opts_out_of_close_button() {
            player.render_close_button = false;
        }
        if let Some(item) = DisclosureItem::from_raw(entry) {
            items.push(item);
        }
    }
    player.items = Some(items);
}
