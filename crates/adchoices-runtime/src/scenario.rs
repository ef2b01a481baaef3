//! Scenarios — a frame tree plus a script of embedder calls
//!
//! Loaded from TOML (or JSON by file extension):
//!
//! ```toml
//! name = "friendly parent"
//!
//! [[frames]]
//! id = 1
//! origin = "https://publisher.example"
//!
//! [[frames]]
//! id = 2
//! parent = 1
//! origin = "https://publisher.example"
//! containers = ["oba"]
//!
//! [[steps]]
//! action = "register"
//! frame = 2
//! session = 7
//! item = { domId = "oba", title = "Ad", linkText = "Info", url = "https://ad.example/" }
//! ```

use crate::renderer::RenderEvent;
use crate::world::{FrameSpec, PopupRecord, SessionSnapshot, World};
use adchoices_core::{codec, AdChoicesConfig, Error, PlayerOptions, Registration, RawItem, Result, SessionId};
use adchoices_registry::PlayerCommand;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    /// Used when no config is given on the command line.
    #[serde(default)]
    pub config: Option<AdChoicesConfig>,
    /// Localized button label for every frame.
    #[serde(default)]
    pub button_label: Option<String>,
    pub frames: Vec<FrameSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One embedder call against a frame's engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Register { frame: u64, session: SessionId, item: Registration },
    RegisterParentItems { frame: u64, session: SessionId, items: Vec<RawItem> },
    PublisherInfo { frame: u64, info: String },
    CreatePlayer {
        frame: u64,
        session: SessionId,
        #[serde(default)]
        options: PlayerOptions,
    },
    /// A click on the AdChoices button.
    Click { frame: u64, session: SessionId },
    ScheduleDiscovery { frame: u64, session: SessionId },
    PlayerCmd { frame: u64, session: SessionId, command: PlayerCommand },
    /// `frame` hands its items to `child` through the child's window name.
    NameChild { frame: u64, child: u64, session: SessionId },
    AddContainer { frame: u64, dom_id: String },
    /// Drain the event queue before the next step.
    Settle,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub events_dispatched: usize,
    pub elapsed_ms: u64,
    pub renders: Vec<RenderEvent>,
    pub popups: Vec<PopupRecord>,
    pub sessions: Vec<SessionSnapshot>,
}

impl Scenario {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// `.json` files are JSON, everything else TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mut scenario = if is_json { Self::from_json(&content)? } else { Self::from_toml(&content)? };
        if scenario.name.is_empty() {
            scenario.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(scenario)
    }

    /// Build the world, run every step and drain the queue.
    pub async fn run(&self, config: Option<AdChoicesConfig>) -> Result<ScenarioReport> {
        let config = config.or_else(|| self.config.clone()).unwrap_or_default();
        let mut renderer = crate::renderer::RecordingRenderer::new();
        if let Some(label) = &self.button_label {
            renderer = renderer.with_button_label(label.clone());
        }
        let world = World::with_renderer(self.frames.clone(), config, renderer)?;
        let started = Instant::now();
        let mut dispatched = 0;

        info!("Running scenario \"{}\" ({} steps)", self.name, self.steps.len());
        for step in &self.steps {
            if matches!(step, Step::Settle) {
                dispatched += world.run_until_idle().await;
            } else {
                step.apply(&world)?;
            }
        }
        dispatched += world.run_until_idle().await;

        Ok(ScenarioReport {
            name: self.name.clone(),
            events_dispatched: dispatched,
            elapsed_ms: started.elapsed().as_millis() as u64,
            renders: world.renderer().events(),
            popups: world.popups(),
            sessions: world.sessions(),
        })
    }
}

impl Step {
    fn apply(&self, world: &World) -> Result<()> {
        match self {
            Self::Register { frame, session, item } => {
                world.engine(*frame)?.register(*session, item.clone());
            }
            Self::RegisterParentItems { frame, session, items } => {
                world.engine(*frame)?.register_parent_items(*session, items.clone());
            }
            Self::PublisherInfo { frame, info } => {
                world.engine(*frame)?.set_publisher_info(info.clone());
            }
            Self::CreatePlayer { frame, session, options } => {
                world.engine(*frame)?.create_player(*session, options.clone())?;
            }
            Self::Click { frame, session } => {
                world.engine(*frame)?.collect_privacy(*session)?;
            }
            Self::ScheduleDiscovery { frame, session } => {
                world.engine(*frame)?.schedule_discovery(*session)?;
            }
            Self::PlayerCmd { frame, session, command } => {
                world.engine(*frame)?.player_cmd(*session, *command)?;
            }
            Self::NameChild { frame, child, session } => {
                let token = world.engine(*frame)?.create_iframe_name(*session)?;
                if !token.is_empty() {
                    world.set_window_name(*child, codec::compose_window_name("adp", &token))?;
                }
            }
            Self::AddContainer { frame, dom_id } => world.add_container(*frame, dom_id.clone()),
            Self::Settle => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_steps() {
        let scenario = Scenario::from_toml(
            r#"
            name = "t"

            [[frames]]
            id = 1
            origin = "https://a.example"

            [[steps]]
            action = "register"
            frame = 1
            session = 7
            item = { domId = "oba", title = "T", linkText = "L", url = "U" }

            [[steps]]
            action = "create_player"
            frame = 1
            session = 7
            options = { usePopup = false, position = "bottom-left" }

            [[steps]]
            action = "player_cmd"
            frame = 1
            session = 7
            command = "hide"

            [[steps]]
            action = "settle"
            "#,
        )
        .unwrap();
        assert_eq!(scenario.frames.len(), 1);
        assert!(scenario.frames[0].library);
        assert_eq!(scenario.steps.len(), 4);
        match &scenario.steps[0] {
            Step::Register { session, item, .. } => {
                assert_eq!(*session, SessionId::new(7));
                assert_eq!(item.dom_id.as_deref(), Some("oba"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(scenario.steps[2], Step::PlayerCmd { command: PlayerCommand::Hide, .. }));
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(Scenario::from_toml("frames = 3"), Err(Error::ConfigError(_))));
    }
}
