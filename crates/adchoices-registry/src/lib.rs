//! AdChoices Registry - disclosure sessions, cross-frame aggregation and presentation

pub mod engine;
pub mod handler;
pub mod player;
pub mod registry;

pub use engine::{AdChoices, InjectOutcome, PlayerCommand, Trigger};
pub use player::{ButtonView, CloseAction, PanelView, Player, Renderer, ShowPlan, ShowTarget, TextKind};
pub use registry::{Registry, Round, SessionData};
