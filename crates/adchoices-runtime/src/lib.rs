//! AdChoices Runtime - a tokio-driven simulated frame tree for running engines end to end

pub mod renderer;
pub mod scenario;
pub mod world;

pub use renderer::{FrameRenderer, RecordingRenderer, RenderEvent};
pub use scenario::{Scenario, ScenarioReport, Step};
pub use world::{FrameSpec, PopupRecord, SessionSnapshot, SimHost, World, WorldEvent};
