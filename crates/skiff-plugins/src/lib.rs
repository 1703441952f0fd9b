//! skiff-plugins: Processors hosted by the Skiff engine
//!
//! Internal DSP plugins plus the loader seam for external plugin formats.
//! The engine creates processors exclusively through [`PluginRegistry`];
//! wrapper crates for VST2/VST3/LV2 register a [`PluginLoader`] per format
//! and are otherwise invisible to the engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use skiff_core::{Processor, ProcessorError};

mod delay;
mod equalizer;
mod gain;
mod lfo;
mod passthrough;

pub use delay::DelayPlugin;
pub use equalizer::EqualizerPlugin;
pub use gain::GainPlugin;
pub use lfo::LfoPlugin;
pub use passthrough::PassthroughPlugin;

/// Internal plugin uids
pub mod uids {
    pub const PASSTHROUGH: &str = "skiff.passthrough";
    pub const GAIN: &str = "skiff.gain";
    pub const EQUALIZER: &str = "skiff.equalizer";
    pub const DELAY: &str = "skiff.delay";
    pub const LFO: &str = "skiff.lfo";
}

/// Plugin format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginType {
    Internal,
    Vst2,
    Vst3,
    Lv2,
}

/// Everything needed to instantiate a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub uid: String,
    pub name: String,
    pub path: String,
    pub plugin_type: PluginType,
}

/// Format-specific plugin instantiation
pub trait PluginLoader: Send + Sync {
    fn load(&self, spec: &PluginSpec) -> Result<Box<dyn Processor>, ProcessorError>;
}

/// Instantiate one of the built-in plugins by uid
pub fn create_internal_plugin(uid: &str) -> Option<Box<dyn Processor>> {
    match uid {
        uids::PASSTHROUGH => Some(Box::new(PassthroughPlugin::new())),
        uids::GAIN => Some(Box::new(GainPlugin::new())),
        uids::EQUALIZER => Some(Box::new(EqualizerPlugin::new())),
        uids::DELAY => Some(Box::new(DelayPlugin::new())),
        uids::LFO => Some(Box::new(LfoPlugin::new())),
        _ => None,
    }
}

struct InternalLoader;

impl PluginLoader for InternalLoader {
    fn load(&self, spec: &PluginSpec) -> Result<Box<dyn Processor>, ProcessorError> {
        create_internal_plugin(&spec.uid)
            .ok_or_else(|| ProcessorError::LoadFailed(format!("unknown internal uid {}", spec.uid)))
    }
}

/// Loader table consulted by the engine for every plugin instantiation.
///
/// The internal format is pre-wired; external formats are present only
/// when a host frontend registered a loader for them.
pub struct PluginRegistry {
    loaders: HashMap<PluginType, Box<dyn PluginLoader>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        let mut loaders: HashMap<PluginType, Box<dyn PluginLoader>> = HashMap::new();
        loaders.insert(PluginType::Internal, Box::new(InternalLoader));
        Self { loaders }
    }

    /// Register a loader for an external plugin format
    pub fn register_loader(&mut self, plugin_type: PluginType, loader: Box<dyn PluginLoader>) {
        log::info!("Registered plugin loader for {plugin_type:?}");
        self.loaders.insert(plugin_type, loader);
    }

    pub fn create(&self, spec: &PluginSpec) -> Result<Box<dyn Processor>, ProcessorError> {
        match self.loaders.get(&spec.plugin_type) {
            Some(loader) => loader.load(spec),
            None => Err(ProcessorError::LoadFailed(format!(
                "no loader registered for {:?}",
                spec.plugin_type
            ))),
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
