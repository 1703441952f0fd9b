//! Processor registry
//!
//! Two indices with different owners:
//!
//! - The **non-realtime map** (name -> [`ProcessorRecord`]) is the
//!   authoritative store, mutated only from control/client threads. It
//!   mirrors the metadata clients query (ids, parameter descriptors,
//!   channel counts); the live objects themselves are owned by the
//!   realtime domain.
//! - The **realtime arena** ([`RtProcessorArena`]) maps `ObjectId` to the
//!   live object. It is pre-sized to a ceiling and mutated only on the
//!   audio thread (via topology events) or directly while the engine is
//!   stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use skiff_core::{
    EngineError, EngineResult, MAX_RT_PROCESSORS, ObjectId, ParameterDescriptor, ParameterId,
    Processor,
};

use crate::track::Track;

/// Metadata mirror of one registered processor
#[derive(Debug, Clone)]
pub struct ProcessorRecord {
    pub id: ObjectId,
    pub parameters: Vec<ParameterDescriptor>,
    pub is_track: bool,
    pub input_channels: usize,
    pub output_channels: usize,
}

/// Name-indexed authoritative store, safe to query from any non-realtime
/// thread
pub struct ProcessorRegistry {
    by_name: RwLock<HashMap<String, ProcessorRecord>>,
    names_by_id: RwLock<HashMap<ObjectId, String>>,
    next_id: AtomicU32,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
            names_by_id: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Assign an id and insert the record. Names must be non-empty and
    /// unique; ids are never reused.
    pub fn register(
        &self,
        name: &str,
        parameters: Vec<ParameterDescriptor>,
        is_track: bool,
        input_channels: usize,
        output_channels: usize,
    ) -> EngineResult<ObjectId> {
        if name.is_empty() {
            log::error!("Plugin name is not specified");
            return Err(EngineError::InvalidPluginName);
        }
        let mut by_name = self.by_name.write();
        if by_name.contains_key(name) {
            log::warn!("Processor with name \"{name}\" already exists");
            return Err(EngineError::InvalidProcessor);
        }

        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if id.as_index() >= MAX_RT_PROCESSORS {
            log::error!("Realtime processor ceiling reached");
            return Err(EngineError::Error);
        }
        by_name.insert(
            name.to_string(),
            ProcessorRecord { id, parameters, is_track, input_channels, output_channels },
        );
        self.names_by_id.write().insert(id, name.to_string());
        log::debug!("Registered processor \"{name}\" with id {id}");
        Ok(id)
    }

    pub fn deregister(&self, name: &str) -> EngineResult<ObjectId> {
        let record = self
            .by_name
            .write()
            .remove(name)
            .ok_or(EngineError::InvalidPluginName)?;
        self.names_by_id.write().remove(&record.id);
        Ok(record.id)
    }

    pub fn record(&self, name: &str) -> Option<ProcessorRecord> {
        self.by_name.read().get(name).cloned()
    }

    pub fn track_record(&self, name: &str) -> EngineResult<ProcessorRecord> {
        match self.record(name) {
            Some(record) if record.is_track => Ok(record),
            _ => Err(EngineError::InvalidTrack),
        }
    }

    pub fn processor_id_from_name(&self, name: &str) -> EngineResult<ObjectId> {
        self.record(name).map(|r| r.id).ok_or(EngineError::InvalidProcessor)
    }

    pub fn processor_name_from_id(&self, id: ObjectId) -> EngineResult<String> {
        self.names_by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::InvalidProcessor)
    }

    pub fn parameter_id_from_name(
        &self,
        processor_name: &str,
        parameter_name: &str,
    ) -> EngineResult<ParameterId> {
        let record = self.record(processor_name).ok_or(EngineError::InvalidProcessor)?;
        record
            .parameters
            .iter()
            .find(|p| p.name == parameter_name)
            .map(|p| p.id)
            .ok_or(EngineError::InvalidParameter)
    }

    pub fn parameter_name_from_id(
        &self,
        processor_name: &str,
        parameter_id: ParameterId,
    ) -> EngineResult<String> {
        let record = self.record(processor_name).ok_or(EngineError::InvalidProcessor)?;
        record
            .parameters
            .iter()
            .find(|p| p.id == parameter_id)
            .map(|p| p.name.clone())
            .ok_or(EngineError::InvalidParameter)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry of the realtime arena
pub enum RtSlot {
    /// A plugin owned by the arena, not yet on any track
    Plugin(Box<dyn Processor>),
    /// A plugin currently owned by the chain of the given track
    InTrack(ObjectId),
    /// A track, shared with the worker pool
    Track(Arc<Mutex<Track>>),
}

/// Dense id-indexed array read by the audio thread.
///
/// Pre-sized to [`MAX_RT_PROCESSORS`]; slots are only ever extended into,
/// never moved, so an id stays valid for the whole session.
pub struct RtProcessorArena {
    slots: Vec<Option<RtSlot>>,
}

impl RtProcessorArena {
    pub fn new() -> Self {
        Self { slots: (0..MAX_RT_PROCESSORS).map(|_| None).collect() }
    }

    /// Install an object; fails when the slot is occupied or out of range
    pub fn insert(&mut self, id: ObjectId, slot: RtSlot) -> Result<(), RtSlot> {
        match self.slots.get_mut(id.as_index()) {
            Some(entry @ None) => {
                *entry = Some(slot);
                Ok(())
            }
            _ => Err(slot),
        }
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<RtSlot> {
        self.slots.get_mut(id.as_index())?.take()
    }

    pub fn get(&self, id: ObjectId) -> Option<&RtSlot> {
        self.slots.get(id.as_index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut RtSlot> {
        self.slots.get_mut(id.as_index())?.as_mut()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Shared handle to a track slot
    pub fn track(&self, id: ObjectId) -> Option<Arc<Mutex<Track>>> {
        match self.get(id)? {
            RtSlot::Track(track) => Some(Arc::clone(track)),
            _ => None,
        }
    }

    /// Replace a slot unconditionally, returning the previous content
    pub fn replace(&mut self, id: ObjectId, slot: RtSlot) -> Option<RtSlot> {
        let entry = self.slots.get_mut(id.as_index())?;
        entry.replace(slot)
    }
}

impl Default for RtProcessorArena {
    fn default() -> Self {
        Self::new()
    }
}
