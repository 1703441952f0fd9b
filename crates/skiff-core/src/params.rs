//! Processor parameters
//!
//! A parameter is described by a [`ParameterDescriptor`] (metadata,
//! snapshotted into the non-realtime registry) and stored in a
//! [`ParameterStore`] inside the owning processor. Raw client input is
//! mapped into the processor-consumable domain by a preprocessor: range
//! clipping for plain values, dB-to-linear for gain-like values.

use serde::{Deserialize, Serialize};

/// Parameter identifier, unique within one processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterId(pub u32);

impl ParameterId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Parameter value type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    Bool,
    Int,
    Float,
    String,
    Blob,
}

/// Clipping preprocessor for float parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatPreProcessor {
    pub min: f32,
    pub max: f32,
}

impl FloatPreProcessor {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn process(&self, raw: f32) -> f32 {
        raw.clamp(self.min, self.max)
    }
}

/// Preprocessor clipping in decibels, then converting to linear gain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbToLinPreProcessor {
    pub min: f32,
    pub max: f32,
}

impl DbToLinPreProcessor {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn process(&self, raw: f32) -> f32 {
        10.0f32.powf(raw.clamp(self.min, self.max) / 20.0)
    }
}

/// How raw values map into the processor domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterMapping {
    /// Clip to range
    #[default]
    Linear,
    /// Clip to range in dB, then convert to linear gain
    DbToLin,
}

/// Parameter metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub id: ParameterId,
    pub name: String,
    pub label: String,
    pub parameter_type: ParameterType,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub mapping: ParameterMapping,
}

impl ParameterDescriptor {
    /// Plain float parameter clipped to `min..max`
    pub fn float(name: &str, label: &str, default: f32, min: f32, max: f32) -> Self {
        Self {
            id: ParameterId(0),
            name: name.to_string(),
            label: label.to_string(),
            parameter_type: ParameterType::Float,
            min,
            max,
            default,
            mapping: ParameterMapping::Linear,
        }
    }

    /// Float parameter expressed in dB, consumed as linear gain
    pub fn db(name: &str, label: &str, default: f32, min: f32, max: f32) -> Self {
        Self {
            mapping: ParameterMapping::DbToLin,
            ..Self::float(name, label, default, min, max)
        }
    }

    pub fn int(name: &str, label: &str, default: i32, min: i32, max: i32) -> Self {
        Self {
            parameter_type: ParameterType::Int,
            ..Self::float(name, label, default as f32, min as f32, max as f32)
        }
    }

    pub fn boolean(name: &str, label: &str, default: bool) -> Self {
        Self {
            parameter_type: ParameterType::Bool,
            ..Self::float(name, label, if default { 1.0 } else { 0.0 }, 0.0, 1.0)
        }
    }

    /// Map a raw value into the processor domain
    pub fn preprocess(&self, raw: f32) -> f32 {
        match self.mapping {
            ParameterMapping::Linear => FloatPreProcessor::new(self.min, self.max).process(raw),
            ParameterMapping::DbToLin => DbToLinPreProcessor::new(self.min, self.max).process(raw),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ParameterValue {
    raw: f32,
    domain: f32,
}

/// Per-processor parameter table.
///
/// Ids are indices into the registration order, so lookups on the audio
/// thread are a bounds-checked array access.
#[derive(Debug, Default)]
pub struct ParameterStore {
    descriptors: Vec<ParameterDescriptor>,
    values: Vec<ParameterValue>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter and return its id
    pub fn add(&mut self, mut descriptor: ParameterDescriptor) -> ParameterId {
        let id = ParameterId(self.descriptors.len() as u32);
        descriptor.id = id;
        self.values.push(ParameterValue {
            raw: descriptor.default,
            domain: descriptor.preprocess(descriptor.default),
        });
        self.descriptors.push(descriptor);
        id
    }

    /// Set from a raw client value; stores both the raw input and the
    /// preprocessed domain value
    pub fn set_raw(&mut self, id: ParameterId, raw: f32) {
        if let Some(value) = self.values.get_mut(id.as_index()) {
            value.raw = raw;
            value.domain = self.descriptors[id.as_index()].preprocess(raw);
        }
    }

    pub fn set_bool(&mut self, id: ParameterId, value: bool) {
        self.set_raw(id, if value { 1.0 } else { 0.0 });
    }

    pub fn set_int(&mut self, id: ParameterId, value: i32) {
        self.set_raw(id, value as f32);
    }

    /// Domain (preprocessed) value
    #[inline]
    pub fn value(&self, id: ParameterId) -> f32 {
        self.values.get(id.as_index()).map_or(0.0, |v| v.domain)
    }

    /// Last raw value as given by the client
    #[inline]
    pub fn raw_value(&self, id: ParameterId) -> f32 {
        self.values.get(id.as_index()).map_or(0.0, |v| v.raw)
    }

    #[inline]
    pub fn bool_value(&self, id: ParameterId) -> bool {
        self.value(id) > 0.5
    }

    #[inline]
    pub fn int_value(&self, id: ParameterId) -> i32 {
        self.value(id).round() as i32
    }

    pub fn descriptor(&self, id: ParameterId) -> Option<&ParameterDescriptor> {
        self.descriptors.get(id.as_index())
    }

    pub fn find(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_float_preprocessor_clipping() {
        let preprocessor = FloatPreProcessor::new(-10.0, 10.0);
        assert_eq!(preprocessor.process(1.0), 1.0);
        assert_eq!(preprocessor.process(10.0), 10.0);
        assert_eq!(preprocessor.process(-4.0), -4.0);
        assert_eq!(preprocessor.process(-14.0), -10.0);
        assert_eq!(preprocessor.process(267_890.5), 10.0);
    }

    #[test]
    fn test_db_to_lin_preprocessor() {
        let preprocessor = DbToLinPreProcessor::new(-24.0, 24.0);
        assert_relative_eq!(preprocessor.process(0.0), 1.0, epsilon = 1e-4);
        assert_relative_eq!(preprocessor.process(6.0), 2.0, epsilon = 1e-2);
        assert_relative_eq!(preprocessor.process(-12.0), 0.25, epsilon = 1e-2);
        // Out of range input is clipped before conversion
        assert_relative_eq!(preprocessor.process(100.0), preprocessor.process(24.0));
    }

    #[test]
    fn test_store_defaults() {
        let mut store = ParameterStore::new();
        let float_id = store.add(ParameterDescriptor::float("float_parameter", "Float", 1.0, -10.0, 10.0));
        let int_id = store.add(ParameterDescriptor::int("int_parameter", "Int", 0, -10, 10));
        let bool_id = store.add(ParameterDescriptor::boolean("bool_parameter", "Bool", false));

        assert_eq!(store.value(float_id), 1.0);
        assert_eq!(store.int_value(int_id), 0);
        assert!(!store.bool_value(bool_id));
        assert_eq!(store.raw_value(float_id), 1.0);
    }

    #[test]
    fn test_store_set_clips_domain_value() {
        let mut store = ParameterStore::new();
        let id = store.add(ParameterDescriptor::float("float_parameter", "Float", 1.0, -10.0, 10.0));

        store.set_raw(id, 13.25);
        assert_eq!(store.value(id), 10.0);
        assert_eq!(store.raw_value(id), 13.25);
    }

    #[test]
    fn test_parameter_types_and_lookup() {
        let mut store = ParameterStore::new();
        let gain = store.add(ParameterDescriptor::db("gain", "Gain", 0.0, -24.0, 24.0));

        assert_eq!(store.find("gain").unwrap().id, gain);
        assert!(store.find("missing").is_none());
        assert_eq!(store.descriptor(gain).unwrap().parameter_type, ParameterType::Float);
        assert_relative_eq!(store.value(gain), 1.0, epsilon = 1e-4);
    }
}
