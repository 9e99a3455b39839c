//! Driver table for the stock modules and endpoints.
//!
//! Each driver pairs a stable UUID with a constructor reading its
//! creation blob; [`register_all`] installs the whole set into a
//! registry. The blob layouts are tiny LE structs documented per
//! constructor, matching what the topology loader emits.

use apx_core::{ApxError, Result};
use apx_pipeline::{
    Component, ComponentDriver, ComponentId, ComponentKind, ComponentRegistry, DaiEndpoint, HostEndpoint,
    NewComponentSpec, ProcessingModule, StreamDirection, Uuid,
};

use crate::{
    dsp::Q16_UNITY,
    eq::EqModule,
    gain::GainModule,
    mixer::{MixinModule, MixoutModule},
    src_conv::SrcModule,
    tone::ToneModule,
};

pub const HOST_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x01]);
pub const DAI_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x02]);
pub const GAIN_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x03]);
pub const MIXIN_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x04]);
pub const MIXOUT_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x05]);
pub const TONE_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x06]);
pub const SRC_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x07]);
pub const EQ_UUID: Uuid = Uuid::from_fields(0x8bfa_5e14, 0x1d42, 0x4a0f, [0x9e, 0x31, 0x07, 0x55, 0xaa, 0x01, 0x00, 0x08]);

const DEFAULT_ENDPOINT_CAPACITY: usize = 8192;

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Blob: none.
fn host_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let direction = spec.direction.unwrap_or(StreamDirection::Playback);
    let capacity = if spec.capacity > 0 { spec.capacity } else { DEFAULT_ENDPOINT_CAPACITY };
    Ok(Component::new_host(
        id,
        spec.pipeline,
        HostEndpoint::new(direction, capacity, spec.formats.clone()),
    ))
}

/// Blob: none.
fn dai_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let direction = spec.direction.unwrap_or(StreamDirection::Playback);
    let capacity = if spec.capacity > 0 { spec.capacity } else { DEFAULT_ENDPOINT_CAPACITY };
    Ok(Component::new_dai(
        id,
        spec.pipeline,
        DaiEndpoint::new(direction, capacity, spec.formats.clone()),
    ))
}

/// Blob: `gain_q16: u32` (optional, default unity).
fn gain_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let gain = read_u32(&spec.init_data, 0).map(|g| g as i64).unwrap_or(Q16_UNITY);
    Ok(Component::new_module(
        id,
        ComponentKind::Gain,
        spec.pipeline,
        Box::new(GainModule::new(gain)),
    ))
}

/// Blob: none.
fn mixin_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    Ok(Component::new_module(
        id,
        ComponentKind::MixIn,
        spec.pipeline,
        Box::new(MixinModule::new()),
    ))
}

/// Blob: `gain_q16: u32, max_sources: u32` (both optional).
fn mixout_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let gain = read_u32(&spec.init_data, 0).map(|g| g as i64).unwrap_or(Q16_UNITY);
    let max_sources = read_u32(&spec.init_data, 4).unwrap_or(4) as usize;
    Ok(Component::new_module(
        id,
        ComponentKind::MixOut,
        spec.pipeline,
        Box::new(MixoutModule::new(max_sources.clamp(1, 8)).with_gain(gain)),
    ))
}

/// Blob: `freq_hz: u32, amp_q16: u32`.
fn tone_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let freq = read_u32(&spec.init_data, 0).ok_or(ApxError::InvalidParameter)?;
    let amp = read_u32(&spec.init_data, 4).unwrap_or(1 << 15);
    Ok(Component::new_module(
        id,
        ComponentKind::Tone,
        spec.pipeline,
        Box::new(ToneModule::new(freq, amp)),
    ))
}

/// Blob: `window_bytes: u32, ratio_num: u32, ratio_den: u32`.
fn src_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let window = read_u32(&spec.init_data, 0).ok_or(ApxError::InvalidParameter)?;
    let num = read_u32(&spec.init_data, 4).ok_or(ApxError::InvalidParameter)?;
    let den = read_u32(&spec.init_data, 8).ok_or(ApxError::InvalidParameter)?;
    if window == 0 || num == 0 || den == 0 {
        return Err(ApxError::InvalidParameter);
    }
    Ok(Component::new_module(
        id,
        ComponentKind::Src,
        spec.pipeline,
        Box::new(SrcModule::new(window as usize, num, den)),
    ))
}

/// Blob: five LE `f32` biquad coefficients (optional, default flat).
fn eq_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
    let mut eq = EqModule::new();
    if !spec.init_data.is_empty() {
        eq.set_config(&spec.init_data)?;
    }
    Ok(Component::new_module(
        id,
        ComponentKind::Eq,
        spec.pipeline,
        Box::new(eq),
    ))
}

/// The stock driver set, in registration order.
pub fn drivers() -> [ComponentDriver; 8] {
    [
        ComponentDriver { uuid: HOST_UUID, name: "host-copier", create: host_ctor },
        ComponentDriver { uuid: DAI_UUID, name: "dai-copier", create: dai_ctor },
        ComponentDriver { uuid: GAIN_UUID, name: "gain", create: gain_ctor },
        ComponentDriver { uuid: MIXIN_UUID, name: "mixin", create: mixin_ctor },
        ComponentDriver { uuid: MIXOUT_UUID, name: "mixout", create: mixout_ctor },
        ComponentDriver { uuid: TONE_UUID, name: "tone", create: tone_ctor },
        ComponentDriver { uuid: SRC_UUID, name: "src", create: src_ctor },
        ComponentDriver { uuid: EQ_UUID, name: "eq", create: eq_ctor },
    ]
}

/// Installs every stock driver into `registry`.
pub fn register_all(registry: &ComponentRegistry) -> Result<()> {
    for driver in drivers() {
        registry.register(driver)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use apx_pipeline::{ComponentState, PipelineId};

    use super::*;

    #[test]
    fn test_register_all_installs_stock_set() {
        let registry = ComponentRegistry::new();
        register_all(&registry).unwrap();
        assert_eq!(registry.len(), 8);
        // Second installation collides on UUIDs.
        assert_eq!(register_all(&registry), Err(ApxError::Exists));
    }

    #[test]
    fn test_gain_defaults_to_unity() {
        let registry = ComponentRegistry::new();
        register_all(&registry).unwrap();

        let comp = registry
            .new_component(GAIN_UUID, ComponentId(5), &NewComponentSpec {
                pipeline: PipelineId(1),
                ..NewComponentSpec::default()
            })
            .unwrap();
        assert_eq!(comp.state(), ComponentState::Ready);
        assert_eq!(comp.kind(), ComponentKind::Gain);
    }

    #[test]
    fn test_src_requires_full_blob() {
        let registry = ComponentRegistry::new();
        register_all(&registry).unwrap();

        let err = registry.new_component(SRC_UUID, ComponentId(6), &NewComponentSpec::default());
        assert!(err.is_err());
    }
}
