//! Declarative topology documents.
//!
//! A topology is a JSON document of pipeline declarations, widget
//! class-instances, and routes. The compiler lowers it into the IPC
//! message sequence that builds the graph, and rejects ambiguity
//! outright: duplicate ids and routes referencing undefined ids are
//! errors, never guessed at.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use apx_core::{SampleFormat, SampleType};
use apx_pipeline::{NewComponentSpec, PipelineId, StreamDirection, TimeDomain, Uuid};
use serde::{Deserialize, Serialize};

use crate::{
    error::{IpcError, Result},
    message::IpcMessage,
};

const DEFAULT_BUFFER_BYTES: usize = 8192;
/// Auto-assigned route buffer ids start here.
const ROUTE_BUFFER_BASE: u32 = 0x0100;

fn default_period() -> u64 {
    apx_pipeline::constants::DEFAULT_PERIOD_US
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDomainDecl {
    #[default]
    Timer,
    Dma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionDecl {
    #[default]
    Playback,
    Capture,
}

impl From<DirectionDecl> for StreamDirection {
    fn from(d: DirectionDecl) -> Self {
        match d {
            DirectionDecl::Playback => StreamDirection::Playback,
            DirectionDecl::Capture => StreamDirection::Capture,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDecl {
    pub id: u32,
    #[serde(default = "default_period")]
    pub period_us: u64,
    #[serde(default)]
    pub deadline_us: u64,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub core: u32,
    #[serde(default)]
    pub time_domain: TimeDomainDecl,
    /// Supported channel range `[min, max]`.
    #[serde(default)]
    pub channels: Option<[u32; 2]>,
    /// Supported rate range `[min, max]`.
    #[serde(default)]
    pub rate: Option<[u32; 2]>,
    #[serde(default)]
    pub lp_mode: bool,
    #[serde(default)]
    pub direction: DirectionDecl,
    #[serde(default)]
    pub dynamic_pipeline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetClass {
    HostCopier,
    DaiCopier,
    Mixin,
    Mixout,
    Gain,
    Src,
    Eq,
    Tone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDecl {
    pub rate: u32,
    pub channels: u32,
    pub container_bits: u32,
    pub valid_bits: u32,
}

impl FormatDecl {
    fn to_format(&self) -> SampleFormat {
        SampleFormat {
            rate: self.rate,
            channels: self.channels,
            container_bytes: self.container_bits / 8,
            valid_bits: self.valid_bits,
            sample_type: SampleType::SignedInt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetDecl {
    pub class: WidgetClass,
    pub id: u32,
    pub pipeline: u32,
    #[serde(default)]
    pub direction: Option<DirectionDecl>,
    /// Audio-format list the widget advertises.
    #[serde(default)]
    pub formats: Vec<FormatDecl>,
    #[serde(default)]
    pub capacity: Option<usize>,
    // Class-specific parameters.
    #[serde(default)]
    pub gain_q16: Option<u32>,
    #[serde(default)]
    pub freq_hz: Option<u32>,
    #[serde(default)]
    pub amp_q16: Option<u32>,
    #[serde(default)]
    pub window_bytes: Option<u32>,
    /// Output/input frame ratio `[num, den]` for src widgets.
    #[serde(default)]
    pub ratio: Option<[u32; 2]>,
    #[serde(default)]
    pub max_sources: Option<u32>,
}

/// One `source.<id>.<pin> -> sink.<id>.<pin>` connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecl {
    pub source: String,
    pub sink: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyDoc {
    #[serde(default)]
    pub pipelines: Vec<PipelineDecl>,
    #[serde(default)]
    pub widgets: Vec<WidgetDecl>,
    #[serde(default)]
    pub routes: Vec<RouteDecl>,
}

impl TopologyDoc {
    /// Parses a JSON topology document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON topology file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Widget-class to driver-UUID mapping, supplied by whoever registered
/// the drivers.
#[derive(Debug, Clone, Copy)]
pub struct DriverMap {
    pub host: Uuid,
    pub dai: Uuid,
    pub gain: Uuid,
    pub mixin: Uuid,
    pub mixout: Uuid,
    pub tone: Uuid,
    pub src: Uuid,
    pub eq: Uuid,
}

impl DriverMap {
    fn uuid_for(&self, class: WidgetClass) -> Uuid {
        match class {
            WidgetClass::HostCopier => self.host,
            WidgetClass::DaiCopier => self.dai,
            WidgetClass::Gain => self.gain,
            WidgetClass::Mixin => self.mixin,
            WidgetClass::Mixout => self.mixout,
            WidgetClass::Tone => self.tone,
            WidgetClass::Src => self.src,
            WidgetClass::Eq => self.eq,
        }
    }
}

/// Parses `<prefix>.<id>.<pin>`.
fn parse_route_ref(text: &str, prefix: &str) -> Result<(u32, u32)> {
    let mut parts = text.split('.');
    let head = parts.next().unwrap_or_default();
    if head != prefix {
        return Err(IpcError::Topology(format!(
            "route endpoint `{text}` must start with `{prefix}.`"
        )));
    }
    let id = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| IpcError::Topology(format!("bad id in route endpoint `{text}`")))?;
    let pin = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| IpcError::Topology(format!("bad pin in route endpoint `{text}`")))?;
    if parts.next().is_some() {
        return Err(IpcError::Topology(format!("trailing fields in route endpoint `{text}`")));
    }
    Ok((id, pin))
}

/// Lowers a topology into the IPC message sequence that builds it.
///
/// The output order is the canonical build order: pipelines, components,
/// then per-route buffer + connects, then pipeline completion.
pub fn compile(doc: &TopologyDoc, drivers: &DriverMap) -> Result<Vec<IpcMessage>> {
    // Id uniqueness first; everything downstream assumes it.
    let mut pipeline_ids = HashSet::new();
    for p in &doc.pipelines {
        if !pipeline_ids.insert(p.id) {
            return Err(IpcError::DuplicateTopologyId(format!("pipeline {}", p.id)));
        }
    }
    let mut widget_ids = HashMap::new();
    for w in &doc.widgets {
        if widget_ids.insert(w.id, w).is_some() {
            return Err(IpcError::DuplicateTopologyId(format!("widget {}", w.id)));
        }
        if !pipeline_ids.contains(&w.pipeline) {
            return Err(IpcError::UndefinedRef(format!("pipeline {}", w.pipeline)));
        }
        validate_widget(w, doc)?;
    }

    let mut msgs = Vec::new();

    for p in &doc.pipelines {
        msgs.push(IpcMessage::NewPipeline {
            id: p.id,
            core: p.core,
            priority: p.priority,
            period_us: p.period_us,
            deadline_us: p.deadline_us,
            time_domain: match p.time_domain {
                TimeDomainDecl::Timer => TimeDomain::Timer,
                TimeDomainDecl::Dma => TimeDomain::Dma,
            },
        });
    }

    for w in &doc.widgets {
        msgs.push(IpcMessage::NewComponent {
            driver: drivers.uuid_for(w.class),
            id: w.id,
            spec: widget_spec(w)?,
        });
    }

    let mut seen_routes = HashSet::new();
    for (n, route) in doc.routes.iter().enumerate() {
        let (src_id, src_pin) = parse_route_ref(&route.source, "source")?;
        let (sink_id, sink_pin) = parse_route_ref(&route.sink, "sink")?;
        for id in [src_id, sink_id] {
            if !widget_ids.contains_key(&id) {
                return Err(IpcError::UndefinedRef(format!("widget {id}")));
            }
        }
        if !seen_routes.insert((src_id, src_pin, sink_id, sink_pin)) {
            return Err(IpcError::DuplicateTopologyId(format!(
                "route {} -> {}",
                route.source, route.sink
            )));
        }

        let buffer = ROUTE_BUFFER_BASE + n as u32;
        msgs.push(IpcMessage::NewBuffer {
            id: buffer,
            capacity: DEFAULT_BUFFER_BYTES,
        });
        msgs.push(IpcMessage::ConnectCompToBuffer {
            component: src_id,
            buffer,
            pin: src_pin,
        });
        msgs.push(IpcMessage::ConnectBufferToComp {
            buffer,
            component: sink_id,
            pin: sink_pin,
        });
    }

    for p in &doc.pipelines {
        msgs.push(IpcMessage::CompletePipeline { id: p.id });
    }

    Ok(msgs)
}

/// Checks widget formats against the owning pipeline's declared ranges.
fn validate_widget(w: &WidgetDecl, doc: &TopologyDoc) -> Result<()> {
    let pipeline = doc
        .pipelines
        .iter()
        .find(|p| p.id == w.pipeline)
        .expect("pipeline id checked by caller");

    for f in &w.formats {
        if let Some([min, max]) = pipeline.rate {
            if f.rate < min || f.rate > max {
                return Err(IpcError::Topology(format!(
                    "widget {} rate {} outside pipeline range [{min}, {max}]",
                    w.id, f.rate
                )));
            }
        }
        if let Some([min, max]) = pipeline.channels {
            if f.channels < min || f.channels > max {
                return Err(IpcError::Topology(format!(
                    "widget {} channels {} outside pipeline range [{min}, {max}]",
                    w.id, f.channels
                )));
            }
        }
    }
    Ok(())
}

fn widget_spec(w: &WidgetDecl) -> Result<NewComponentSpec> {
    let mut init_data = Vec::new();
    match w.class {
        WidgetClass::Gain => {
            if let Some(gain) = w.gain_q16 {
                init_data.extend_from_slice(&gain.to_le_bytes());
            }
        }
        WidgetClass::Mixout => {
            init_data.extend_from_slice(&w.gain_q16.unwrap_or(1 << 16).to_le_bytes());
            init_data.extend_from_slice(&w.max_sources.unwrap_or(4).to_le_bytes());
        }
        WidgetClass::Tone => {
            let freq = w
                .freq_hz
                .ok_or_else(|| IpcError::Topology(format!("tone widget {} missing freq_hz", w.id)))?;
            init_data.extend_from_slice(&freq.to_le_bytes());
            init_data.extend_from_slice(&w.amp_q16.unwrap_or(1 << 15).to_le_bytes());
        }
        WidgetClass::Src => {
            let window = w
                .window_bytes
                .ok_or_else(|| IpcError::Topology(format!("src widget {} missing window_bytes", w.id)))?;
            let [num, den] = w
                .ratio
                .ok_or_else(|| IpcError::Topology(format!("src widget {} missing ratio", w.id)))?;
            init_data.extend_from_slice(&window.to_le_bytes());
            init_data.extend_from_slice(&num.to_le_bytes());
            init_data.extend_from_slice(&den.to_le_bytes());
        }
        WidgetClass::HostCopier | WidgetClass::DaiCopier | WidgetClass::Mixin | WidgetClass::Eq => {}
    }

    Ok(NewComponentSpec {
        pipeline: PipelineId(w.pipeline),
        direction: w.direction.map(Into::into),
        formats: w.formats.iter().map(|f| f.to_format()).collect(),
        capacity: w.capacity.unwrap_or(0),
        init_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_map() -> DriverMap {
        let u = |n: u8| Uuid::from_fields(0, 0, 0, [0, 0, 0, 0, 0, 0, 0, n]);
        DriverMap {
            host: u(1),
            dai: u(2),
            gain: u(3),
            mixin: u(4),
            mixout: u(5),
            tone: u(6),
            src: u(7),
            eq: u(8),
        }
    }

    fn simple_doc() -> TopologyDoc {
        TopologyDoc::from_json(
            r#"{
                "pipelines": [
                    { "id": 1, "period_us": 1000, "priority": 2, "direction": "playback",
                      "rate": [8000, 96000], "channels": [1, 8] }
                ],
                "widgets": [
                    { "class": "host-copier", "id": 10, "pipeline": 1, "direction": "playback",
                      "formats": [ { "rate": 48000, "channels": 2, "container_bits": 32, "valid_bits": 32 } ] },
                    { "class": "gain", "id": 11, "pipeline": 1, "gain_q16": 32768 },
                    { "class": "dai-copier", "id": 12, "pipeline": 1, "direction": "playback" }
                ],
                "routes": [
                    { "source": "source.10.0", "sink": "sink.11.0" },
                    { "source": "source.11.0", "sink": "sink.12.0" }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_compile_emits_canonical_order() {
        let msgs = compile(&simple_doc(), &driver_map()).unwrap();

        // 1 pipeline + 3 widgets + 2 * (buffer + 2 connects) + 1 complete.
        assert_eq!(msgs.len(), 11);
        assert!(matches!(msgs[0], IpcMessage::NewPipeline { id: 1, .. }));
        assert!(matches!(msgs[1], IpcMessage::NewComponent { id: 10, .. }));
        assert!(matches!(msgs[4], IpcMessage::NewBuffer { .. }));
        assert!(matches!(msgs.last(), Some(IpcMessage::CompletePipeline { id: 1 })));
    }

    #[test]
    fn test_duplicate_widget_id_rejected() {
        let mut doc = simple_doc();
        doc.widgets[2].id = 10;
        assert!(matches!(
            compile(&doc, &driver_map()),
            Err(IpcError::DuplicateTopologyId(_))
        ));
    }

    #[test]
    fn test_route_to_undefined_widget_rejected() {
        let mut doc = simple_doc();
        doc.routes[1].sink = "sink.99.0".into();
        assert!(matches!(compile(&doc, &driver_map()), Err(IpcError::UndefinedRef(_))));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut doc = simple_doc();
        doc.routes[1] = doc.routes[0].clone();
        assert!(matches!(
            compile(&doc, &driver_map()),
            Err(IpcError::DuplicateTopologyId(_))
        ));
    }

    #[test]
    fn test_malformed_route_ref_rejected() {
        let mut doc = simple_doc();
        doc.routes[0].source = "sink.10.0".into();
        assert!(matches!(compile(&doc, &driver_map()), Err(IpcError::Topology(_))));
    }

    #[test]
    fn test_format_outside_pipeline_range_rejected() {
        let mut doc = simple_doc();
        doc.widgets[0].formats[0].rate = 192_000;
        assert!(matches!(compile(&doc, &driver_map()), Err(IpcError::Topology(_))));
    }

    #[test]
    fn test_tone_requires_frequency() {
        let mut doc = simple_doc();
        doc.widgets[1] = WidgetDecl {
            class: WidgetClass::Tone,
            id: 11,
            pipeline: 1,
            direction: None,
            formats: Vec::new(),
            capacity: None,
            gain_q16: None,
            freq_hz: None,
            amp_q16: None,
            window_bytes: None,
            ratio: None,
            max_sources: None,
        };
        assert!(matches!(compile(&doc, &driver_map()), Err(IpcError::Topology(_))));
    }
}
