//! IPC and topology integration: graphs built through the message
//! layer, with transactional unwind and format negotiation.

use std::io::Write as _;
use std::sync::Arc;

use apx_core::{ApxError, HostStatusRegister, SampleFormat, SampleType, StatusHandle};
use apx_pipeline::{
    ComponentId, ComponentRegistry, ComponentState, NewComponentSpec, PipelineId, StreamDirection, TimeDomain,
    Trigger,
};
use apx_ipc::{
    DriverMap, Fragment, FragmentPos, IpcError, IpcHandler, IpcMessage, IpcResponse, TopologyDoc, compile,
};
use apx_modules::{
    DAI_UUID, EQ_UUID, GAIN_UUID, HOST_UUID, MIXIN_UUID, MIXOUT_UUID, SRC_UUID, TONE_UUID, register_all,
};

const PERIOD_BYTES: usize = 384;

fn fmt() -> SampleFormat {
    SampleFormat::s32_48k_stereo()
}

fn status() -> StatusHandle {
    Arc::new(HostStatusRegister::new())
}

fn handler() -> IpcHandler {
    let registry = Arc::new(ComponentRegistry::new());
    register_all(&registry).unwrap();
    IpcHandler::new(registry, status())
}

fn driver_map() -> DriverMap {
    DriverMap {
        host: HOST_UUID,
        dai: DAI_UUID,
        gain: GAIN_UUID,
        mixin: MIXIN_UUID,
        mixout: MIXOUT_UUID,
        tone: TONE_UUID,
        src: SRC_UUID,
        eq: EQ_UUID,
    }
}

fn new_pipeline(id: u32) -> IpcMessage {
    IpcMessage::NewPipeline {
        id,
        core: 0,
        priority: 0,
        period_us: 1_000,
        deadline_us: 0,
        time_domain: TimeDomain::Timer,
    }
}

fn spec(pipeline: u32) -> NewComponentSpec {
    NewComponentSpec {
        pipeline: PipelineId(pipeline),
        direction: Some(StreamDirection::Playback),
        formats: vec![fmt()],
        capacity: 0,
        init_data: Vec::new(),
    }
}

// ----------------------------------------------------------------------
// Scenario: graph cycle rejected, nothing left allocated
// ----------------------------------------------------------------------

#[test]
fn test_cycle_rejected_with_full_unwind() {
    let mut ipc = handler();

    let mut mixer_spec = spec(1);
    mixer_spec.init_data.extend_from_slice(&(1u32 << 16).to_le_bytes());
    mixer_spec.init_data.extend_from_slice(&2u32.to_le_bytes());

    let msgs = vec![
        new_pipeline(1),
        IpcMessage::NewComponent { driver: MIXOUT_UUID, id: 1, spec: mixer_spec },
        IpcMessage::NewComponent { driver: GAIN_UUID, id: 2, spec: spec(1) },
        IpcMessage::NewBuffer { id: 10, capacity: 4096 },
        IpcMessage::ConnectCompToBuffer { component: 1, buffer: 10, pin: 0 },
        IpcMessage::ConnectBufferToComp { buffer: 10, component: 2, pin: 0 },
        IpcMessage::NewBuffer { id: 11, capacity: 4096 },
        IpcMessage::ConnectCompToBuffer { component: 2, buffer: 11, pin: 0 },
        IpcMessage::ConnectBufferToComp { buffer: 11, component: 1, pin: 0 },
        IpcMessage::CompletePipeline { id: 1 },
    ];

    let err = ipc.apply_batch(msgs).unwrap_err();
    assert_eq!(err.code(), ApxError::GraphCycle);

    // Reverse-order unwind removed everything the batch created.
    assert!(ipc.graph().component(ComponentId(1)).is_none());
    assert!(ipc.graph().component(ComponentId(2)).is_none());
    assert!(ipc.graph().buffer(apx_stream::BufferId(10)).is_none());
    assert!(ipc.graph().buffer(apx_stream::BufferId(11)).is_none());
    assert!(ipc.graph().pipeline(PipelineId(1)).is_none());
}

// ----------------------------------------------------------------------
// Scenario: format negotiation against the host copier's list
// ----------------------------------------------------------------------

fn build_host_gain_dai(ipc: &mut IpcHandler, host_formats: Vec<SampleFormat>) {
    let mut host_spec = spec(1);
    host_spec.formats = host_formats;

    ipc.apply_batch(vec![
        new_pipeline(1),
        IpcMessage::NewComponent { driver: HOST_UUID, id: 1, spec: host_spec },
        IpcMessage::NewComponent { driver: GAIN_UUID, id: 2, spec: spec(1) },
        IpcMessage::NewComponent { driver: DAI_UUID, id: 3, spec: NewComponentSpec { formats: Vec::new(), ..spec(1) } },
        IpcMessage::NewBuffer { id: 10, capacity: 4096 },
        IpcMessage::ConnectCompToBuffer { component: 1, buffer: 10, pin: 0 },
        IpcMessage::ConnectBufferToComp { buffer: 10, component: 2, pin: 0 },
        IpcMessage::NewBuffer { id: 11, capacity: 4096 },
        IpcMessage::ConnectCompToBuffer { component: 2, buffer: 11, pin: 0 },
        IpcMessage::ConnectBufferToComp { buffer: 11, component: 3, pin: 0 },
        IpcMessage::CompletePipeline { id: 1 },
    ])
    .unwrap();
}

#[test]
fn test_format_in_host_list_accepted() {
    let mut ipc = handler();
    build_host_gain_dai(&mut ipc, vec![SampleFormat::s16_48k_stereo(), fmt()]);

    // 16-bit is in the host list; the gain stage accepts it too.
    ipc.apply(IpcMessage::Params {
        component: 1,
        format: SampleFormat::s16_48k_stereo(),
    })
    .unwrap();
    ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Prepare }).unwrap();

    assert_eq!(
        ipc.graph().pipeline(PipelineId(1)).unwrap().state(),
        ComponentState::Prepare
    );
}

#[test]
fn test_format_outside_host_list_rejected() {
    let mut ipc = handler();
    build_host_gain_dai(&mut ipc, vec![SampleFormat::s16_48k_stereo(), fmt()]);

    // 24-in-24 packed is not offered by the host copier.
    let packed24 = SampleFormat {
        rate: 48_000,
        channels: 2,
        container_bytes: 3,
        valid_bits: 24,
        sample_type: SampleType::SignedInt,
    };
    let err = ipc
        .apply(IpcMessage::Params { component: 1, format: packed24 })
        .unwrap_err();
    assert_eq!(err.code(), ApxError::UnsupportedFormat);

    // Unprepared: the pipeline never left READY.
    assert_eq!(ipc.graph().pipeline(PipelineId(1)).unwrap().state(), ComponentState::Ready);
}

// ----------------------------------------------------------------------
// Trigger idempotence
// ----------------------------------------------------------------------

#[test]
fn test_double_trigger_reports_already_set() {
    let mut ipc = handler();
    build_host_gain_dai(&mut ipc, vec![fmt()]);

    ipc.apply(IpcMessage::Params { component: 1, format: fmt() }).unwrap();
    ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Prepare }).unwrap();

    assert_eq!(
        ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Prepare }).unwrap(),
        IpcResponse::Done, // prepare of a prepared pipeline is a no-op
    );

    ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Start }).unwrap();
    assert_eq!(
        ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Start }).unwrap(),
        IpcResponse::AlreadySet
    );

    // A trigger illegal in the current state is a bad-state error.
    let err = ipc
        .apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Prepare })
        .unwrap_err();
    assert_eq!(err.code(), ApxError::BadState);
}

// ----------------------------------------------------------------------
// Configuration blob fragments
// ----------------------------------------------------------------------

#[test]
fn test_fragmented_config_reassembly() {
    let mut ipc = handler();
    build_host_gain_dai(&mut ipc, vec![fmt()]);

    let gain_word = (3u32 << 16).to_le_bytes();

    ipc.apply(IpcMessage::SetData {
        component: 2,
        fragment: Fragment { pos: FragmentPos::First { total: 4 }, data: gain_word[..2].to_vec() },
    })
    .unwrap();
    ipc.apply(IpcMessage::SetData {
        component: 2,
        fragment: Fragment { pos: FragmentPos::Middle, data: gain_word[2..3].to_vec() },
    })
    .unwrap();
    ipc.apply(IpcMessage::SetData {
        component: 2,
        fragment: Fragment { pos: FragmentPos::Last, data: gain_word[3..].to_vec() },
    })
    .unwrap();

    assert_eq!(
        ipc.apply(IpcMessage::GetData { component: 2 }).unwrap(),
        IpcResponse::Data(gain_word.to_vec())
    );
}

#[test]
fn test_fragment_sequence_violations() {
    let mut ipc = handler();
    build_host_gain_dai(&mut ipc, vec![fmt()]);

    // Middle with no transfer open.
    let err = ipc
        .apply(IpcMessage::SetData {
            component: 2,
            fragment: Fragment { pos: FragmentPos::Middle, data: vec![0u8; 2] },
        })
        .unwrap_err();
    assert!(matches!(err, IpcError::FragmentSequence));

    // Overflow past the declared total.
    ipc.apply(IpcMessage::SetData {
        component: 2,
        fragment: Fragment { pos: FragmentPos::First { total: 4 }, data: vec![0u8; 2] },
    })
    .unwrap();
    let err = ipc
        .apply(IpcMessage::SetData {
            component: 2,
            fragment: Fragment { pos: FragmentPos::Last, data: vec![0u8; 6] },
        })
        .unwrap_err();
    assert!(matches!(err, IpcError::FragmentOverflow));

    // Single-shot still works afterwards.
    ipc.apply(IpcMessage::SetData {
        component: 2,
        fragment: Fragment { pos: FragmentPos::Single, data: (1u32 << 16).to_le_bytes().to_vec() },
    })
    .unwrap();
}

// ----------------------------------------------------------------------
// Topology file to running stream
// ----------------------------------------------------------------------

#[test]
fn test_topology_file_builds_running_pipeline() {
    let json = r#"{
        "pipelines": [
            { "id": 1, "period_us": 1000, "priority": 1, "direction": "playback" }
        ],
        "widgets": [
            { "class": "host-copier", "id": 10, "pipeline": 1, "direction": "playback",
              "formats": [ { "rate": 48000, "channels": 2, "container_bits": 32, "valid_bits": 32 } ] },
            { "class": "gain", "id": 11, "pipeline": 1, "gain_q16": 131072 },
            { "class": "dai-copier", "id": 12, "pipeline": 1, "direction": "playback" }
        ],
        "routes": [
            { "source": "source.10.0", "sink": "sink.11.0" },
            { "source": "source.11.0", "sink": "sink.12.0" }
        ]
    }"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    let doc = TopologyDoc::from_file(file.path()).unwrap();
    let msgs = compile(&doc, &driver_map()).unwrap();

    let mut ipc = handler();
    ipc.apply_batch(msgs).unwrap();

    ipc.apply(IpcMessage::Params { component: 10, format: fmt() }).unwrap();
    ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Prepare }).unwrap();
    ipc.apply(IpcMessage::Trigger { pipeline: 1, trigger: Trigger::Start }).unwrap();

    // Stream three periods through the doubling gain.
    let frames: Vec<u8> = (0..PERIOD_BYTES / 4).flat_map(|_| 500i32.to_le_bytes()).collect();
    let mut received = Vec::new();
    for _ in 0..3 {
        ipc.graph_mut()
            .host_endpoint_mut(ComponentId(10))
            .unwrap()
            .host_write(&frames);
        ipc.run_tick();

        let mut out = vec![0u8; PERIOD_BYTES];
        let n = ipc
            .graph_mut()
            .dai_endpoint_mut(ComponentId(12))
            .unwrap()
            .wire_read(&mut out);
        received.extend_from_slice(&out[..n]);
    }

    assert_eq!(received.len(), 3 * PERIOD_BYTES);
    for chunk in received.chunks_exact(4) {
        assert_eq!(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]), 1000);
    }
}

// ----------------------------------------------------------------------
// Dangling connection rejected at completion
// ----------------------------------------------------------------------

#[test]
fn test_isolated_component_rejected() {
    let mut ipc = handler();

    let err = ipc
        .apply_batch(vec![
            new_pipeline(1),
            IpcMessage::NewComponent { driver: HOST_UUID, id: 1, spec: spec(1) },
            IpcMessage::NewComponent { driver: GAIN_UUID, id: 2, spec: spec(1) },
            // No routes at all.
            IpcMessage::CompletePipeline { id: 1 },
        ])
        .unwrap_err();
    assert_eq!(err.code(), ApxError::GraphDisconnected);
    assert!(ipc.graph().pipeline(PipelineId(1)).is_none());
}

// ----------------------------------------------------------------------
// Duplicate ids rejected
// ----------------------------------------------------------------------

#[test]
fn test_duplicate_buffer_id_rejected() {
    let mut ipc = handler();
    ipc.apply(new_pipeline(1)).unwrap();
    ipc.apply(IpcMessage::NewBuffer { id: 10, capacity: 4096 }).unwrap();

    let err = ipc.apply(IpcMessage::NewBuffer { id: 10, capacity: 4096 }).unwrap_err();
    assert_eq!(err.code(), ApxError::Exists);
}
