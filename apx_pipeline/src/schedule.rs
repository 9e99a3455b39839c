//! LL and DP scheduling.
//!
//! The LL side is a cooperative tick: [`Scheduler::run_tick`] walks every
//! active pipeline's components in topological order, producer pipelines
//! before consumer pipelines, one `copy` per component per tick. The
//! walk never blocks and never allocates; a component answering
//! PATH_STOP ends the pipeline's pass for this tick, and an error runs
//! the xrun policy.
//!
//! The DP side is a small worker pool circulating [`DpTask`]s through a
//! channel: a task whose queues have data runs, one that is starved is
//! parked briefly and requeued. Exchange with the LL graph happens only
//! through the DP queues the adapter created at prepare time.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use apx_core::{ApxError, StatusHandle};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

use crate::{
    adapter::DpTask,
    component::{ComponentId, TriggerOutcome},
    constants::DP_WORKERS,
    error::Result,
    graph::GraphStore,
    module::CopyOutcome,
    pipeline::PipelineId,
    state::{ComponentState, Trigger},
    xrun::{XrunAction, XrunMonitor},
};

/// The LL tick driver plus the DP pool.
pub struct Scheduler {
    /// Pipelines in execution order: producers before consumers.
    order: Vec<PipelineId>,
    triggers_tx: Sender<(PipelineId, Trigger)>,
    triggers_rx: Receiver<(PipelineId, Trigger)>,
    monitors: HashMap<PipelineId, XrunMonitor>,
    /// Consecutive zero-progress ticks per active pipeline.
    stalled: HashMap<PipelineId, u32>,
    tick: u64,
    status: StatusHandle,
    dp: DpPool,
    /// Measure wall-clock tick duration against the pipeline deadline.
    /// Off by default so simulated runs stay deterministic.
    enforce_deadline: bool,
}

impl Scheduler {
    pub fn new(status: StatusHandle) -> Self {
        let (triggers_tx, triggers_rx) = unbounded();
        Self {
            order: Vec::new(),
            triggers_tx,
            triggers_rx,
            monitors: HashMap::new(),
            stalled: HashMap::new(),
            tick: 0,
            status,
            dp: DpPool::new(DP_WORKERS),
            enforce_deadline: false,
        }
    }

    /// Enables wall-clock deadline enforcement.
    pub fn with_deadline_enforcement(mut self) -> Self {
        self.enforce_deadline = true;
        self
    }

    /// Ticks completed so far.
    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Xruns recorded for a pipeline.
    pub fn xrun_total(&self, id: PipelineId) -> u64 {
        self.monitors.get(&id).map(|m| m.total()).unwrap_or(0)
    }

    /// Posts a trigger for the next scheduling point.
    pub fn post_trigger(&self, id: PipelineId, trigger: Trigger) {
        let _ = self.triggers_tx.send((id, trigger));
    }

    /// Applies a trigger immediately (between ticks). IPC uses this to
    /// return a synchronous reply.
    pub fn trigger_now(&mut self, graph: &mut GraphStore, id: PipelineId, trigger: Trigger) -> Result<TriggerOutcome> {
        let outcome = graph.trigger_pipeline(id, trigger)?;

        match (trigger, outcome) {
            (Trigger::Start | Trigger::Release, TriggerOutcome::Moved(ComponentState::Active)) => {
                self.monitors.entry(id).or_default();
                self.spawn_dp_tasks(graph, id);
                self.refresh_order(graph);
            }
            (Trigger::Reset, _) => {
                self.stop_dp_tasks(graph, id);
                if let Some(m) = self.monitors.get_mut(&id) {
                    m.clear();
                }
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Recomputes the pipeline execution order so that, within one tick,
    /// a pipeline producing into a shared buffer runs before the pipeline
    /// consuming from it. Priority breaks ties.
    pub fn refresh_order(&mut self, graph: &GraphStore) {
        let mut ids: Vec<PipelineId> = graph.pipelines().filter(|p| p.is_completed()).map(|p| p.id()).collect();
        // Deterministic starting point: priority first, id second.
        ids.sort_by_key(|id| {
            let p = graph.pipeline(*id).expect("listed pipeline");
            (core::cmp::Reverse(p.config().priority), id.0)
        });

        // Producer-before-consumer constraint from cross-pipeline buffers.
        let mut order = Vec::with_capacity(ids.len());
        let mut placed: HashSet<PipelineId> = HashSet::new();
        let mut remaining = ids.clone();
        while !remaining.is_empty() {
            let before = order.len();
            remaining.retain(|id| {
                let deps_met = graph.pipelines().all(|other| {
                    if other.id() == *id || placed.contains(&other.id()) {
                        return true;
                    }
                    // `other` unplaced: fine unless it produces into us.
                    !produces_into(graph, other.id(), *id)
                });
                if deps_met {
                    order.push(*id);
                    placed.insert(*id);
                    false
                } else {
                    true
                }
            });
            if order.len() == before {
                // Cross-pipeline cycle; fall back to priority order.
                log::warn!("cross-pipeline buffer cycle, falling back to priority order");
                order.extend(remaining.drain(..));
            }
        }
        self.order = order;
    }

    /// Runs one LL tick over every active pipeline.
    pub fn run_tick(&mut self, graph: &mut GraphStore) {
        // Honour triggers posted since the last scheduling point.
        while let Ok((id, trigger)) = self.triggers_rx.try_recv() {
            if let Err(e) = self.trigger_now(graph, id, trigger) {
                log::warn!("posted trigger {trigger:?} on {id:?} failed: {e}");
                self.status.set_status(e.code().code());
            }
        }

        for i in 0..self.order.len() {
            let pid = self.order[i];
            let active = graph.pipeline(pid).is_some_and(|p| p.state() == ComponentState::Active);
            if !active {
                self.stalled.remove(&pid);
                continue;
            }
            let moved = self.walk_pipeline(graph, pid);

            // Stall watchdog: an active pipeline that moves nothing for
            // consecutive ticks has missed its data deadline even when
            // the walk itself finished in time.
            if moved == 0 {
                let streak = self.stalled.entry(pid).or_insert(0);
                *streak += 1;
                if *streak >= crate::constants::STALL_TICKS_BEFORE_XRUN {
                    self.stalled.insert(pid, 0);
                    log::warn!("pipeline {pid:?} stalled for {} ticks", crate::constants::STALL_TICKS_BEFORE_XRUN);
                    self.handle_xrun(graph, pid);
                }
            } else {
                self.stalled.insert(pid, 0);
            }
        }
        self.tick += 1;
    }

    /// Walks one pipeline; returns the bytes moved across all copies.
    fn walk_pipeline(&mut self, graph: &mut GraphStore, pid: PipelineId) -> usize {
        let started = self.enforce_deadline.then(Instant::now);
        let len = graph.pipeline(pid).map(|p| p.execution_order().len()).unwrap_or(0);
        let mut moved = 0;

        for i in 0..len {
            let cid = match graph.pipeline(pid).map(|p| p.execution_order()[i]) {
                Some(cid) => cid,
                None => return moved,
            };
            match graph.copy_component(cid) {
                Ok(CopyOutcome::Processed { bytes }) => moved += bytes,
                Ok(CopyOutcome::PathStop) => return moved,
                Err(e) => {
                    log::warn!("copy failed at component {cid:?}: {e}");
                    self.handle_xrun(graph, pid);
                    return moved;
                }
            }
        }

        if let Some(started) = started {
            let deadline_us = graph.pipeline(pid).map(|p| p.config().deadline_us).unwrap_or(0);
            if deadline_us > 0 && started.elapsed() > Duration::from_micros(deadline_us) {
                log::warn!("pipeline {pid:?} exceeded its {deadline_us}us deadline");
                self.handle_xrun(graph, pid);
            }
        }
        moved
    }

    /// Xrun policy: first offence re-arms the pipeline in place with a
    /// stop, a no-op prepare, and a start; a repeat offence inside the
    /// window stops it and reports to the host.
    fn handle_xrun(&mut self, graph: &mut GraphStore, pid: PipelineId) {
        let action = self
            .monitors
            .entry(pid)
            .or_default()
            .record(self.tick, self.status.as_ref());

        match action {
            XrunAction::Recover => {
                log::warn!("xrun on pipeline {pid:?}, recovering");
                let recovered = graph
                    .trigger_pipeline(pid, Trigger::Stop)
                    .and_then(|_| graph.trigger_pipeline(pid, Trigger::Prepare))
                    .and_then(|_| graph.trigger_pipeline(pid, Trigger::Start));
                if let Err(e) = recovered {
                    log::warn!("xrun recovery on {pid:?} failed: {e}");
                    self.status.set_status(e.code().code());
                }
            }
            XrunAction::ReportAndStop => {
                log::warn!("repeated xrun on pipeline {pid:?}, stopping");
                let _ = graph.trigger_pipeline(pid, Trigger::Stop);
            }
        }
    }

    fn spawn_dp_tasks(&mut self, graph: &mut GraphStore, pid: PipelineId) {
        let members: Vec<ComponentId> = graph.pipeline(pid).map(|p| p.members().to_vec()).unwrap_or_default();
        for cid in members {
            if let Some(task) = graph.component_mut(cid).and_then(|c| c.take_dp_task()) {
                log::debug!("spawning dp task for component {cid:?} ({}us period)", task.period_us);
                self.dp.spawn(task);
            }
        }
    }

    fn stop_dp_tasks(&mut self, graph: &GraphStore, pid: PipelineId) {
        if let Some(p) = graph.pipeline(pid) {
            for cid in p.members() {
                self.dp.stop(*cid);
            }
        }
    }

    /// Stops the DP pool; further ticks are LL-only.
    pub fn shutdown(&mut self) {
        self.dp.shutdown();
    }
}

// ----------------------------------------------------------------------
// DP pool
// ----------------------------------------------------------------------

/// `true` when pipeline `producer` writes into a buffer consumed by a
/// component of pipeline `consumer`.
fn produces_into(graph: &GraphStore, producer: PipelineId, consumer: PipelineId) -> bool {
    let Some(p) = graph.pipeline(producer) else {
        return false;
    };
    p.members().iter().any(|cid| {
        graph.component(*cid).is_some_and(|comp| {
            comp.sink_attachments().iter().any(|att| {
                graph
                    .edge(att.buffer)
                    .and_then(|e| e.consumer)
                    .and_then(|c| graph.component(c))
                    .is_some_and(|c| c.pipeline() == consumer)
            })
        })
    })
}

/// Worker pool executing deferred module passes.
///
/// Tasks circulate through one channel shared by all workers; whichever
/// worker is free picks the next runnable task, which is as much work
/// stealing as this scale needs.
struct DpPool {
    injector: Sender<DpTask>,
    feedback: Receiver<DpTask>,
    stopped: Arc<Mutex<HashSet<ComponentId>>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DpPool {
    fn new(worker_count: usize) -> Self {
        let (injector, feedback) = unbounded::<DpTask>();
        let stopped = Arc::new(Mutex::new(HashSet::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count.max(1))
            .map(|n| {
                let rx = feedback.clone();
                let tx = injector.clone();
                let stopped = Arc::clone(&stopped);
                let shutdown = Arc::clone(&shutdown);
                thread::Builder::new()
                    .name(format!("apx-dp-{n}"))
                    .spawn(move || dp_worker(rx, tx, stopped, shutdown))
                    .expect("spawn dp worker")
            })
            .collect();

        Self {
            injector,
            feedback,
            stopped,
            shutdown,
            workers,
        }
    }

    fn spawn(&self, task: DpTask) {
        self.stopped.lock().remove(&task.component);
        let _ = self.injector.send(task);
    }

    fn stop(&self, component: ComponentId) {
        self.stopped.lock().insert(component);
    }

    fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // Drain circulating tasks so queue halves drop.
        while self.feedback.try_recv().is_ok() {}
    }
}

impl Drop for DpPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dp_worker(
    rx: Receiver<DpTask>,
    tx: Sender<DpTask>,
    stopped: Arc<Mutex<HashSet<ComponentId>>>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        match rx.recv_timeout(Duration::from_millis(2)) {
            Ok(mut task) => {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                if stopped.lock().remove(&task.component) {
                    // Dropped: queue halves close with the task.
                    continue;
                }
                match task.run_once() {
                    Ok(_) => {}
                    Err(ApxError::NoData) | Err(ApxError::NoSpace) => {
                        // Starved or blocked: wait for the LL shuttle.
                        thread::sleep(Duration::from_micros(200));
                    }
                    Err(e) => {
                        log::warn!("dp task for {:?} failed: {e}", task.component);
                    }
                }
                let _ = tx.send(task);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
