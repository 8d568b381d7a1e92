//! Per-vessel structural change coordinator.
//!
//! The host reports raw structural notifications as [`StructureEvent`]s.
//! [`VesselMotionManager::route`] filters them for relevance, collapses
//! repeated "before change" signals within one tick and turns the survivors
//! into a [`Dispatch`]. [`dispatch`] then calls every registered listener in
//! order, isolating failures so one broken listener never stops the rest.
//!
//! The manager also owns the vessel-wide count of joints in motion, which
//! gates the auto-lock set: locks come back only once nothing rotates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assembly::{Assembly, BodyId};
use crate::error::RotateError;
use crate::rotator::{RotatorEnv, RotatorId};

/// Raw structural notification as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructureEvent {
    JointUpdate,
    Couple { from: BodyId, to: BodyId },
    CoupleComplete { from: BodyId, to: BodyId },
    Decouple { part: BodyId },
    DecoupleComplete { part: BodyId },
    Docking { vessel_a: u32, vessel_b: u32 },
    DockingComplete { from: BodyId, to: BodyId },
    Undock { part: BodyId },
    UndockComplete { part: BodyId },
    SameVesselDock { from: BodyId, to: BodyId },
    SameVesselUndock { from: BodyId, to: BodyId },
    GoOnRails,
    GoOffRails,
}

impl StructureEvent {
    pub fn label(&self) -> &'static str {
        match self {
            StructureEvent::JointUpdate => "JointUpdate",
            StructureEvent::Couple { .. } => "Couple",
            StructureEvent::CoupleComplete { .. } => "CoupleComplete",
            StructureEvent::Decouple { .. } => "Decouple",
            StructureEvent::DecoupleComplete { .. } => "DecoupleComplete",
            StructureEvent::Docking { .. } => "Docking",
            StructureEvent::DockingComplete { .. } => "DockingComplete",
            StructureEvent::Undock { .. } => "Undock",
            StructureEvent::UndockComplete { .. } => "UndockComplete",
            StructureEvent::SameVesselDock { .. } => "SameVesselDock",
            StructureEvent::SameVesselUndock { .. } => "SameVesselUndock",
            StructureEvent::GoOnRails => "GoOnRails",
            StructureEvent::GoOffRails => "GoOffRails",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    OnRails,
    OffRails,
    BeforeChange,
    AfterChange,
    AfterSameVesselDock,
    AfterSameVesselUndock,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::OnRails => "ON RAILS",
            Phase::OffRails => "OFF RAILS",
            Phase::BeforeChange => "BEFORE CHANGE",
            Phase::AfterChange => "AFTER CHANGE",
            Phase::AfterSameVesselDock => "AFTER SV DOCK",
            Phase::AfterSameVesselUndock => "AFTER SV UNDOCK",
        }
    }
}

/// Which listeners a dispatch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Bodies(BodyId, BodyId),
}

impl Scope {
    pub fn includes(&self, body: BodyId) -> bool {
        match self {
            Scope::All => true,
            Scope::Bodies(a, b) => body == *a || body == *b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub phase: Phase,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerFailure {
    pub listener: RotatorId,
    pub error: String,
}

/// Outcome of one dispatch: how many listeners ran and which ones failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub notified: usize,
    pub failures: Vec<ListenerFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.notified += other.notified;
        self.failures.extend(other.failures);
    }
}

/// Implemented by every joint owner registered with a vessel.
pub trait StructureChangeListener {
    fn listener_id(&self) -> RotatorId;
    fn body(&self) -> BodyId;
    fn wants_verbose_events(&self) -> bool;
    fn on_rails(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError>;
    fn off_rails(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError>;
    fn before_change(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError>;
    fn after_change(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError>;
}

/// Single-tick de-duplication record.
#[derive(Debug, Clone, Default)]
struct StructureChangeInfo {
    part: Option<BodyId>,
    last_reset_tick: Option<u64>,
    last_label: String,
}

impl StructureChangeInfo {
    fn last_label(&self) -> &str {
        if self.last_label.is_empty() { "Init" } else { &self.last_label }
    }

    fn reset(&mut self, label: &str, tick: u64) {
        debug!("StructureChangeInfo.reset() {} after {}", label, self.last_label());
        *self = StructureChangeInfo {
            part: None,
            last_reset_tick: Some(tick),
            last_label: format!("reset {}", label),
        };
    }

    /// Forget the last served tick; used on rails transitions.
    fn clear(&mut self, label: &str) {
        debug!("StructureChangeInfo.clear() {} after {}", label, self.last_label());
        *self = StructureChangeInfo {
            last_label: format!("clear {}", label),
            ..Default::default()
        };
    }

    fn is_repeated(&mut self, label: &str, tick: u64) -> bool {
        let repeated = self.last_reset_tick == Some(tick);
        if repeated {
            debug!("StructureChangeInfo.is_repeated(): repeated {} after {}", label, self.last_label());
        } else {
            debug!("StructureChangeInfo.is_repeated(): set {} after {}", label, self.last_label());
            self.last_label = label.to_string();
        }
        repeated
    }
}

#[derive(Debug, Clone, Default)]
pub struct VesselMotionManager {
    rot_count: u32,
    on_rails: bool,
    verbose_events: bool,
    change_info: StructureChangeInfo,
    deferred: Vec<(u64, Dispatch)>,
}

impl VesselMotionManager {
    /// A new manager starts on rails: nothing moves until the vessel goes
    /// off rails.
    pub fn new() -> Self {
        Self {
            on_rails: true,
            ..Default::default()
        }
    }

    pub fn rot_count(&self) -> u32 {
        self.rot_count
    }

    pub fn is_on_rails(&self) -> bool {
        self.on_rails
    }

    pub fn verbose_events(&self) -> bool {
        self.verbose_events
    }

    pub fn set_verbose_events(&mut self, verbose: bool) {
        if verbose != self.verbose_events {
            info!("VesselMotionManager: verbose_events = {}", verbose);
        }
        self.verbose_events = verbose;
    }

    pub fn reset_rot_count(&mut self) {
        if self.verbose_events && self.rot_count != 0 {
            info!("VesselMotionManager.reset_rot_count(): {} -> RESET", self.rot_count);
        }
        self.rot_count = 0;
    }

    /// Apply `delta` to the in-motion count, never going below zero. The
    /// auto-locks are restored when the count drops back to zero.
    pub fn change_count(&mut self, delta: i32, assembly: &mut Assembly) -> u32 {
        let ret = (self.rot_count as i64 + delta as i64).max(0) as u32;

        if self.rot_count == 0 && delta > 0 {
            self.phase("START");
        }
        if self.verbose_events && delta != 0 {
            info!("VesselMotionManager.change_count({}): {} -> {}", delta, self.rot_count, ret);
        }
        if ret == 0 && self.rot_count > 0 {
            info!("VesselMotionManager: securing auto-locks");
            assembly.restore_all_locks();
        }
        if ret == 0 && delta < 0 {
            self.phase("STOP");
        }

        self.rot_count = ret;
        ret
    }

    pub fn phase(&self, msg: &str) {
        if self.verbose_events {
            info!("{} {} {}", "-".repeat(10), msg, "-".repeat(60usize.saturating_sub(msg.len())));
        }
    }

    fn cares_body(&self, body: BodyId, assembly: &Assembly, use_change_info: bool) -> bool {
        (use_change_info && self.change_info.part == Some(body)) || assembly.contains(body)
    }

    /// Relevance filter for a raw event.
    pub fn cares(&self, event: &StructureEvent, assembly: &Assembly) -> bool {
        let ret = match event {
            StructureEvent::JointUpdate | StructureEvent::GoOnRails | StructureEvent::GoOffRails => true,
            StructureEvent::Couple { from, to }
            | StructureEvent::SameVesselDock { from, to }
            | StructureEvent::SameVesselUndock { from, to } => {
                self.cares_body(*from, assembly, false) || self.cares_body(*to, assembly, false)
            }
            StructureEvent::CoupleComplete { from, to } | StructureEvent::DockingComplete { from, to } => {
                self.cares_body(*from, assembly, true) || self.cares_body(*to, assembly, true)
            }
            StructureEvent::Decouple { part } | StructureEvent::Undock { part } => {
                self.cares_body(*part, assembly, false)
            }
            StructureEvent::DecoupleComplete { part } | StructureEvent::UndockComplete { part } => {
                self.cares_body(*part, assembly, true)
            }
            StructureEvent::Docking { vessel_a, vessel_b } => assembly.id == *vessel_a || assembly.id == *vessel_b,
        };
        if self.verbose_events {
            debug!("VesselMotionManager.cares({}) = {}", event.label(), ret);
        }
        ret
    }

    fn dead_vessel(&self, assembly: &Assembly) -> bool {
        let dead = !assembly.bodies().any(|(_, b)| b.attached);
        if dead && self.verbose_events {
            debug!("VesselMotionManager: no attached bodies, event ignored");
        }
        dead
    }

    /// Turn a raw event into the dispatch it calls for, if any. Updates the
    /// rails state and de-duplication record as a side effect.
    pub fn route(&mut self, event: &StructureEvent, assembly: &mut Assembly, tick: u64) -> Option<Dispatch> {
        if self.verbose_events {
            debug!("VesselMotionManager.route({:?})", event);
        }
        if self.dead_vessel(assembly) || !self.cares(event, assembly) {
            return None;
        }

        let all = |phase| Some(Dispatch { phase, scope: Scope::All });
        match event {
            StructureEvent::GoOnRails => {
                self.change_info.clear("OnRails");
                self.on_rails = true;
                all(Phase::OnRails)
            }
            StructureEvent::GoOffRails => {
                self.reset_rot_count();
                assembly.restore_all_locks();
                self.change_info.clear("OffRails");
                self.on_rails = false;
                all(Phase::OffRails)
            }
            StructureEvent::JointUpdate
            | StructureEvent::Couple { .. }
            | StructureEvent::Docking { .. }
            | StructureEvent::Decouple { .. }
            | StructureEvent::Undock { .. } => {
                let repeated = self.change_info.is_repeated(event.label(), tick);
                if !repeated {
                    self.change_info.reset("BeforeChange", tick);
                }
                if let StructureEvent::Decouple { part } | StructureEvent::Undock { part } = event {
                    self.change_info.part = Some(*part);
                }
                if repeated { None } else { all(Phase::BeforeChange) }
            }
            StructureEvent::CoupleComplete { .. }
            | StructureEvent::DecoupleComplete { .. }
            | StructureEvent::DockingComplete { .. }
            | StructureEvent::UndockComplete { .. } => all(Phase::AfterChange),
            StructureEvent::SameVesselDock { from, to } => {
                self.defer(tick + 1, Dispatch { phase: Phase::AfterSameVesselDock, scope: Scope::Bodies(*from, *to) });
                None
            }
            StructureEvent::SameVesselUndock { from, to } => {
                self.defer(tick + 1, Dispatch { phase: Phase::AfterSameVesselUndock, scope: Scope::Bodies(*from, *to) });
                None
            }
        }
    }

    fn defer(&mut self, due: u64, dispatch: Dispatch) {
        if self.verbose_events {
            debug!("VesselMotionManager: {} deferred to tick {}", dispatch.phase.label(), due);
        }
        self.deferred.push((due, dispatch));
    }

    /// Remove and return the deferred dispatches due at or before `tick`.
    pub fn take_due(&mut self, tick: u64) -> Vec<Dispatch> {
        let (due, later): (Vec<_>, Vec<_>) = self.deferred.drain(..).partition(|(t, _)| *t <= tick);
        self.deferred = later;
        due.into_iter().map(|(_, d)| d).collect()
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }
}

/// Call `f` on every listener; a failure is logged and recorded, and the
/// remaining listeners still run.
pub fn map_listeners<'l, L, I, F>(listeners: I, label: &str, mut f: F) -> DispatchReport
where
    L: StructureChangeListener + 'l,
    I: IntoIterator<Item = &'l mut L>,
    F: FnMut(&mut L) -> Result<(), RotateError>,
{
    let mut report = DispatchReport::default();
    for listener in listeners {
        report.notified += 1;
        if let Err(e) = f(listener) {
            warn!("{}: listener {} failed: {}", label, listener.listener_id(), e);
            report.failures.push(ListenerFailure {
                listener: listener.listener_id(),
                error: e.to_string(),
            });
        }
    }
    report
}

/// Run one dispatch over the live listener registry.
pub fn dispatch<L: StructureChangeListener>(
    dispatch: Dispatch,
    listeners: &mut BTreeMap<RotatorId, L>,
    env: &mut RotatorEnv<'_>,
) -> DispatchReport {
    let verbose = listeners.values().any(|l| l.wants_verbose_events());
    env.manager.set_verbose_events(verbose);
    if verbose {
        debug!("VesselMotionManager: {} listeners", listeners.len());
    }

    let label = dispatch.phase.label();
    env.manager.phase(&format!("BEGIN {}", label));
    let selected = listeners.values_mut().filter(|l| dispatch.scope.includes(l.body()));
    let report = map_listeners(selected, label, |l| match dispatch.phase {
        Phase::OnRails => l.on_rails(env),
        Phase::OffRails => l.off_rails(env),
        Phase::BeforeChange => l.before_change(env),
        Phase::AfterChange | Phase::AfterSameVesselDock | Phase::AfterSameVesselUndock => l.after_change(env),
    });
    env.manager.phase(&format!("END {}", label));
    report
}
