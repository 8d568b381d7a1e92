pub mod event_queue;

use serde::Serialize;
use swivel_shared::{BodyId, StructureEvent};
use tracing::{info, warn};

use crate::scenario::{Action, Scenario, ScenarioError, World};
use crate::simulator::event_queue::SimEventQueue;

/// One output row: the state of a driven joint after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointRecord {
    pub tick: u64,
    pub joint: String,
    pub angle: f64,
    pub velocity: f64,
    pub target: Option<f64>,
    pub rotating: bool,
    pub in_motion_count: u32,
    pub engaged_locks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimSummary {
    pub ticks: u64,
    pub actions: usize,
    pub rejected: usize,
    pub listener_failures: usize,
}

pub struct Simulator {
    world: World,
    queue: SimEventQueue,
    dt: f64,
    summary: SimSummary,
}

impl Simulator {
    /// Build the scenario world, schedule its script and go off rails.
    pub fn new(scenario: &Scenario) -> Result<Self, ScenarioError> {
        let mut world = scenario.build()?;
        let mut queue = SimEventQueue::new();
        for event in &scenario.events {
            queue.push(event.tick, event.action.clone());
        }
        let report = world.vessel.start();
        info!(
            "Simulator initialized: {} bodies, {} rotators, {} scheduled actions",
            world.bodies.len(),
            world.rotators.len(),
            queue.len()
        );
        let summary = SimSummary {
            listener_failures: report.failures.len(),
            ..Default::default()
        };
        Ok(Self {
            world,
            queue,
            dt: scenario.config.simulation.fixed_step,
            summary,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn summary(&self) -> &SimSummary {
        &self.summary
    }

    pub fn tick(&self) -> u64 {
        self.world.vessel.tick()
    }

    /// Apply the actions due this tick, run one fixed tick and report every
    /// driven joint.
    pub fn step(&mut self) -> Result<Vec<JointRecord>, ScenarioError> {
        let tick = self.tick() + 1;
        while let Some(event) = self.queue.pop_due(tick) {
            self.summary.actions += 1;
            if !self.apply(&event.action)? {
                warn!("tick {}: {:?} rejected", tick, event.action);
                self.summary.rejected += 1;
            }
        }
        let report = self.world.vessel.fixed_update(self.dt, false);
        self.summary.listener_failures += report.failures.len();
        self.summary.ticks += 1;
        Ok(self.records())
    }

    /// Run `ticks` ticks, handing every record to `sink`.
    pub fn run<F>(&mut self, ticks: u64, mut sink: F) -> Result<&SimSummary, ScenarioError>
    where
        F: FnMut(&JointRecord) -> Result<(), ScenarioError>,
    {
        for _ in 0..ticks {
            for record in self.step()? {
                sink(&record)?;
            }
        }
        info!("Simulation finished: {:?}", self.summary);
        Ok(&self.summary)
    }

    fn records(&self) -> Vec<JointRecord> {
        let vessel = &self.world.vessel;
        let assembly = vessel.assembly();
        assembly
            .joints()
            .filter_map(|(id, _)| vessel.joint_motion(id))
            .map(|jm| JointRecord {
                tick: vessel.tick(),
                joint: jm.joint().to_string(),
                angle: jm.rotation_angle(assembly),
                velocity: jm.velocity(),
                target: jm.current().map(|anim| anim.motion().target()),
                rotating: jm.is_rotating(),
                in_motion_count: vessel.in_motion_count(),
                engaged_locks: assembly.engaged_locks(),
            })
            .collect()
    }

    fn apply(&mut self, action: &Action) -> Result<bool, ScenarioError> {
        let world = &mut self.world;
        let accepted = match action {
            Action::Rotate { rotator, angle, speed } => {
                let id = world.rotator(rotator)?;
                let speed = match speed {
                    Some(s) => *s,
                    None => world.vessel.rotator(id).map(|r| r.speed()).unwrap_or(1.0),
                };
                world.vessel.enqueue_rotation(id, *angle, speed)?
            }
            Action::RotateCw { rotator } => {
                let id = world.rotator(rotator)?;
                world.vessel.rotate_clockwise(id)?
            }
            Action::RotateCcw { rotator } => {
                let id = world.rotator(rotator)?;
                world.vessel.rotate_counterclockwise(id)?
            }
            Action::Snap { rotator, snap } => {
                let id = world.rotator(rotator)?;
                world.vessel.enqueue_rotation_to_snap(id, *snap)?
            }
            Action::Stop { rotator } => {
                let id = world.rotator(rotator)?;
                world.vessel.brake(id)?
            }
            Action::Deploy { rotator } => {
                let id = world.rotator(rotator)?;
                world.vessel.toggle_deploy(id)?
            }
            Action::Target { rotator, angle } => {
                let id = world.rotator(rotator)?;
                world.vessel.set_target_angle(id, *angle)?
            }
            Action::Airspeed { airspeed } => {
                world.vessel.set_airspeed(*airspeed);
                true
            }
            Action::Notify { event } => {
                let report = world.vessel.notify(event.clone());
                self.summary.listener_failures += report.failures.len();
                true
            }
            Action::Detach { body } => {
                let part = world.body(body)?;
                self.summary.listener_failures += detach(world, part)?;
                true
            }
            Action::Reattach { body, parent, anchors } => {
                let child = world.body(body)?;
                let parent = world.body(parent)?;
                let vessel = &mut world.vessel;
                let mut failures = vessel.notify(StructureEvent::Couple { from: child, to: parent }).failures.len();
                vessel.assembly_mut().reattach(child, parent, anchors)?;
                failures += vessel
                    .notify(StructureEvent::CoupleComplete { from: child, to: parent })
                    .failures
                    .len();
                self.summary.listener_failures += failures;
                true
            }
            Action::Save { path } => {
                world.vessel.save(path)?;
                true
            }
        };
        Ok(accepted)
    }
}

fn detach(world: &mut World, part: BodyId) -> Result<usize, ScenarioError> {
    let vessel = &mut world.vessel;
    let mut failures = vessel.notify(StructureEvent::Decouple { part }).failures.len();
    vessel.assembly_mut().detach(part)?;
    failures += vessel.notify(StructureEvent::DecoupleComplete { part }).failures.len();
    Ok(failures)
}
