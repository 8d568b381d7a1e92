//! Interactive rotation host.
//!
//! [`RotationHost`] owns a [`Vessel`] inside one tokio task. The task runs the
//! fixed tick on an interval and serves [`HostRequest`]s from any number of
//! [`HostHandle`]s in between ticks, so the vessel is never shared.

pub mod channel;
pub mod command;

use std::path::PathBuf;
use std::time::Duration;

use glam::{DQuat, DVec3};
use serde::Serialize;
use swivel_shared::config::ConfigError;
use swivel_shared::manager::DispatchReport;
use swivel_shared::{
    Assembly, Config, NodeJointFinder, RotateError, RotatorConfig, RotatorId, StructureEvent, Vessel, VesselStatus,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub use channel::HostRequest;
pub use command::{Command, HELP, parse_command};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Rotation error: {0}")]
    Rotate(#[from] RotateError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Host task is gone")]
    Closed,
}

pub struct RotationHost {
    vessel: Vessel,
    fixed_step: Duration,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl RotationHost {
    pub fn new(vessel: Vessel) -> Self {
        let fixed_step = Duration::from_secs_f64(vessel.config().simulation.fixed_step);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            vessel,
            fixed_step,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Move the host into its own task. The task hands the vessel back when
    /// it stops.
    pub fn spawn(self) -> (HostHandle, JoinHandle<Vessel>) {
        let (tx, rx) = mpsc::channel::<HostRequest>(16);
        let handle = HostHandle {
            tx,
            shutdown_tx: self.shutdown_tx.clone(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<HostRequest>) -> Vessel {
        let dt = self.fixed_step.as_secs_f64();
        let mut interval = tokio::time::interval(self.fixed_step);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let report = self.vessel.start();
        if !report.is_clean() {
            tracing::warn!("{} rotators failed to go off rails", report.failures.len());
        }
        tracing::info!("Rotation host running, fixed step {:?}", self.fixed_step);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Rotation host shutting down");
                    break;
                }
                request = rx.recv() => match request {
                    Some(request) => self.handle(request),
                    None => {
                        tracing::info!("All handles dropped, rotation host stopping");
                        break;
                    }
                },
                _ = interval.tick() => {
                    let report = self.vessel.fixed_update(dt, false);
                    for failure in &report.failures {
                        tracing::error!("{}: {}", failure.listener, failure.error);
                    }
                }
            }
        }
        self.vessel
    }

    fn handle(&mut self, request: HostRequest) {
        let vessel = &mut self.vessel;
        match request {
            HostRequest::Rotate {
                rotator,
                angle,
                speed,
                respond_to,
            } => {
                let result = match speed {
                    Some(speed) => vessel.enqueue_rotation(rotator, angle, speed),
                    None => vessel
                        .rotator(rotator)
                        .map(|r| r.speed())
                        .ok_or(RotateError::UnknownRotator(rotator))
                        .and_then(|speed| vessel.enqueue_rotation(rotator, angle, speed)),
                };
                let _ = respond_to.send(result.map_err(|e| e.to_string()));
            }
            HostRequest::Step {
                rotator,
                clockwise,
                respond_to,
            } => {
                let result = if clockwise {
                    vessel.rotate_clockwise(rotator)
                } else {
                    vessel.rotate_counterclockwise(rotator)
                };
                let _ = respond_to.send(result.map_err(|e| e.to_string()));
            }
            HostRequest::RotateToSnap {
                rotator,
                snap,
                respond_to,
            } => {
                let result = vessel.enqueue_rotation_to_snap(rotator, snap);
                let _ = respond_to.send(result.map_err(|e| e.to_string()));
            }
            HostRequest::Deploy { rotator, respond_to } => {
                let _ = respond_to.send(vessel.toggle_deploy(rotator).map_err(|e| e.to_string()));
            }
            HostRequest::Target {
                rotator,
                angle,
                respond_to,
            } => {
                let result = vessel.set_target_angle(rotator, angle);
                let _ = respond_to.send(result.map_err(|e| e.to_string()));
            }
            HostRequest::Airspeed { airspeed, respond_to } => {
                vessel.set_airspeed(airspeed);
                let _ = respond_to.send(());
            }
            HostRequest::Stop { rotator, respond_to } => {
                let _ = respond_to.send(vessel.brake(rotator).map_err(|e| e.to_string()));
            }
            HostRequest::Status { respond_to } => {
                let _ = respond_to.send(vessel.status());
            }
            HostRequest::Notify { event, respond_to } => {
                let _ = respond_to.send(vessel.notify(event));
            }
            HostRequest::Save { path, respond_to } => {
                let _ = respond_to.send(vessel.save(&path).map_err(|e| e.to_string()));
            }
            HostRequest::Load { path, respond_to } => {
                let _ = respond_to.send(vessel.load(&path).map_err(|e| e.to_string()));
            }
        }
    }
}

/// What a front-end prints for an executed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum HostReply {
    Accepted { accepted: bool },
    Status(VesselStatus),
    Dispatched { notified: usize, failures: usize },
    Done,
    Help { text: String },
    Quit,
}

/// Cloneable sender side of a running host.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostRequest>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HostHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HostRequest) -> Result<T, HostError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(make(resp_tx)).await.map_err(|_| HostError::Closed)?;
        resp_rx.await.map_err(|_| HostError::Closed)
    }

    pub async fn rotate(&self, rotator: RotatorId, angle: f64, speed: Option<f64>) -> Result<bool, HostError> {
        self.request(|respond_to| HostRequest::Rotate {
            rotator,
            angle,
            speed,
            respond_to,
        })
        .await?
        .map_err(HostError::Request)
    }

    pub async fn step(&self, rotator: RotatorId, clockwise: bool) -> Result<bool, HostError> {
        self.request(|respond_to| HostRequest::Step {
            rotator,
            clockwise,
            respond_to,
        })
        .await?
        .map_err(HostError::Request)
    }

    pub async fn rotate_to_snap(&self, rotator: RotatorId, snap: f64) -> Result<bool, HostError> {
        self.request(|respond_to| HostRequest::RotateToSnap {
            rotator,
            snap,
            respond_to,
        })
        .await?
        .map_err(HostError::Request)
    }

    pub async fn deploy(&self, rotator: RotatorId) -> Result<bool, HostError> {
        self.request(|respond_to| HostRequest::Deploy { rotator, respond_to })
            .await?
            .map_err(HostError::Request)
    }

    pub async fn target(&self, rotator: RotatorId, angle: f64) -> Result<bool, HostError> {
        self.request(|respond_to| HostRequest::Target {
            rotator,
            angle,
            respond_to,
        })
        .await?
        .map_err(HostError::Request)
    }

    pub async fn set_airspeed(&self, airspeed: Option<f64>) -> Result<(), HostError> {
        self.request(|respond_to| HostRequest::Airspeed { airspeed, respond_to })
            .await
    }

    pub async fn stop(&self, rotator: RotatorId) -> Result<bool, HostError> {
        self.request(|respond_to| HostRequest::Stop { rotator, respond_to })
            .await?
            .map_err(HostError::Request)
    }

    pub async fn status(&self) -> Result<VesselStatus, HostError> {
        self.request(|respond_to| HostRequest::Status { respond_to }).await
    }

    pub async fn notify(&self, event: StructureEvent) -> Result<DispatchReport, HostError> {
        self.request(|respond_to| HostRequest::Notify { event, respond_to })
            .await
    }

    pub async fn save(&self, path: impl Into<PathBuf>) -> Result<(), HostError> {
        let path = path.into();
        self.request(|respond_to| HostRequest::Save { path, respond_to })
            .await?
            .map_err(HostError::Request)
    }

    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<DispatchReport, HostError> {
        let path = path.into();
        self.request(|respond_to| HostRequest::Load { path, respond_to })
            .await?
            .map_err(HostError::Request)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run one parsed front-end command against the host.
    pub async fn execute(&self, command: Command) -> Result<HostReply, HostError> {
        let accepted = |accepted| HostReply::Accepted { accepted };
        let dispatched = |report: DispatchReport| HostReply::Dispatched {
            notified: report.notified,
            failures: report.failures.len(),
        };
        Ok(match command {
            Command::Rotate { rotator, angle, speed } => accepted(self.rotate(rotator, angle, speed).await?),
            Command::Clockwise(rotator) => accepted(self.step(rotator, true).await?),
            Command::Counterclockwise(rotator) => accepted(self.step(rotator, false).await?),
            Command::Snap { rotator, snap } => accepted(self.rotate_to_snap(rotator, snap).await?),
            Command::Deploy(rotator) => accepted(self.deploy(rotator).await?),
            Command::Target { rotator, angle } => accepted(self.target(rotator, angle).await?),
            Command::Airspeed(airspeed) => {
                self.set_airspeed(airspeed).await?;
                HostReply::Done
            }
            Command::Stop(rotator) => accepted(self.stop(rotator).await?),
            Command::Status => HostReply::Status(self.status().await?),
            Command::Notify(event) => dispatched(self.notify(event).await?),
            Command::Save(path) => {
                self.save(path).await?;
                HostReply::Done
            }
            Command::Load(path) => dispatched(self.load(path).await?),
            Command::Help => HostReply::Help { text: HELP.to_string() },
            Command::Quit => {
                self.shutdown();
                HostReply::Quit
            }
        })
    }
}

/// Base, a hinged arm and a wrist on its tip, with one auto-lock strut from
/// the tip back to the base. Hinge is R1, wrist is R2.
pub fn demo_vessel(config: Config) -> Result<Vessel, HostError> {
    let mut assembly = Assembly::new(1, "demo");
    let base = assembly.add_body("base", DQuat::IDENTITY, DVec3::ZERO);
    let arm = assembly.add_body("arm", DQuat::IDENTITY, DVec3::new(0.0, 1.0, 0.0));
    let tip = assembly.add_body("tip", DQuat::IDENTITY, DVec3::new(0.0, 2.0, 0.0));
    let strut = assembly.add_body("strut", DQuat::IDENTITY, DVec3::new(1.0, 1.0, 0.0));
    assembly.attach(arm, base, &[DVec3::new(0.0, -0.5, 0.0)])?;
    assembly.attach(tip, arm, &[DVec3::new(0.0, -0.5, 0.0)])?;
    assembly.attach(strut, base, &[])?;
    assembly.add_auto_lock(tip, strut)?;

    let mut vessel = Vessel::new(assembly, config);
    vessel.add_rotator(arm, Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))?;
    let wrist = RotatorConfig {
        rotation_step: 0.0,
        ..vessel.config().rotator.clone()
    };
    vessel.add_rotator_with(tip, wrist, Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))?;
    Ok(vessel)
}
