//! Scenario files: an assembly, its joint owners and a script of timed
//! actions, all in one TOML document.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use glam::{DQuat, DVec3};
use serde::Deserialize;
use swivel_shared::config::ConfigError;
use swivel_shared::{
    Assembly, BodyId, Config, NodeJointFinder, ResourceKind, ResourcePool, RotateError, RotatorConfig, RotatorId,
    StructureEvent, Vessel,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("scenario parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid scenario config: {0}")]
    Config(#[from] ConfigError),
    #[error("unknown body '{0}'")]
    UnknownBody(String),
    #[error("unknown rotator '{0}'")]
    UnknownRotator(String),
    #[error("duplicate name '{0}'")]
    Duplicate(String),
    #[error(transparent)]
    Rotate(#[from] RotateError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BodySpec {
    pub name: String,
    #[serde(default)]
    pub position: DVec3,
    /// Quaternion as `[x, y, z, w]`.
    #[serde(default)]
    pub rotation: DQuat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JointSpec {
    pub child: String,
    pub parent: String,
    #[serde(default)]
    pub anchors: Vec<DVec3>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockSpec {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotatorSpec {
    pub name: String,
    pub body: String,
    pub axis: DVec3,
    #[serde(default)]
    pub pivot: DVec3,
    #[serde(default)]
    pub neighbor: Option<String>,
    /// Replaces `[config.rotator]` for this rotator only.
    #[serde(default)]
    pub config: Option<RotatorConfig>,
}

/// What happens at a scheduled tick.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Rotate {
        rotator: String,
        angle: f64,
        #[serde(default)]
        speed: Option<f64>,
    },
    RotateCw {
        rotator: String,
    },
    RotateCcw {
        rotator: String,
    },
    Snap {
        rotator: String,
        #[serde(default)]
        snap: f64,
    },
    Stop {
        rotator: String,
    },
    Deploy {
        rotator: String,
    },
    Target {
        rotator: String,
        angle: f64,
    },
    /// Airspeed fed to speed-controlled rotators; absent stops feeding.
    Airspeed {
        #[serde(default)]
        airspeed: Option<f64>,
    },
    /// Raw structural event; bodies are given by index in `[[bodies]]`.
    Notify {
        event: StructureEvent,
    },
    Detach {
        body: String,
    },
    Reattach {
        body: String,
        parent: String,
        #[serde(default)]
        anchors: Vec<DVec3>,
    },
    Save {
        path: String,
    },
}

/// Finite stock per resource; unlimited when nothing is given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub electric_charge: Option<f64>,
}

impl ResourceSpec {
    fn pool(&self) -> Option<ResourcePool> {
        self.electric_charge
            .map(|amount| ResourcePool::new().with(ResourceKind::ElectricCharge, amount))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSpec {
    pub tick: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    #[serde(default)]
    pub config: Config,
    pub bodies: Vec<BodySpec>,
    #[serde(default)]
    pub joints: Vec<JointSpec>,
    #[serde(default)]
    pub auto_locks: Vec<LockSpec>,
    #[serde(default)]
    pub rotators: Vec<RotatorSpec>,
    /// Groups of rotator names that mirror each other's inputs.
    #[serde(default)]
    pub symmetry: Vec<Vec<String>>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

fn default_ticks() -> u64 {
    500
}

/// A built scenario: the vessel plus the name tables the script refers to.
pub struct World {
    pub vessel: Vessel,
    pub bodies: HashMap<String, BodyId>,
    pub rotators: BTreeMap<String, RotatorId>,
}

impl World {
    pub fn body(&self, name: &str) -> Result<BodyId, ScenarioError> {
        self.bodies
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownBody(name.to_string()))
    }

    pub fn rotator(&self, name: &str) -> Result<RotatorId, ScenarioError> {
        self.rotators
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownRotator(name.to_string()))
    }
}

impl Scenario {
    pub fn from_toml(text: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = toml::from_str(text)?;
        scenario.config.validate()?;
        for config in scenario.rotators.iter().filter_map(|r| r.config.as_ref()) {
            config.validate()?;
        }
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Build the assembly and register the rotators. The vessel is left on
    /// rails.
    pub fn build(&self) -> Result<World, ScenarioError> {
        let mut assembly = Assembly::new(1, self.name.clone());
        let mut bodies = HashMap::new();
        for spec in &self.bodies {
            let id = assembly.add_body(spec.name.clone(), spec.rotation.normalize(), spec.position);
            if bodies.insert(spec.name.clone(), id).is_some() {
                return Err(ScenarioError::Duplicate(spec.name.clone()));
            }
        }
        let lookup = |name: &str| {
            bodies
                .get(name)
                .copied()
                .ok_or_else(|| ScenarioError::UnknownBody(name.to_string()))
        };
        for spec in &self.joints {
            assembly.attach(lookup(&spec.child)?, lookup(&spec.parent)?, &spec.anchors)?;
        }
        for spec in &self.auto_locks {
            assembly.add_auto_lock(lookup(&spec.a)?, lookup(&spec.b)?)?;
        }

        let mut vessel = Vessel::new(assembly, self.config.clone());
        if let Some(pool) = self.resources.pool() {
            vessel = vessel.with_resources(Box::new(pool));
        }

        let mut rotators = BTreeMap::new();
        for spec in &self.rotators {
            let mut finder = NodeJointFinder::new(spec.axis, spec.pivot);
            if let Some(neighbor) = &spec.neighbor {
                finder = finder.with_neighbor(lookup(neighbor)?);
            }
            let config = spec.config.clone().unwrap_or_else(|| self.config.rotator.clone());
            let id = vessel.add_rotator_with(lookup(&spec.body)?, config, Box::new(finder))?;
            if rotators.insert(spec.name.clone(), id).is_some() {
                return Err(ScenarioError::Duplicate(spec.name.clone()));
            }
        }

        for group in &self.symmetry {
            let ids = group
                .iter()
                .map(|name| {
                    rotators
                        .get(name)
                        .copied()
                        .ok_or_else(|| ScenarioError::UnknownRotator(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            vessel.link_symmetry(&ids)?;
        }

        Ok(World {
            vessel,
            bodies,
            rotators,
        })
    }
}
