//! Shared configuration logic for host, simulator, and tests.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [motion]
//! accel_time = 2.0
//! max_acceleration = 180.0
//!
//! [simulation]
//! fixed_step = 0.02
//!
//! [rotator]
//! rotation_step = 15.0
//! rotation_speed = 5.0
//! smart_auto_struts = true
//! max_angle = 90.0
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub rotator: RotatorConfig,
}

/// Tuning of the trapezoidal motion profile.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MotionConfig {
    /// Time to reach max velocity from rest, before clamping.
    #[serde(default = "default_accel_time")]
    pub accel_time: f64,
    #[serde(default = "default_min_acceleration")]
    pub min_acceleration: f64,
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f64,
    /// Braking margin, in ticks.
    #[serde(default = "default_stop_margin")]
    pub stop_margin: f64,
    /// Requests slower than this are rejected.
    #[serde(default = "default_min_speed")]
    pub min_speed: f64,
    /// Position magnitude past which continuous rotation is re-zeroed.
    #[serde(default = "default_clamp_range")]
    pub clamp_range: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            accel_time: default_accel_time(),
            min_acceleration: default_min_acceleration(),
            max_acceleration: default_max_acceleration(),
            stop_margin: default_stop_margin(),
            min_speed: default_min_speed(),
            clamp_range: default_clamp_range(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_fixed_step")]
    pub fixed_step: f64,
    #[serde(default)]
    pub verbose_events: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fixed_step: default_fixed_step(),
            verbose_events: false,
        }
    }
}

/// Per joint owner settings. Used as defaults for every rotator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RotatorConfig {
    #[serde(default = "default_true")]
    pub rotation_enabled: bool,
    #[serde(default = "default_rotation_step")]
    pub rotation_step: f64,
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f64,
    #[serde(default)]
    pub reverse_rotation: bool,
    #[serde(default)]
    pub flip_flop_mode: bool,
    #[serde(default)]
    pub smart_auto_struts: bool,
    #[serde(default = "default_electricity_rate")]
    pub electricity_rate: f64,
    #[serde(default)]
    pub auto_snap: bool,
    #[serde(default)]
    pub verbose_events: bool,
    /// Travel limit in degrees. Requests are clamped so the commanded
    /// angle stays within `[0, max_angle]`, or `[-max_angle, 0]` when
    /// reversed. Unlimited when absent.
    #[serde(default)]
    pub max_angle: Option<f64>,
    /// Last target set, in commanded degrees of travel.
    #[serde(default)]
    pub target_angle: f64,
    /// Drive the target angle from airspeed instead of manual input.
    #[serde(default)]
    pub speed_controller: bool,
    #[serde(default)]
    pub min_airspeed: f64,
    #[serde(default = "default_max_airspeed")]
    pub max_airspeed: f64,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            rotation_enabled: true,
            rotation_step: default_rotation_step(),
            rotation_speed: default_rotation_speed(),
            reverse_rotation: false,
            flip_flop_mode: false,
            smart_auto_struts: false,
            electricity_rate: default_electricity_rate(),
            auto_snap: false,
            verbose_events: false,
            max_angle: None,
            target_angle: 0.0,
            speed_controller: false,
            min_airspeed: 0.0,
            max_airspeed: default_max_airspeed(),
        }
    }
}

impl RotatorConfig {
    /// Travel used by the deploy toggle and the speed controller.
    pub fn travel(&self) -> f64 {
        self.max_angle.unwrap_or(360.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rotation_step < 0.0 || self.rotation_speed < 0.0 {
            return Err(ConfigError::Invalid("rotator step and speed must not be negative".to_string()));
        }
        if self.electricity_rate < 0.0 {
            return Err(ConfigError::Invalid("rotator.electricity_rate must not be negative".to_string()));
        }
        if let Some(max) = self.max_angle {
            if !(max > 0.0 && max <= 360.0) {
                return Err(ConfigError::Invalid(format!("rotator.max_angle {} is outside (0, 360]", max)));
            }
        }
        if !(self.target_angle >= 0.0 && self.target_angle <= self.travel()) {
            return Err(ConfigError::Invalid(format!(
                "rotator.target_angle {} is outside [0, {}]",
                self.target_angle,
                self.travel()
            )));
        }
        if !(self.min_airspeed >= 0.0 && self.max_airspeed > self.min_airspeed) {
            return Err(ConfigError::Invalid(format!(
                "rotator airspeed range [{}, {}] is invalid",
                self.min_airspeed, self.max_airspeed
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.motion;
        if m.accel_time <= 0.0 {
            return Err(ConfigError::Invalid("motion.accel_time must be > 0".to_string()));
        }
        if m.min_acceleration <= 0.0 || m.min_acceleration > m.max_acceleration {
            return Err(ConfigError::Invalid(format!(
                "motion acceleration clamp [{}, {}] is invalid",
                m.min_acceleration, m.max_acceleration
            )));
        }
        if m.stop_margin <= 0.0 {
            return Err(ConfigError::Invalid("motion.stop_margin must be > 0".to_string()));
        }
        if m.clamp_range < 360.0 {
            return Err(ConfigError::Invalid("motion.clamp_range must be at least one turn".to_string()));
        }
        if self.simulation.fixed_step <= 0.0 {
            return Err(ConfigError::Invalid("simulation.fixed_step must be > 0".to_string()));
        }
        self.rotator.validate()
    }
}

// Default value functions
fn default_accel_time() -> f64 { 2.0 }
fn default_min_acceleration() -> f64 { 1.0 }
fn default_max_acceleration() -> f64 { 180.0 }
fn default_stop_margin() -> f64 { 1.5 }
fn default_min_speed() -> f64 { 0.1 }
fn default_clamp_range() -> f64 { 3600.0 }
fn default_fixed_step() -> f64 { 0.02 }
fn default_rotation_step() -> f64 { 15.0 }
fn default_rotation_speed() -> f64 { 5.0 }
fn default_electricity_rate() -> f64 { 1.0 }
fn default_max_airspeed() -> f64 { 200.0 }
fn default_true() -> bool { true }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
