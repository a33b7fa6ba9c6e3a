// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Fleet Configuration Types
//
// Defines the configuration schema for fleet agent processes:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Hosted agents and their start positions
// - Heartbeat, liveness and control-loop timing
// - Motion execution mode
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::graph::{Pose, RouteGraph};
use crate::domain::messages::WireOrientation;

pub const API_VERSION: &str = "fleet.robotics/v1";
pub const KIND: &str = "FleetConfig";

/// Top-level Kubernetes-style fleet configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfigManifest {
    /// API version (must be "fleet.robotics/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "FleetConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: FleetConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfigSpec {
    /// Agents hosted by this process
    pub agents: Vec<AgentSpec>,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub motion: MotionConfig,

    /// Route-graph JSON file published on startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_path: Option<PathBuf>,

    /// Scripted agent crashes (simulator only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crashes: Vec<CrashSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique agent identity; also the election key
    pub namespace: String,

    pub start: StartSpec,

    /// Initial heading; falls back to the start node's orientation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<WireOrientation>,
}

/// Where an agent starts: a named waypoint or explicit coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartSpec {
    Node { node: String },
    Point { x: f64, y: f64 },
}

impl AgentSpec {
    /// Resolve the start pose. Node starts need the route graph.
    pub fn resolve_start(&self, graph: Option<&RouteGraph>) -> Option<Pose> {
        let configured = self.orientation.as_ref().map(WireOrientation::to_radians);
        match &self.start {
            StartSpec::Point { x, y } => Some(Pose::new(*x, *y, configured.unwrap_or(0.0))),
            StartSpec::Node { node } => {
                let waypoint = graph?.node(node)?;
                Some(Pose::new(
                    waypoint.x,
                    waypoint.y,
                    configured.unwrap_or(waypoint.orientation),
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_registration_period", with = "humantime_serde")]
    pub registration_period: Duration,

    #[serde(default = "default_heartbeat_period", with = "humantime_serde")]
    pub heartbeat_period: Duration,

    #[serde(default = "default_initial_position_period", with = "humantime_serde")]
    pub initial_position_period: Duration,

    /// Silence after which the leader or a peer is considered dead
    #[serde(default = "default_heartbeat_timeout", with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    #[serde(default = "default_leader_check_period", with = "humantime_serde")]
    pub leader_check_period: Duration,

    #[serde(default = "default_peer_check_period", with = "humantime_serde")]
    pub peer_check_period: Duration,

    /// Unconditional re-plan period while leading
    #[serde(default = "default_control_tick", with = "humantime_serde")]
    pub control_tick: Duration,

    /// Leader checks to wait for an elected peer before re-running the election
    #[serde(default = "default_election_rerun_checks")]
    pub election_rerun_checks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MotionMode {
    Simulate,
    MotionStack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_motion_mode")]
    pub mode: MotionMode,

    #[serde(default = "default_simulated_duration", with = "humantime_serde")]
    pub simulated_duration: Duration,

    /// Labels whose simulated motion reports failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub simulated_failure_labels: Vec<String>,

    #[serde(default = "default_server_timeout", with = "humantime_serde")]
    pub server_timeout: Duration,

    #[serde(default = "default_poll_period", with = "humantime_serde")]
    pub poll_period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashSpec {
    pub namespace: String,
    #[serde(with = "humantime_serde")]
    pub after: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_registration_period() -> Duration {
    Duration::from_secs(1)
}

fn default_heartbeat_period() -> Duration {
    Duration::from_secs(1)
}

fn default_initial_position_period() -> Duration {
    Duration::from_secs(2)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_leader_check_period() -> Duration {
    Duration::from_secs(1)
}

fn default_peer_check_period() -> Duration {
    Duration::from_secs(2)
}

fn default_control_tick() -> Duration {
    Duration::from_secs(10)
}

fn default_election_rerun_checks() -> u32 {
    5
}

fn default_motion_mode() -> MotionMode {
    MotionMode::Simulate
}

fn default_simulated_duration() -> Duration {
    Duration::from_secs(15)
}

fn default_server_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_period() -> Duration {
    Duration::from_millis(200)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            registration_period: default_registration_period(),
            heartbeat_period: default_heartbeat_period(),
            initial_position_period: default_initial_position_period(),
            heartbeat_timeout: default_heartbeat_timeout(),
            leader_check_period: default_leader_check_period(),
            peer_check_period: default_peer_check_period(),
            control_tick: default_control_tick(),
            election_rerun_checks: default_election_rerun_checks(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            mode: default_motion_mode(),
            simulated_duration: default_simulated_duration(),
            simulated_failure_labels: Vec::new(),
            server_timeout: default_server_timeout(),
            poll_period: default_poll_period(),
        }
    }
}

impl Default for FleetConfigSpec {
    fn default() -> Self {
        Self {
            agents: vec![AgentSpec {
                namespace: "robot1".to_string(),
                start: StartSpec::Point { x: 0.0, y: 0.0 },
                orientation: None,
            }],
            timing: TimingConfig::default(),
            motion: MotionConfig::default(),
            graph_path: None,
            crashes: Vec::new(),
            observability: None,
        }
    }
}

impl Default for FleetConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "fleet".to_string(),
                labels: None,
            },
            spec: FleetConfigSpec::default(),
        }
    }
}

impl FleetConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. FLEET_CONFIG_PATH environment variable
    /// 2. ./fleet-config.yaml (working directory)
    /// 3. ~/.fleet/config.yaml (user home)
    /// 4. /etc/fleet/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLEET_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./fleet-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".fleet").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/fleet/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path fails hard when missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(namespace) = std::env::var("FLEET_NAMESPACE") {
            if self.spec.agents.len() == 1 {
                tracing::info!("Environment override: FLEET_NAMESPACE={}", namespace);
                self.spec.agents[0].namespace = namespace;
            } else {
                tracing::warn!(
                    "FLEET_NAMESPACE is set but {} agents are configured. Ignoring.",
                    self.spec.agents.len()
                );
            }
        }

        if let Ok(val) = std::env::var("FLEET_HEARTBEAT_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: FLEET_HEARTBEAT_TIMEOUT_SECS={}", secs);
                    self.spec.timing.heartbeat_timeout = Duration::from_secs(secs);
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for FLEET_HEARTBEAT_TIMEOUT_SECS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.spec.agents.is_empty() {
            anyhow::bail!("spec.agents must list at least one agent");
        }

        let mut seen = BTreeSet::new();
        for agent in &self.spec.agents {
            if agent.namespace.trim().is_empty() {
                anyhow::bail!("Agent namespace cannot be empty");
            }
            if !seen.insert(agent.namespace.as_str()) {
                anyhow::bail!("Duplicate agent namespace: {}", agent.namespace);
            }
        }

        let timing = &self.spec.timing;
        for (name, value) in [
            ("timing.registration_period", timing.registration_period),
            ("timing.heartbeat_period", timing.heartbeat_period),
            ("timing.initial_position_period", timing.initial_position_period),
            ("timing.heartbeat_timeout", timing.heartbeat_timeout),
            ("timing.leader_check_period", timing.leader_check_period),
            ("timing.peer_check_period", timing.peer_check_period),
            ("timing.control_tick", timing.control_tick),
            ("motion.poll_period", self.spec.motion.poll_period),
        ] {
            if value.is_zero() {
                anyhow::bail!("spec.{} must be greater than zero", name);
            }
        }

        if timing.heartbeat_timeout <= timing.heartbeat_period {
            anyhow::bail!(
                "heartbeat_timeout ({:?}) must exceed heartbeat_period ({:?})",
                timing.heartbeat_timeout,
                timing.heartbeat_period
            );
        }

        if timing.election_rerun_checks == 0 {
            anyhow::bail!("spec.timing.election_rerun_checks must be at least 1");
        }

        for crash in &self.spec.crashes {
            if !seen.contains(crash.namespace.as_str()) {
                anyhow::bail!("Crash scripted for unknown agent: {}", crash.namespace);
            }
        }

        Ok(())
    }

    /// Log format requested by the manifest, if any.
    pub fn log_format(&self) -> Option<&str> {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.as_ref())
            .map(|l| l.format.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{Edge, Waypoint};
    use std::io::Write;

    const SAMPLE: &str = r#"
apiVersion: fleet.robotics/v1
kind: FleetConfig
metadata:
  name: warehouse
spec:
  agents:
    - namespace: robotA
      start: { node: A }
    - namespace: robotB
      start: { x: 4.0, y: 1.5 }
      orientation: WEST
  timing:
    heartbeat_timeout: 3s
    control_tick: 500ms
  motion:
    mode: simulate
    simulated_duration: 2s
    simulated_failure_labels: [C]
  graph_path: ./graph.json
  crashes:
    - namespace: robotA
      after: 30s
"#;

    #[test]
    fn test_default_manifest() {
        let manifest = FleetConfigManifest::default();
        assert_eq!(manifest.api_version, "fleet.robotics/v1");
        assert_eq!(manifest.kind, "FleetConfig");
        assert_eq!(manifest.spec.timing.heartbeat_timeout, Duration::from_secs(5));
        assert_eq!(manifest.spec.timing.election_rerun_checks, 5);
        assert_eq!(manifest.spec.motion.mode, MotionMode::Simulate);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let manifest = FleetConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.agents.len(), 2);
        assert_eq!(
            manifest.spec.agents[0].start,
            StartSpec::Node {
                node: "A".to_string()
            }
        );
        assert_eq!(manifest.spec.timing.heartbeat_timeout, Duration::from_secs(3));
        assert_eq!(manifest.spec.timing.control_tick, Duration::from_millis(500));
        // Unspecified fields fall back to defaults.
        assert_eq!(manifest.spec.timing.heartbeat_period, Duration::from_secs(1));
        assert_eq!(manifest.spec.motion.simulated_failure_labels, vec!["C"]);
        assert_eq!(manifest.spec.crashes[0].after, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_start() {
        let manifest = FleetConfigManifest::from_yaml_str(SAMPLE).unwrap();
        let graph = RouteGraph::new(
            vec![
                Waypoint::new("A", 1.0, 2.0, 0.5),
                Waypoint::new("B", 3.0, 2.0, 0.0),
            ],
            vec![Edge::new("A", "B", 1.0)],
        )
        .unwrap();

        let node_start = &manifest.spec.agents[0];
        assert_eq!(node_start.resolve_start(None), None);
        assert_eq!(
            node_start.resolve_start(Some(&graph)),
            Some(Pose::new(1.0, 2.0, 0.5))
        );

        let point_start = &manifest.spec.agents[1];
        let pose = point_start.resolve_start(None).unwrap();
        assert_eq!(pose.position.x, 4.0);
        assert_eq!(pose.orientation, std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn test_validation() {
        let mut manifest = FleetConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.agents[1].namespace = "robotA".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.agents[1].namespace = "robotB".to_string();

        manifest.spec.timing.heartbeat_timeout = Duration::from_millis(500);
        assert!(manifest.validate().is_err());
        manifest.spec.timing.heartbeat_timeout = Duration::from_secs(5);

        manifest.spec.timing.peer_check_period = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.timing.peer_check_period = Duration::from_secs(2);

        manifest.spec.crashes[0].namespace = "ghost".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let manifest = FleetConfigManifest::from_yaml_str(SAMPLE).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet-config.yaml");
        manifest.to_yaml_file(&path).unwrap();

        let loaded = FleetConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "warehouse");
        assert_eq!(loaded.spec.timing.control_tick, Duration::from_millis(500));
        assert_eq!(loaded.spec.crashes.len(), 1);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not: [valid").unwrap();
        assert!(FleetConfigManifest::load_or_default(Some(file.path().to_path_buf())).is_err());
        assert!(
            FleetConfigManifest::load_or_default(Some(PathBuf::from("/nonexistent/fleet.yaml")))
                .is_err()
        );
    }
}
