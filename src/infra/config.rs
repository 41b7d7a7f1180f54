//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing values fall back to the calibration
//! of the original three-spot installation.

use crate::domain::types::Credential;
use crate::io::bridge::MAX_BRIDGE_CHANNELS;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    /// Sensor bridge microcontroller on a serial port
    Serial,
    /// In-process simulated peripherals
    Sim,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotsConfig {
    /// Per-spot occupancy thresholds; a spot is free while its reading is below
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<u16>,
    /// Largest value the ADC can produce; anything above is a sensor fault
    #[serde(default = "default_max_raw")]
    pub max_raw: u16,
}

impl Default for SpotsConfig {
    fn default() -> Self {
        Self { thresholds: default_thresholds(), max_raw: default_max_raw() }
    }
}

fn default_thresholds() -> Vec<u16> {
    vec![500, 270, 400]
}

fn default_max_raw() -> u16 {
    1023
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Hex UIDs, e.g. "03:0C:49:16"
    #[serde(default = "default_authorized_uids")]
    pub authorized_uids: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self { authorized_uids: default_authorized_uids() }
    }
}

fn default_authorized_uids() -> Vec<String> {
    vec!["03:0C:49:16".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_passage_threshold_cm")]
    pub passage_threshold_cm: f32,
    #[serde(default = "default_closing_grace_ms")]
    pub closing_grace_ms: u64,
    #[serde(default = "default_max_open_ms")]
    pub max_open_ms: u64,
    /// Servo angle for the raised barrier
    #[serde(default = "default_open_angle")]
    pub open_angle: u8,
    /// Servo angle for the lowered barrier
    #[serde(default = "default_closed_angle")]
    pub closed_angle: u8,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            passage_threshold_cm: default_passage_threshold_cm(),
            closing_grace_ms: default_closing_grace_ms(),
            max_open_ms: default_max_open_ms(),
            open_angle: default_open_angle(),
            closed_angle: default_closed_angle(),
        }
    }
}

fn default_passage_threshold_cm() -> f32 {
    12.0
}

fn default_closing_grace_ms() -> u64 {
    2500
}

fn default_max_open_ms() -> u64 {
    20_000
}

fn default_open_angle() -> u8 {
    0
}

fn default_closed_angle() -> u8 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct PassageConfig {
    /// Longest echo accepted before reporting "no echo" (38ms is roughly 6.5m)
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
}

impl Default for PassageConfig {
    fn default() -> Self {
        Self { echo_timeout_ms: default_echo_timeout_ms() }
    }
}

fn default_echo_timeout_ms() -> u64 {
    38
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Minimum period between cycle starts
    #[serde(default = "default_cycle_period_ms")]
    pub cycle_period_ms: u64,
    /// Upper bound for any single collaborator call (reader, display, actuator, ADC)
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { cycle_period_ms: default_cycle_period_ms(), io_timeout_ms: default_io_timeout_ms() }
    }
}

fn default_cycle_period_ms() -> u64 {
    500
}

fn default_io_timeout_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_hardware_mode")]
    pub mode: HardwareMode,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self { mode: default_hardware_mode(), device: default_device(), baud: default_baud() }
    }
}

fn default_hardware_mode() -> HardwareMode {
    HardwareMode::Serial
}

fn default_device() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud() -> u32 {
    115_200
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_mqtt_port(), username: None, password: None }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Available-spot count, plain integer, retained (QoS 1)
    #[serde(default = "default_availability_topic")]
    pub availability_topic: String,
    /// Per-cycle occupancy and gate state as JSON (QoS 0)
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Gate transitions, denials and anomalies (QoS 0)
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    /// Periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            availability_topic: default_availability_topic(),
            status_topic: default_status_topic(),
            events_topic: default_events_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_availability_topic() -> String {
    "parking/available".to_string()
}

fn default_status_topic() -> String {
    "parking/status".to_string()
}

fn default_events_topic() -> String {
    "parking/gate".to_string()
}

fn default_metrics_topic() -> String {
    "parking/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AclConfig {
    /// Accept add/revoke commands for the authorized set over MQTT
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_acl_topic")]
    pub topic: String,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self { enabled: false, topic: default_acl_topic() }
    }
}

fn default_acl_topic() -> String {
    "parking/acl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9100
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub spots: SpotsConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub passage: PassageConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    spot_thresholds: Vec<u16>,
    max_raw: u16,
    authorized_uids: Vec<Credential>,
    passage_threshold_cm: f32,
    closing_grace_ms: u64,
    max_open_ms: u64,
    open_angle: u8,
    closed_angle: u8,
    echo_timeout_ms: u64,
    cycle_period_ms: u64,
    io_timeout_ms: u64,
    hardware_mode: HardwareMode,
    hardware_device: String,
    hardware_baud: u32,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_egress_availability_topic: String,
    mqtt_egress_status_topic: String,
    mqtt_egress_events_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    acl_enabled: bool,
    acl_topic: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

/// UID of the card enrolled on the original installation
const DEFAULT_AUTHORIZED_UID: [u8; 4] = [0x03, 0x0C, 0x49, 0x16];

impl Default for Config {
    fn default() -> Self {
        Self::assemble(
            TomlConfig::default(),
            vec![Credential::from_bytes(&DEFAULT_AUTHORIZED_UID)],
            "default",
        )
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn from_toml(toml_config: TomlConfig, config_file: &str) -> anyhow::Result<Self> {
        let authorized_uids = toml_config
            .access
            .authorized_uids
            .iter()
            .map(|uid| uid.parse::<Credential>())
            .collect::<anyhow::Result<Vec<_>>>()?;

        let config = Self::assemble(toml_config, authorized_uids, config_file);
        config.validate()?;
        Ok(config)
    }

    fn assemble(toml_config: TomlConfig, authorized_uids: Vec<Credential>, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            spot_thresholds: toml_config.spots.thresholds,
            max_raw: toml_config.spots.max_raw,
            authorized_uids,
            passage_threshold_cm: toml_config.gate.passage_threshold_cm,
            closing_grace_ms: toml_config.gate.closing_grace_ms,
            max_open_ms: toml_config.gate.max_open_ms,
            open_angle: toml_config.gate.open_angle,
            closed_angle: toml_config.gate.closed_angle,
            echo_timeout_ms: toml_config.passage.echo_timeout_ms,
            cycle_period_ms: toml_config.control.cycle_period_ms,
            io_timeout_ms: toml_config.control.io_timeout_ms,
            hardware_mode: toml_config.hardware.mode,
            hardware_device: toml_config.hardware.device,
            hardware_baud: toml_config.hardware.baud,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_availability_topic: toml_config.mqtt_egress.availability_topic,
            mqtt_egress_status_topic: toml_config.mqtt_egress.status_topic,
            mqtt_egress_events_topic: toml_config.mqtt_egress.events_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
            acl_enabled: toml_config.acl.enabled,
            acl_topic: toml_config.acl.topic,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Reject settings that would make the gate cycle unsafe or meaningless
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.spot_thresholds.is_empty() {
            bail!("spots.thresholds must list at least one spot");
        }
        if self.spot_thresholds.len() > MAX_BRIDGE_CHANNELS {
            bail!(
                "spots.thresholds lists {} spots, the sensor bridge carries at most {}",
                self.spot_thresholds.len(),
                MAX_BRIDGE_CHANNELS
            );
        }
        if !self.passage_threshold_cm.is_finite() || self.passage_threshold_cm <= 0.0 {
            bail!("gate.passage_threshold_cm must be a positive number");
        }
        if self.max_open_ms == 0 {
            bail!("gate.max_open_ms must be greater than zero");
        }
        if self.closing_grace_ms >= self.max_open_ms {
            bail!(
                "gate.closing_grace_ms ({}) must be shorter than gate.max_open_ms ({})",
                self.closing_grace_ms,
                self.max_open_ms
            );
        }
        if !(1..=100).contains(&self.echo_timeout_ms) {
            bail!("passage.echo_timeout_ms must be between 1 and 100");
        }
        if self.cycle_period_ms == 0 {
            bail!("control.cycle_period_ms must be greater than zero");
        }
        if self.io_timeout_ms == 0 {
            bail!("control.io_timeout_ms must be greater than zero");
        }
        if self.metrics_interval_secs == 0 || self.mqtt_egress_metrics_interval_secs == 0 {
            bail!("metrics intervals must be greater than zero");
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn spot_thresholds(&self) -> &[u16] {
        &self.spot_thresholds
    }

    pub fn spot_count(&self) -> usize {
        self.spot_thresholds.len()
    }

    pub fn max_raw(&self) -> u16 {
        self.max_raw
    }

    pub fn authorized_uids(&self) -> &[Credential] {
        &self.authorized_uids
    }

    pub fn passage_threshold_cm(&self) -> f32 {
        self.passage_threshold_cm
    }

    pub fn closing_grace(&self) -> Duration {
        Duration::from_millis(self.closing_grace_ms)
    }

    pub fn max_open(&self) -> Duration {
        Duration::from_millis(self.max_open_ms)
    }

    pub fn open_angle(&self) -> u8 {
        self.open_angle
    }

    pub fn closed_angle(&self) -> u8 {
        self.closed_angle
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn hardware_mode(&self) -> HardwareMode {
        self.hardware_mode
    }

    pub fn hardware_device(&self) -> &str {
        &self.hardware_device
    }

    pub fn hardware_baud(&self) -> u32 {
        self.hardware_baud
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_availability_topic(&self) -> &str {
        &self.mqtt_egress_availability_topic
    }

    pub fn mqtt_egress_status_topic(&self) -> &str {
        &self.mqtt_egress_status_topic
    }

    pub fn mqtt_egress_events_topic(&self) -> &str {
        &self.mqtt_egress_events_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn acl_enabled(&self) -> bool {
        self.acl_enabled
    }

    pub fn acl_topic(&self) -> &str {
        &self.acl_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests and the simulator
    pub fn with_gate_timing(mut self, closing_grace: Duration, max_open: Duration) -> Self {
        self.closing_grace_ms = closing_grace.as_millis() as u64;
        self.max_open_ms = max_open.as_millis() as u64;
        self
    }

    /// Builder for tests and the simulator
    pub fn with_hardware_mode(mut self, mode: HardwareMode) -> Self {
        self.hardware_mode = mode;
        self
    }

    #[cfg(test)]
    pub fn with_spot_thresholds(mut self, thresholds: Vec<u16>) -> Self {
        self.spot_thresholds = thresholds;
        self
    }
}
