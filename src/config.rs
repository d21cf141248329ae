//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConsoleError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default)]
    pub buttons: ButtonConfig,
    #[serde(default)]
    pub angles: AngleConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rangefinder response framing variant
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RangefinderProtocol {
    /// Variable-length frames with up to three targets, trigger driven
    MultiTarget,
    /// Fixed 14-byte frames with one distance field, polled continuously
    FixedFrame,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_serial_error_backoff_ms")]
    pub error_backoff_ms: u64,

    #[serde(default = "default_protocol")]
    pub protocol: RangefinderProtocol,

    /// Meters per raw distance count
    #[serde(default = "default_distance_scale_m")]
    pub distance_scale_m: f64,

    #[serde(default)]
    pub single_target_mode: bool,

    /// Polling period of the fixed-frame variant
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// CAN bus configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CanConfig {
    #[serde(default = "default_can_interface")]
    pub interface: String,

    /// Informational; the interface bitrate is set with `ip link`
    #[serde(default = "default_can_bitrate")]
    pub bitrate: u32,

    #[serde(default = "default_button_id")]
    pub button_id: u32,

    #[serde(default = "default_angle_id")]
    pub angle_id: u32,

    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_can_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Interface used for telemetry egress; empty means `interface`
    #[serde(default)]
    pub output_interface: String,
}

/// Button timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ButtonConfig {
    #[serde(default = "default_button_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_hold_delay_ms")]
    pub hold_delay_ms: u64,

    #[serde(default = "default_hold_interval_ms")]
    pub hold_interval_ms: u64,

    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,
}

/// Angle telemetry decoding configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AngleConfig {
    #[serde(default = "default_angle_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_unit_deg")]
    pub unit_deg: f64,
}

/// Telemetry egress configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    #[serde(default = "default_can_enabled")]
    pub can_enabled: bool,

    #[serde(default = "default_distance_id")]
    pub distance_id: u32,

    #[serde(default = "default_elevation_id")]
    pub elevation_id: u32,

    #[serde(default = "default_azimuth_id")]
    pub azimuth_id: u32,

    #[serde(default = "default_tcp_address")]
    pub tcp_address: String,

    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    #[serde(default = "default_initial_elevation")]
    pub initial_elevation: f64,

    #[serde(default = "default_initial_azimuth")]
    pub initial_azimuth: f64,

    /// Give up connecting to the ground station after this long
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-channel limit on one publish; must be below the publish interval
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Reticle calibration configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_path")]
    pub path: String,

    #[serde(default = "default_zoom_step")]
    pub zoom_step: f64,

    #[serde(default = "default_margin_px")]
    pub margin_px: i32,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: i32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: i32,

    #[serde(default = "default_nudge_step_px")]
    pub nudge_step_px: i32,
}

/// Camera PTZ configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_zoom_sync_interval_ms")]
    pub zoom_sync_interval_ms: u64,

    #[serde(default = "default_zoom_sync_tolerance")]
    pub zoom_sync_tolerance: f64,

    #[serde(default)]
    pub initial_zoom: f64,

    /// Limit on a single PTZ request
    #[serde(default = "default_ptz_timeout_ms")]
    pub ptz_timeout_ms: u64,
}

/// Operator notification configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

/// Recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_dir")]
    pub dir: String,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub enabled: bool,

    /// Raw frame source (capture device or FIFO)
    #[serde(default)]
    pub source: String,

    /// Size of one raw frame from `source`
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,
}

/// Log file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyTHS0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_serial_error_backoff_ms() -> u64 { 500 }
fn default_protocol() -> RangefinderProtocol { RangefinderProtocol::MultiTarget }
fn default_distance_scale_m() -> f64 { 0.1 }
fn default_poll_interval_ms() -> u64 { 100 }

fn default_can_interface() -> String { "can0".to_string() }
fn default_can_bitrate() -> u32 { 500000 }
fn default_button_id() -> u32 { 0x2A }
fn default_angle_id() -> u32 { 0x2B }
fn default_recv_timeout_ms() -> u64 { 50 }
fn default_sweep_interval_ms() -> u64 { 50 }
fn default_can_error_backoff_ms() -> u64 { 500 }

fn default_button_debounce_ms() -> u64 { 30 }
fn default_hold_delay_ms() -> u64 { 1000 }
fn default_hold_interval_ms() -> u64 { 200 }
fn default_release_timeout_ms() -> u64 { 150 }

fn default_angle_debounce_ms() -> u64 { 100 }
fn default_unit_deg() -> f64 { 1.0 }

fn default_telemetry_enabled() -> bool { true }
fn default_publish_interval_ms() -> u64 { 2000 }
fn default_can_enabled() -> bool { true }
fn default_distance_id() -> u32 { 0x100 }
fn default_elevation_id() -> u32 { 0x101 }
fn default_azimuth_id() -> u32 { 0x102 }
fn default_tcp_address() -> String { "192.168.100.20".to_string() }
fn default_tcp_port() -> u16 { 12345 }
fn default_initial_elevation() -> f64 { 45.0 }
fn default_initial_azimuth() -> f64 { 39.0 }
fn default_connect_timeout_ms() -> u64 { 3000 }
fn default_send_timeout_ms() -> u64 { 500 }

fn default_calibration_path() -> String { "crosshair.json".to_string() }
fn default_zoom_step() -> f64 { 0.05 }
fn default_margin_px() -> i32 { 20 }
fn default_viewport_width() -> i32 { 1280 }
fn default_viewport_height() -> i32 { 720 }
fn default_nudge_step_px() -> i32 { 1 }

fn default_zoom_sync_interval_ms() -> u64 { 2000 }
fn default_zoom_sync_tolerance() -> f64 { 0.02 }
fn default_ptz_timeout_ms() -> u64 { 1000 }

fn default_cooldown_ms() -> u64 { 10000 }

fn default_recording_dir() -> String { "recordings".to_string() }
fn default_queue_capacity() -> usize { 30 }
// One 1280x720 NV12 frame
fn default_frame_bytes() -> usize { 1280 * 720 * 3 / 2 }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_log_file_prefix() -> String { "sight-console.log".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            error_backoff_ms: default_serial_error_backoff_ms(),
            protocol: default_protocol(),
            distance_scale_m: default_distance_scale_m(),
            single_target_mode: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            interface: default_can_interface(),
            bitrate: default_can_bitrate(),
            button_id: default_button_id(),
            angle_id: default_angle_id(),
            recv_timeout_ms: default_recv_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            error_backoff_ms: default_can_error_backoff_ms(),
            output_interface: String::new(),
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_button_debounce_ms(),
            hold_delay_ms: default_hold_delay_ms(),
            hold_interval_ms: default_hold_interval_ms(),
            release_timeout_ms: default_release_timeout_ms(),
        }
    }
}

impl Default for AngleConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_angle_debounce_ms(),
            unit_deg: default_unit_deg(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            publish_interval_ms: default_publish_interval_ms(),
            can_enabled: default_can_enabled(),
            distance_id: default_distance_id(),
            elevation_id: default_elevation_id(),
            azimuth_id: default_azimuth_id(),
            tcp_address: default_tcp_address(),
            tcp_port: default_tcp_port(),
            initial_elevation: default_initial_elevation(),
            initial_azimuth: default_initial_azimuth(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: default_calibration_path(),
            zoom_step: default_zoom_step(),
            margin_px: default_margin_px(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            nudge_step_px: default_nudge_step_px(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            zoom_sync_interval_ms: default_zoom_sync_interval_ms(),
            zoom_sync_tolerance: default_zoom_sync_tolerance(),
            initial_zoom: 0.0,
            ptz_timeout_ms: default_ptz_timeout_ms(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { cooldown_ms: default_cooldown_ms() }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            dir: default_recording_dir(),
            queue_capacity: default_queue_capacity(),
            enabled: false,
            source: String::new(),
            frame_bytes: default_frame_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TelemetryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl CameraConfig {
    pub fn ptz_timeout(&self) -> Duration {
        Duration::from_millis(self.ptz_timeout_ms)
    }
}

impl CanConfig {
    /// Interface used for telemetry egress
    pub fn output_interface(&self) -> &str {
        if self.output_interface.is_empty() {
            &self.interface
        } else {
            &self.output_interface
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sight_console::config::Config;
    ///
    /// let config = Config::load("config/console.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.error_backoff_ms == 0 || self.serial.error_backoff_ms > 60000 {
            return Err(invalid("serial error_backoff_ms must be between 1 and 60000"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600]
            .contains(&self.serial.baud_rate)
        {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if !(self.serial.distance_scale_m > 0.0) {
            return Err(invalid("distance_scale_m must be greater than 0"));
        }

        if self.serial.poll_interval_ms == 0 || self.serial.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.can.interface.is_empty() {
            return Err(invalid("can interface cannot be empty"));
        }

        // Standard 11-bit identifiers only
        for (name, id) in [
            ("button_id", self.can.button_id),
            ("angle_id", self.can.angle_id),
            ("distance_id", self.telemetry.distance_id),
            ("elevation_id", self.telemetry.elevation_id),
            ("azimuth_id", self.telemetry.azimuth_id),
        ] {
            if id > 0x7FF {
                return Err(invalid(format!("{} 0x{:X} exceeds 11-bit range", name, id)));
            }
        }

        if self.can.button_id == self.can.angle_id {
            return Err(invalid("button_id and angle_id must differ"));
        }

        let out = [
            self.telemetry.distance_id,
            self.telemetry.elevation_id,
            self.telemetry.azimuth_id,
        ];
        if out[0] == out[1] || out[1] == out[2] || out[0] == out[2] {
            return Err(invalid("telemetry output ids must be distinct"));
        }

        for (name, value) in [
            ("recv_timeout_ms", self.can.recv_timeout_ms),
            ("sweep_interval_ms", self.can.sweep_interval_ms),
            ("can error_backoff_ms", self.can.error_backoff_ms),
        ] {
            if value == 0 || value > 10000 {
                return Err(invalid(format!("{} must be between 1 and 10000", name)));
            }
        }

        if self.buttons.hold_interval_ms == 0 {
            return Err(invalid("hold_interval_ms must be greater than 0"));
        }

        if self.buttons.release_timeout_ms == 0 || self.buttons.release_timeout_ms > 10000 {
            return Err(invalid("release_timeout_ms must be between 1 and 10000"));
        }

        if self.buttons.debounce_ms >= self.buttons.release_timeout_ms {
            return Err(invalid("button debounce_ms must be less than release_timeout_ms"));
        }

        if self.buttons.hold_delay_ms > 60000 {
            return Err(invalid("hold_delay_ms must be at most 60000"));
        }

        if !(self.angles.unit_deg > 0.0) {
            return Err(invalid("angle unit_deg must be greater than 0"));
        }

        if self.telemetry.publish_interval_ms == 0 || self.telemetry.publish_interval_ms > 60000 {
            return Err(invalid("publish_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.enabled && self.telemetry.tcp_address.is_empty() {
            return Err(invalid("tcp_address cannot be empty when telemetry is enabled"));
        }

        if self.telemetry.connect_timeout_ms == 0 || self.telemetry.connect_timeout_ms > 60000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 60000"));
        }

        if self.telemetry.send_timeout_ms == 0
            || self.telemetry.send_timeout_ms >= self.telemetry.publish_interval_ms
        {
            return Err(invalid("send_timeout_ms must be between 1 and publish_interval_ms"));
        }

        if self.calibration.path.is_empty() {
            return Err(invalid("calibration path cannot be empty"));
        }

        if !(self.calibration.zoom_step > 0.0 && self.calibration.zoom_step <= 1.0) {
            return Err(invalid("zoom_step must be in (0.0, 1.0]"));
        }

        if self.calibration.viewport_width <= 0 || self.calibration.viewport_height <= 0 {
            return Err(invalid("viewport dimensions must be positive"));
        }

        if self.calibration.margin_px < 0
            || self.calibration.margin_px * 2 > self.calibration.viewport_width.min(self.calibration.viewport_height)
        {
            return Err(invalid("margin_px must be between 0 and half the smaller viewport dimension"));
        }

        if self.calibration.nudge_step_px <= 0 {
            return Err(invalid("nudge_step_px must be greater than 0"));
        }

        if self.camera.zoom_sync_interval_ms == 0 || self.camera.zoom_sync_interval_ms > 60000 {
            return Err(invalid("zoom_sync_interval_ms must be between 1 and 60000"));
        }

        if !(0.0..=1.0).contains(&self.camera.initial_zoom) {
            return Err(invalid("initial_zoom must be between 0.0 and 1.0"));
        }

        if self.camera.zoom_sync_tolerance < 0.0 {
            return Err(invalid("zoom_sync_tolerance cannot be negative"));
        }

        if self.camera.ptz_timeout_ms == 0 || self.camera.ptz_timeout_ms > 10000 {
            return Err(invalid("ptz_timeout_ms must be between 1 and 10000"));
        }

        if self.recording.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }

        if self.recording.enabled && self.recording.source.is_empty() {
            return Err(invalid("recording source cannot be empty when recording is enabled"));
        }

        if self.recording.enabled && self.recording.dir.is_empty() {
            return Err(invalid("recording dir cannot be empty when recording is enabled"));
        }

        if self.recording.frame_bytes == 0 {
            return Err(invalid("frame_bytes must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> ConsoleError {
    ConsoleError::Config(toml::de::Error::custom(msg))
}
