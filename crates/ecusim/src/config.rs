//! ECU bench simulator configuration
//!
//! Everything is optional: an empty file (or no file at all) yields the
//! stock bench setup with the wake frame on `0x600` and the NM state frame
//! on `0x391`.
//!
//! ```toml
//! cases = "cases/ims_response.json"
//!
//! [transport]
//! interface = "can0"
//! node = "IMS"
//!
//! [modes]
//! polling_dwell_ms = 5000
//!
//! [[normal_jobs]]
//! name = "nm_wake"
//! id = "0x600"
//! phases = [
//!     { payload = "0000000000000000", interval_ms = 20, frames = 10 },
//!     { payload = "0000000000000000", interval_ms = 1000 },
//! ]
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ecusim_transport::{
    BusTransport, FrameFormat, MockConfig, SocketCanConfig, TransportConfig,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mode::{JobSet, ModeTiming};
use crate::nodes::{NodeAddress, NodeTable};
use crate::schedule::{FrameJob, JobSpec, OverridePhase, Phase, ScheduleError, Threshold};
use crate::uds::{service_id, MAX_PAYLOAD_LEN};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown node '{name}' (known: {known})")]
    UnknownNode { name: String, known: String },

    #[error("Transport needs either a node name or both rx_id and tx_id")]
    MissingAddress,

    #[error("Invalid CAN ID '{0}'")]
    InvalidCanId(String),

    #[error("Job '{job}' phase #{phase}: set either frames or elapsed_ms, not both")]
    AmbiguousThreshold { job: String, phase: usize },

    #[error("Duplicate job name '{0}'")]
    DuplicateJob(String),

    #[error("Job '{0}': interval_ms must be greater than zero")]
    ZeroInterval(String),

    #[error("responder.max_payload_len {value} exceeds the transfer limit of {max} bytes")]
    PayloadLimit { value: usize, max: usize },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Complete simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuSimConfig {
    /// Simulator identifier used in log output
    #[serde(default = "default_id")]
    pub id: String,

    /// Path to the JSON case table; the simulator refuses to start without it
    #[serde(default = "default_cases")]
    pub cases: String,

    /// Bus transport configuration
    #[serde(default)]
    pub transport: TransportSection,

    /// Diagnostic responder settings
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Mode dwell timings
    #[serde(default)]
    pub modes: ModeConfig,

    /// Jobs started in Normal mode (wake/keep-alive)
    #[serde(default = "default_normal_jobs")]
    pub normal_jobs: Vec<JobDef>,

    /// Jobs started in Polling mode (arm request)
    #[serde(default = "default_arm_jobs")]
    pub arm_jobs: Vec<JobDef>,

    /// Additional or replaced node addresses
    #[serde(default)]
    pub nodes: Vec<NodeAddress>,
}

fn default_id() -> String {
    "ecusim".to_string()
}

fn default_cases() -> String {
    "config/cases.json".to_string()
}

impl Default for EcuSimConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            cases: default_cases(),
            transport: TransportSection::default(),
            responder: ResponderConfig::default(),
            modes: ModeConfig::default(),
            normal_jobs: default_normal_jobs(),
            arm_jobs: default_arm_jobs(),
            nodes: Vec::new(),
        }
    }
}

impl EcuSimConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check job definitions and limits without building anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.responder.max_payload_len > MAX_PAYLOAD_LEN {
            return Err(ConfigError::PayloadLimit {
                value: self.responder.max_payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut names = HashSet::new();
        for job in self.normal_jobs.iter().chain(&self.arm_jobs) {
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
            job.phases()?;
        }
        Ok(())
    }

    pub fn node_table(&self) -> NodeTable {
        NodeTable::with_overrides(&self.nodes)
    }

    /// Resolve the transport section into a concrete transport configuration
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        self.transport.resolve(&self.node_table())
    }

    /// Build every configured frame job on the given transport
    pub fn build_jobs(&self, transport: &Arc<dyn BusTransport>) -> Result<JobSet, ConfigError> {
        let build = |defs: &[JobDef]| -> Result<Vec<Arc<FrameJob>>, ConfigError> {
            defs.iter()
                .map(|def| -> Result<Arc<FrameJob>, ConfigError> {
                    Ok(Arc::new(FrameJob::new(def.to_spec()?, transport.clone())?))
                })
                .collect()
        };

        Ok(JobSet {
            normal: build(&self.normal_jobs)?,
            arm: build(&self.arm_jobs)?,
        })
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Which transport backs the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    SocketCan,
    Mock,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default)]
    pub kind: TransportKind,

    /// CAN interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Take diagnostic IDs from the node table
    #[serde(default = "default_node")]
    pub node: Option<String>,

    /// ECU's receive CAN ID (tester sends to this); overrides the node's
    #[serde(default)]
    pub rx_id: Option<String>,

    /// ECU's transmit CAN ID (ECU sends from this); overrides the node's
    #[serde(default)]
    pub tx_id: Option<String>,

    /// Use 29-bit diagnostic identifiers
    #[serde(default)]
    pub extended: bool,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_node() -> Option<String> {
    Some("IMS".to_string())
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            interface: default_interface(),
            node: default_node(),
            rx_id: None,
            tx_id: None,
            extended: false,
        }
    }
}

impl TransportSection {
    fn resolve(&self, nodes: &NodeTable) -> Result<TransportConfig, ConfigError> {
        let node = match &self.node {
            Some(name) => Some(nodes.lookup(name).ok_or_else(|| ConfigError::UnknownNode {
                name: name.clone(),
                known: nodes.names().join(", "),
            })?),
            None => None,
        };

        let rx_id = match (&self.rx_id, node) {
            (Some(id), _) => parse_can_id(id)?,
            (None, Some(node)) => node.rx_id,
            (None, None) => return Err(ConfigError::MissingAddress),
        };
        let tx_id = match (&self.tx_id, node) {
            (Some(id), _) => parse_can_id(id)?,
            (None, Some(node)) => node.tx_id,
            (None, None) => return Err(ConfigError::MissingAddress),
        };

        Ok(match self.kind {
            TransportKind::SocketCan => TransportConfig::SocketCan(SocketCanConfig {
                interface: self.interface.clone(),
                rx_id: format!("0x{:X}", rx_id),
                tx_id: format!("0x{:X}", tx_id),
                extended: self.extended,
            }),
            TransportKind::Mock => TransportConfig::Mock(MockConfig {
                latency_ms: 0,
                rx_id,
                tx_id,
            }),
        })
    }
}

// =============================================================================
// Responder Configuration
// =============================================================================

/// Diagnostic responder settings
///
/// The segmented-transfer service IDs can be moved for OEM variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// RoutineControl service acknowledged for the transfer routine (standard: 0x31)
    #[serde(default = "default_routine_control", deserialize_with = "deserialize_hex_u8")]
    pub routine_control: u8,

    /// Routine identifier that gets a positive acknowledgement
    #[serde(default = "default_ack_routine", deserialize_with = "deserialize_hex_u16")]
    pub ack_routine: u16,

    /// TransferData service echoing the block sequence counter (standard: 0x36)
    #[serde(default = "default_transfer_data", deserialize_with = "deserialize_hex_u8")]
    pub transfer_data: u8,

    /// Upper bound for synthesized response length
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,

    /// How long one receive poll waits for a request
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Sleep between receive polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_routine_control() -> u8 {
    service_id::ROUTINE_CONTROL
}
fn default_ack_routine() -> u16 {
    0xD002
}
fn default_transfer_data() -> u8 {
    service_id::TRANSFER_DATA
}
fn default_max_payload_len() -> usize {
    MAX_PAYLOAD_LEN
}
fn default_poll_timeout_ms() -> u64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            routine_control: default_routine_control(),
            ack_routine: default_ack_routine(),
            transfer_data: default_transfer_data(),
            max_payload_len: default_max_payload_len(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// =============================================================================
// Mode Configuration
// =============================================================================

/// Dwell timings of the operating modes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    /// How long Polling keeps the arm jobs running before stopping them
    #[serde(default = "default_dwell_ms")]
    pub polling_dwell_ms: u64,

    /// Normal phase of the auto-test cycle
    #[serde(default = "default_dwell_ms")]
    pub normal_dwell_ms: u64,

    /// Quiet bus phase of the auto-test cycle
    #[serde(default = "default_quiescent_ms")]
    pub quiescent_ms: u64,
}

fn default_dwell_ms() -> u64 {
    5_000
}

fn default_quiescent_ms() -> u64 {
    45_000
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            polling_dwell_ms: default_dwell_ms(),
            normal_dwell_ms: default_dwell_ms(),
            quiescent_ms: default_quiescent_ms(),
        }
    }
}

impl From<&ModeConfig> for ModeTiming {
    fn from(config: &ModeConfig) -> Self {
        Self {
            polling_dwell: Duration::from_millis(config.polling_dwell_ms),
            normal_dwell: Duration::from_millis(config.normal_dwell_ms),
            quiescent: Duration::from_millis(config.quiescent_ms),
        }
    }
}

// =============================================================================
// Frame Job Definitions
// =============================================================================

/// Periodic frame job definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDef {
    /// Unique job name, used by the `override` console command
    pub name: String,

    /// Bus identifier - hex string "0x391" or integer
    #[serde(deserialize_with = "deserialize_can_id")]
    pub id: u32,

    /// 29-bit identifier
    #[serde(default)]
    pub extended: bool,

    /// Ordered phases; the first one is active at start
    pub phases: Vec<PhaseDef>,

    /// Temporary payload triggered by the operator
    #[serde(default, rename = "override")]
    pub override_phase: Option<OverrideDef>,
}

/// One phase of a job
///
/// `frames` and `elapsed_ms` are mutually exclusive; with neither set the
/// phase is kept forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDef {
    /// Frame payload - hex string "0000000002040000" or byte array
    #[serde(deserialize_with = "deserialize_hex_bytes_vec")]
    pub payload: Vec<u8>,

    /// Transmission interval
    pub interval_ms: u64,

    /// Leave the phase after this many frames
    #[serde(default)]
    pub frames: Option<u32>,

    /// Leave the phase after this much time
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
}

/// Temporary override definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideDef {
    #[serde(deserialize_with = "deserialize_hex_bytes_vec")]
    pub payload: Vec<u8>,
    pub interval_ms: u64,
    pub frames: u32,
}

impl JobDef {
    fn phases(&self) -> Result<Vec<Phase>, ConfigError> {
        if self.phases.is_empty() {
            return Err(ScheduleError::EmptySchedule(self.name.clone()).into());
        }
        let zero_interval = self.phases.iter().any(|def| def.interval_ms == 0)
            || self
                .override_phase
                .as_ref()
                .is_some_and(|ovr| ovr.interval_ms == 0);
        if zero_interval {
            return Err(ConfigError::ZeroInterval(self.name.clone()));
        }

        self.phases
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let threshold = match (def.frames, def.elapsed_ms) {
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::AmbiguousThreshold {
                            job: self.name.clone(),
                            phase: index,
                        })
                    }
                    (Some(n), None) => Threshold::Frames(n),
                    (None, Some(ms)) => Threshold::Elapsed(Duration::from_millis(ms)),
                    (None, None) => Threshold::Never,
                };
                Ok(Phase::new(
                    def.payload.clone(),
                    Duration::from_millis(def.interval_ms),
                    threshold,
                ))
            })
            .collect()
    }

    pub fn to_spec(&self) -> Result<JobSpec, ConfigError> {
        Ok(JobSpec {
            name: self.name.clone(),
            id: self.id,
            format: if self.extended {
                FrameFormat::Extended
            } else {
                FrameFormat::Standard
            },
            phases: self.phases()?,
            override_phase: self.override_phase.as_ref().map(|ovr| OverridePhase {
                payload: ovr.payload.clone().into(),
                interval: Duration::from_millis(ovr.interval_ms),
                frames: ovr.frames,
            }),
        })
    }
}

// =============================================================================
// Default Bench Jobs
// =============================================================================

const NM_WAKE_ID: u32 = 0x600;
const NM_STATE_ID: u32 = 0x391;

fn nm_state(state: u8) -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x00, 0x02, state, 0x00, 0x00]
}

fn phase(payload: Vec<u8>, interval_ms: u64, frames: Option<u32>) -> PhaseDef {
    PhaseDef {
        payload,
        interval_ms,
        frames,
        elapsed_ms: None,
    }
}

/// Wake frame: 10 fast frames, then a slow keep-alive
fn wake_job(name: &str) -> JobDef {
    JobDef {
        name: name.to_string(),
        id: NM_WAKE_ID,
        extended: false,
        phases: vec![
            phase(vec![0x00; 8], 20, Some(10)),
            phase(vec![0x00; 8], 1000, None),
        ],
        override_phase: None,
    }
}

fn default_normal_jobs() -> Vec<JobDef> {
    vec![
        wake_job("nm_wake"),
        JobDef {
            name: "nm_state".to_string(),
            id: NM_STATE_ID,
            extended: false,
            phases: vec![
                phase(nm_state(0x04), 20, Some(10)),
                phase(nm_state(0x01), 20, None),
            ],
            override_phase: Some(OverrideDef {
                payload: vec![0x02, 0x00],
                interval_ms: 20,
                frames: 10,
            }),
        },
    ]
}

fn default_arm_jobs() -> Vec<JobDef> {
    vec![
        wake_job("arm_wake"),
        JobDef {
            name: "arm_state".to_string(),
            id: NM_STATE_ID,
            extended: false,
            phases: vec![
                phase(nm_state(0x04), 20, Some(10)),
                phase(nm_state(0x02), 20, Some(10)),
                phase(nm_state(0x00), 20, None),
            ],
            override_phase: None,
        },
    ]
}

// =============================================================================
// Hex Parsing Helpers
// =============================================================================

/// Parse a CAN ID (supports "0x7E1" or decimal "2017")
fn parse_can_id(s: &str) -> Result<u32, ConfigError> {
    ecusim_transport::parse_can_id(s).map_err(|_| ConfigError::InvalidCanId(s.to_string()))
}

/// Parse hex string to bytes (supports "DEADBEEF", "0xDEADBEEF" or "DE AD BE EF")
fn parse_hex_bytes(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).ok()
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Deserialize a CAN ID (supports "0x391" or 913)
pub(crate) fn deserialize_can_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Hex(String),
        Int(u32),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Hex(s) => u32::from_str_radix(strip_hex_prefix(&s), 16)
            .map_err(|e| D::Error::custom(format!("invalid CAN ID '{}': {}", s, e))),
    }
}

/// Deserialize a hex u8 (supports "0x31" or 49)
fn deserialize_hex_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Hex(String),
        Int(u8),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Hex(s) => {
            u8::from_str_radix(strip_hex_prefix(&s), 16).map_err(|e| D::Error::custom(e.to_string()))
        }
    }
}

/// Deserialize a hex u16 (supports "0xD002" or 53250)
fn deserialize_hex_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Hex(String),
        Int(u16),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Hex(s) => u16::from_str_radix(strip_hex_prefix(&s), 16)
            .map_err(|e| D::Error::custom(e.to_string())),
    }
}

/// Deserialize hex bytes vec (supports "DEADBEEF" or [0xDE, 0xAD, ...])
fn deserialize_hex_bytes_vec<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexBytes {
        Hex(String),
        Array(Vec<u8>),
    }

    match HexBytes::deserialize(deserializer)? {
        HexBytes::Array(arr) => Ok(arr),
        HexBytes::Hex(s) => {
            parse_hex_bytes(&s).ok_or_else(|| D::Error::custom(format!("invalid hex '{}'", s)))
        }
    }
}
