//! Status store rows.
//!
//! Two relations live in the target database next to the managed schema:
//! one row per grain and one row per element. Together they make a run
//! resumable and let an operator see what broke.

use crate::error::Error;
use crate::score::{checksum_from_hex, checksum_to_hex, ElementKind, Grain, VersionString};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a grain status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrainState {
    /// Grain is up to date.
    Ready,
    /// Grain elements are being applied.
    Upgrading,
    /// Last run failed on at least one element.
    Error,
    /// Grain must be re-applied regardless of version and checksum.
    Recover,
    /// Grain is excluded from automatic upgrades.
    Lock,
}

impl GrainState {
    /// Integer code stored in the grains table.
    pub fn code(&self) -> i32 {
        match self {
            GrainState::Ready => 0,
            GrainState::Upgrading => 1,
            GrainState::Error => 2,
            GrainState::Recover => 3,
            GrainState::Lock => 4,
        }
    }

    /// Decode a stored integer code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(GrainState::Ready),
            1 => Some(GrainState::Upgrading),
            2 => Some(GrainState::Error),
            3 => Some(GrainState::Recover),
            4 => Some(GrainState::Lock),
            _ => None,
        }
    }

    /// States a run may start from.
    pub fn allows_upgrade_run(&self) -> bool {
        matches!(self, GrainState::Ready | GrainState::Recover | GrainState::Lock)
    }
}

impl std::fmt::Display for GrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrainState::Ready => write!(f, "ready"),
            GrainState::Upgrading => write!(f, "upgrading"),
            GrainState::Error => write!(f, "error"),
            GrainState::Recover => write!(f, "recover"),
            GrainState::Lock => write!(f, "lock"),
        }
    }
}

/// State of an element status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementState {
    /// Element is being applied.
    Upgrading,
    /// Element was applied successfully.
    Ready,
    /// Applying the element failed.
    Error,
}

impl std::fmt::Display for ElementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementState::Upgrading => write!(f, "upgrading"),
            ElementState::Ready => write!(f, "ready"),
            ElementState::Error => write!(f, "error"),
        }
    }
}

/// A row of the grains status table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrainStatusRow {
    /// Grain name.
    pub id: String,
    /// Version recorded on last success (or first sight).
    pub version: String,
    /// Declaration length recorded on last success.
    pub length: u32,
    /// Checksum as 8 upper-case hex digits.
    pub checksum: String,
    /// Current state.
    pub state: GrainState,
    /// Time of the last state change.
    pub last_modified: DateTime<Utc>,
    /// Diagnostic message; empty when ready.
    pub message: String,
}

impl GrainStatusRow {
    /// Row for a grain seen for the first time: state RECOVER.
    pub fn first_seen(grain: &Grain) -> Self {
        Self {
            id: grain.name.clone(),
            version: grain.version.to_string(),
            length: grain.length(),
            checksum: checksum_to_hex(grain.checksum()),
            state: GrainState::Recover,
            last_modified: Utc::now(),
            message: String::new(),
        }
    }

    /// Change state, keeping the recorded fingerprint.
    pub fn transition(&mut self, state: GrainState, message: impl Into<String>) {
        self.state = state;
        self.message = message.into();
        self.last_modified = Utc::now();
    }

    /// Mark ready and record the grain's current version and fingerprint.
    pub fn mark_ready(&mut self, grain: &Grain) {
        self.version = grain.version.to_string();
        self.length = grain.length();
        self.checksum = checksum_to_hex(grain.checksum());
        self.transition(GrainState::Ready, "");
    }

    /// Project the row into the decision-phase view.
    pub fn to_info(&self) -> Result<GrainInfo, Error> {
        let version = VersionString::parse(&self.version).map_err(|e| {
            Error::InvalidStatus(format!("grain '{}': {}", self.id, e))
        })?;
        let checksum = checksum_from_hex(&self.checksum).ok_or_else(|| {
            Error::InvalidStatus(format!(
                "grain '{}': malformed checksum '{}'",
                self.id, self.checksum
            ))
        })?;

        Ok(GrainInfo {
            version,
            length: self.length,
            checksum,
            recover: self.state == GrainState::Recover,
            lock: self.state == GrainState::Lock,
        })
    }
}

/// A row of the element status table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStatusRow {
    /// Element name.
    pub id: String,
    /// Owning grain.
    pub grain_id: String,
    /// Element kind.
    pub kind: ElementKind,
    /// Current state.
    pub state: ElementState,
    /// Time of the last state change.
    pub last_modified: DateTime<Utc>,
    /// Diagnostic message; empty unless in error.
    pub message: String,
}

impl ElementStatusRow {
    /// Create a row in the given state.
    pub fn new(
        grain_id: impl Into<String>,
        id: impl Into<String>,
        kind: ElementKind,
        state: ElementState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            grain_id: grain_id.into(),
            kind,
            state,
            last_modified: Utc::now(),
            message: message.into(),
        }
    }
}

/// In-memory projection of a grain status row used while deciding what to
/// upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct GrainInfo {
    /// Recorded version.
    pub version: VersionString,
    /// Recorded declaration length.
    pub length: u32,
    /// Recorded checksum.
    pub checksum: u32,
    /// Row is in RECOVER.
    pub recover: bool,
    /// Row is in LOCK.
    pub lock: bool,
}

/// Kind of an entry in the element registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryKind {
    /// Ordinary table.
    Table,
    /// View.
    View,
    /// Materialized view table.
    MaterializedView,
    /// Parameterized view (a function in the database).
    Function,
}

impl RegistryKind {
    /// Registry kind for an element kind. Sequences and indices are not
    /// registered.
    pub fn for_element(kind: ElementKind) -> Option<Self> {
        match kind {
            ElementKind::Table => Some(RegistryKind::Table),
            ElementKind::View => Some(RegistryKind::View),
            ElementKind::MaterializedView => Some(RegistryKind::MaterializedView),
            ElementKind::ParameterizedView => Some(RegistryKind::Function),
            ElementKind::Sequence | ElementKind::Index => None,
        }
    }

    /// The element kind this registry kind tracks.
    pub fn element_kind(&self) -> ElementKind {
        match self {
            RegistryKind::Table => ElementKind::Table,
            RegistryKind::View => ElementKind::View,
            RegistryKind::MaterializedView => ElementKind::MaterializedView,
            RegistryKind::Function => ElementKind::ParameterizedView,
        }
    }
}

/// A row of the element registry: the catalog of data-bearing objects each
/// grain has ever declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRow {
    /// Owning grain.
    pub grain_id: String,
    /// Object name.
    pub name: String,
    /// Object kind.
    pub kind: RegistryKind,
    /// The object is no longer declared by its grain.
    pub orphaned: bool,
}
