//! Domain model for the fleet monitoring backend.
//!
//! Pure types and merge logic only; persistence and transport live in
//! `fleet-server`. Every entity here is scoped by a tenant id, and every
//! merge function only touches the fields present in its input.

pub mod detection;
pub mod error;
pub mod event;
pub mod host;
pub mod process;

pub use detection::{DetectionConfig, DetectionConfigPatch};
pub use error::{ItemError, RegistryError};
pub use event::{EventKind, EventPayload, ProcessEvent};
pub use host::{Host, HostReport, MACHINE_ID_LENGTH};
pub use process::{Process, ProcessReport, ProcessStatus, ValidProcessReport};
