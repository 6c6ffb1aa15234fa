//! Shared domain types for the Palaver conversation engine.
//!
//! Holds the message and phase model, the closed chat event set,
//! configuration, and the top-level error type used across crates.

pub mod config;
pub mod error;
pub mod events;
pub mod telemetry;
pub mod types;

pub use config::{
    AgentPreferences, ChatConfig, EngineConfig, MemoryPreferenceStore, PreferenceStore,
    TimelineConfig, TomlPreferenceStore, TransportConfig,
};
pub use error::{PalaverError, Result};
pub use events::ChatEvent;
pub use types::*;
