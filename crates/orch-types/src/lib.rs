//! Shared data model for the Orchestra multi-agent runtime.
//!
//! This crate carries no I/O and no async runtime dependency; it defines
//! the plain, serializable types that `orch-transport`, `orch-coordinator`,
//! and `orch-orchestrator` build on.

pub mod agent;
pub mod collab;
pub mod message;
pub mod route;
pub mod run;
pub mod task;

pub use agent::{AgentCapability, AgentInstance, AgentStatus, AgentType, ResourceUsage};
pub use collab::{CollaborativeTask, CoordinationStrategy};
pub use message::{CompressionKind, DeliveryMode, Message, MessageHeader, MessagePriority, MessageType};
pub use route::Route;
pub use run::{Phase, PhaseRecord, RunContext, RunStatus};
pub use task::{Priority, Task, TaskError, TaskGraph, TaskLogEntry, TaskStatus};
