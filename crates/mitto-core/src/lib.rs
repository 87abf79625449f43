// SPDX-License-Identifier: Apache-2.0
//! The session runtime and its coordination layer: the part of mitto that
//! decides who may speak to an agent and when, multiplexes an agent's
//! asynchronous stream back to many listeners, queues and periodically
//! injects user prompts, and lets one running session drive, inspect, or
//! spawn another through a structured tool interface.

pub mod agent_connection;
pub mod correlation;
pub mod error;
pub mod event;
pub mod hooks;
pub mod lock;
pub mod manager;
pub mod periodic;
pub mod persistence;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod ui_prompt;

pub use agent_connection::{AgentConnection, AgentUpdate, StopReason};
pub use correlation::PendingToolCorrelation;
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventLog, EventSubscription, EventType};
pub use hooks::{HookOutcome, HookPipeline, ResolvedAttachment};
pub use lock::{LockInfo, LockStatus, SessionLock};
pub use manager::{AgentConnectionFactory, CreateSessionArgs, SessionManager};
pub use periodic::{Frequency, FrequencyUnit, PeriodicPrompt};
pub use queue::{MoveDirection, Queue, QueuedMessage, DEFAULT_QUEUE_MAX_SIZE};
pub use scheduler::PeriodicScheduler;
pub use session::{NewSessionArgs, Session, SessionMetadata, SessionState};
pub use ui_prompt::{UIPromptOption, UIPromptOutcome, UIPromptRegistry, UIPromptRequest, UIPromptType};
