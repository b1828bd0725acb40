//! Enactor - enactment engine for serverless workflows
//!
//! Runs an already-built tree of execution nodes against functions deployed
//! on Google, Azure, AWS or IBM, with timing constraints and cross-provider
//! failover.
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/        YAML/JSON → NodeSpec tree, input/output decls    │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  node/       Execution node tree (function + control nodes)   │
//! │  runner/     Root call, workflow-level events                 │
//! │  output/     Raw result → typed outputs                       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  invocation/ Gateways, timing constraints, failover          │
//! │  provider/   Provider detection, credential bundles          │
//! │  event_log/  Invocation records                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | Node tree description, `DataIn` / `DataOut` declarations |
//! | [`node`] | `Node` trait, `pass_result` / `call` contract |
//! | [`invocation`] | Identity counter, `Gateway`, `FaultToleranceEngine` |
//! | [`output`] | Output parsing and type coercion |
//! | [`context`] | Shared per-run `ExecutionContext` |
//! | [`runner`] | `Runner` entry point |
//! | [`provider`] | `Provider`, `ProviderAccounts`, link inspection |
//! | [`event_log`] | `InvocationRecord`, `EventLog` |
//! | [`config`] | `EngineConfig`, credentials file |
//! | [`error`] | Error types with fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod ast;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod context;
pub mod node;
pub mod output;
pub mod runner;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod event_log;
pub mod invocation;
pub mod provider;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

pub use ast::WorkflowSpec;
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use error::{EnactError, FixSuggestion};
pub use event_log::{EventKind, EventLog, InvocationRecord};
pub use invocation::{next_invocation_id, Gateway, HttpGateway, MockGateway};
pub use node::{DataValues, LoopScope, Node, Outcome};
pub use runner::{RunResult, Runner};
