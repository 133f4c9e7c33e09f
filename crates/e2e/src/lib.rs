//! Platform E2E Test Harness
//!
//! This crate drives end-to-end checks of a hosted platform's dashboard and
//! management API:
//! - Resolves per-environment configuration and skips groups that lack it
//! - Signs in once and shares the browser session artifact
//! - Runs each group's dependent steps in order with carried state
//! - Runs independent groups in parallel, serializing shared resources
//! - Polls for eventually consistent platform state with bounded budgets
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Suite Runner (Rust)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteRunner                                                │
//! │    ├── Configuration::resolve(keys) -> Configured | skip    │
//! │    ├── SessionBootstrapper::authenticate() -> artifact      │
//! │    ├── JoinSet + Semaphore + ResourceLocks                  │
//! │    └── Sequencer::run(group, ctx) -> GroupReport            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkflowGroup                                              │
//! │    ├── name, tags, docs, required keys, resources           │
//! │    ├── steps: [Step]  (in order, may be excluded)           │
//! │    │     └── fn(&StepContext, &mut CarriedState)            │
//! │    └── finally: cleanup, always runs                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Groups                                                     │
//! │    ├── groups/*.yaml   UI navigation via Playwright         │
//! │    └── suites::builtin()  management API workflows          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod assertions;
pub mod browser;
pub mod context;
pub mod error;
pub mod locks;
pub mod report;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod spec;
pub mod state;
pub mod suites;

pub use api::{ApiResponse, Endpoint, ManagementApi};
pub use assertions::{ensure, ensure_defined, ensure_eq, ensure_matches, poll_for, poll_until, PollPolicy};
pub use browser::{Browser, BrowserConfig, BrowserDriver, BrowserSession, UiAction};
pub use context::StepContext;
pub use error::{E2eError, E2eResult, ErrorKind};
pub use report::{GroupOutcome, GroupReport, StepReport, StepStatus, SuiteReport};
pub use runner::{RunnerConfig, SuiteRunner};
pub use sequencer::{Sequencer, SequencerConfig, Step, StepFuture, WorkflowGroup};
pub use session::{SessionArtifact, SessionBootstrapper};
pub use spec::{load_groups, GroupSpec, StepSpec};
pub use state::CarriedState;
