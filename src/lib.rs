//! # a3s-shield
//!
//! Client-side content moderation pipeline for live, mutating pages.
//!
//! ## Overview
//!
//! `a3s-shield` discovers text and image fragments in a page tree, sends
//! them to a classification backend without flooding it, and reversibly
//! blocks whatever comes back flagged. Swap backends (HTTP service,
//! in-memory script, etc.) and page models without changing the pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_shield::{MemoryGateway, MemoryPage, NodeTree, Session, SessionPolicy, ShieldConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_shield::Result<()> {
//! let page = Arc::new(MemoryPage::with_body(
//!     "https://example.com/article",
//!     vec![NodeTree::element("p").with_text("Some article text")],
//! ));
//! let session = Session::new(page, Arc::new(MemoryGateway::default()), ShieldConfig::default())?;
//!
//! let mut events = session.subscribe();
//! session.start(SessionPolicy::default()).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Gateways
//!
//! - **http**: the analysis service's REST API
//! - **memory**: scripted verdicts for tests and offline use
//!
//! ## Architecture
//!
//! - **PageScanner**: walks the page, filters, queues fragments
//! - **Dispatcher**: cache + in-flight coalescing in front of the gateway
//! - **BlockingStateMachine**: replace / blur / hide, with exact reversal
//! - **Session**: per-page wiring, lifecycle and commands
//! - **PageDocument** trait: the page model everything operates on

pub mod blocker;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod page;
pub mod policy;
pub mod scanner;
pub mod session;
pub mod settings;
pub mod types;

// Re-export core types
pub use blocker::{select_method, BlockOutcome, BlockRecord, BlockingStateMachine, Severity};
pub use cache::{CacheStats, ResultCache};
pub use config::{
    CacheConfig, DispatchConfig, EventsConfig, GatewayConfig, ScannerConfig, ShieldConfig,
};
pub use dispatch::{Classification, DispatchStats, Dispatcher, VerdictSource};
pub use error::{GatewayFailure, Result, ShieldError};
pub use gateway::{ClassificationRequest, ClassifierGateway};
pub use page::{Mark, MutationBatch, Node, NodeId, NodeTree, PageDocument, Presentation};
pub use policy::{BlockPreference, FilterLevel, SessionPolicy};
pub use scanner::PageScanner;
pub use session::{Command, CommandOutcome, Session, SessionStats, StartOutcome};
pub use settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};
pub use types::{
    BlockMethod, ContentKind, Fingerprint, Fragment, FragmentState, IssueReport, ShieldEvent,
    Verdict,
};

// Re-export implementations for convenience
pub use gateway::http::HttpGateway;
pub use gateway::memory::MemoryGateway;
pub use page::memory::MemoryPage;
