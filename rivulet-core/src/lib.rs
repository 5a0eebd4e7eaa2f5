//! Rivulet Core
//!
//! This crate provides the reactive recomputation core behind a dashboard
//! server. It implements:
//!
//! - Reactive primitives (signals, memos, effects, event gates)
//! - An invalidation scheduler that applies one stimulus at a time
//! - Isolated per-client sessions over shared, read-only reference data
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Dependency graph storage, propagation and ordering
//! - `session`: Sessions, the session registry and per-session stimulus queues
//! - `render`: Outputs and the artifacts handed to the render layer
//! - `table`, `value`: Reference data and widget values
//! - `config`: Application configuration and startup loading
//!
//! # Example
//!
//! ```rust,ignore
//! use rivulet_core::reactive::{Effect, Memo, Runtime, Signal};
//!
//! let runtime = Runtime::new();
//! let price = Signal::new(&runtime, 100);
//! let qty = Signal::new(&runtime, 2);
//!
//! let (p, q) = (price.clone(), qty.clone());
//! let total = Memo::new(&runtime, move || Ok(p.get() * q.get()));
//!
//! let t = total.clone();
//! Effect::new(&runtime, move || {
//!     println!("Total: {}", t.get()?);
//!     Ok(())
//! })?;
//!
//! qty.set(3)?;
//! // Effect automatically runs, prints: "Total: 300"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;
pub mod session;
pub mod table;
pub mod value;

pub use config::{AppConfig, ReferenceData};
pub use error::{BoxError, ReactiveError, ReactiveResult, StartupError, TableError};
pub use reactive::{untrack, Effect, EventGate, GateOptions, Memo, Runtime, Signal};
pub use render::{Artifact, Output};
pub use session::{Session, SessionId, SessionManager, SessionWorker, Stimulus, StimulusReport};
pub use table::Table;
pub use value::Value;
