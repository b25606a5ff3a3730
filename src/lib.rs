//! UniMock
//!
//! A file-driven HTTP mock server. Each route is described by a small text
//! document; the engine answers matching requests with generated values,
//! injected errors and simulated latency.
//!
//! # Features
//!
//! - **Route Templates**: One document per route, loaded from a directory tree
//! - **Path Patterns**: `:name` segment captures and `*` wildcards
//! - **Generated Values**: XML/JSON/regex extraction, random values, request lookups
//! - **Error Injection**: Answer with an error branch at a configured percentage
//! - **Latency Simulation**: Pad responses up to a target response time
//! - **Hot Reload**: Rebuild the template set and swap it in atomically
//!
//! # Example Template
//!
//! ```text
//! GET /users/:id
//! Vars:
//!   id: reqPath; id
//!   score: randomNum; 1-100
//! Error Config:
//!   Percent: 5%
//!   Status: 503
//! Success body:
//!   {"id": "$id$", "score": $score$}
//! Response time:
//!   200
//! ```

pub mod config;
pub mod engine;
pub mod generator;
pub mod loader;
pub mod matcher;
pub mod server;
pub mod store;
pub mod template;
pub mod xpath;

pub use config::MockServerConfig;
pub use engine::{MockEngine, MockRequest, MockResponse};
pub use store::{TemplateSet, TemplateStore};
pub use template::Template;
