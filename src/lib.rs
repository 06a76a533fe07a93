//! devdispatch
//!
//! A local development dispatcher. Requests under `/api/` are either answered
//! from mock templates or forwarded to a real upstream; everything else passes
//! through to the rest of the dev server.
//!
//! # Features
//!
//! - **Mode Toggle**: Mock or Proxy, read per request and flippable at runtime
//! - **Key Normalization**: `/api/user/42` and `/api/user/7` share a handler
//! - **Handler Registry**: in-code handlers plus a directory of YAML/JSON templates
//! - **Template Rules**: `"list|3": [{"id|+1": 1}]` style generation
//! - **Latency Simulation**: fixed delay on every mock response
//! - **Upstream Proxy**: named environments, original `Host` preserved
//!
//! # Example Configuration
//!
//! ```yaml
//! mock: true
//! latency_ms: 300
//! mock_dir: mock
//! routes:
//!   - /api/{type}
//! targets:
//!   dev: http://dev.com
//!   test: http://test.com
//! active_target: dev
//! ```
//!
//! With `mock/api/products/0.yaml` containing
//!
//! ```yaml
//! result|3:
//!   - id|+1: 1
//! ```
//!
//! `GET /api/products/123` answers
//! `{"returnCode":0,"returnMsg":"OK","result":[{"id":1},{"id":2},{"id":3}]}`.

pub mod config;
pub mod dispatcher;
pub mod latency;
pub mod matcher;
pub mod mode;
pub mod normalize;
pub mod proxy;
pub mod registry;
pub mod request;
pub mod server;
pub mod synthesizer;
pub mod targets;
pub mod template;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatch, Dispatcher, RouteDecision};
pub use registry::{HandlerError, MockHandler, StaticHandlers};
pub use request::MockRequest;
pub use synthesizer::Envelope;
