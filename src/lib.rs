//! embercore - High-performance, zero-allocation HTTP/1.1 server core
//!
//! A performance-oriented HTTP server library with comprehensive configuration
//! for memory management, connection handling, and protocol support.
//! Designed for embedding in daemons that need fine-grained control over
//! resources and scheduling.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: Full protocol with persistent connections and chunked encoding
//! - **HTTP/1.0**: Basic protocol support for legacy clients and simple requests
//! - **Upgrade**: `101 Switching Protocols` handoff to a raw, bidirectional
//!   [`UpgradeHandle`](server::upgrade::UpgradeHandle) for WebSocket-style protocols
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in DoS/DDoS protection** - enabled by default, with no performance penalty.
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement the [`ConnectionFilter`] trait to
//!   reject unwanted connections at the TCP level.
//!
//! ## 🚀 Performance & Memory
//! - **Zero-allocation** - no memory allocations after server startup.
//! - **Pre-allocated memory for each connection** - linear and transparent scaling.
//!
//! ## 🌐 Protocol & Management
//! - **Automatic protocol detection for each request** - keep-alive eliminates
//!   the need for manual protocol selection.
//! - **Storing data between requests** - ability to store data between requests in a
//!   single connection using the [`ConnectionData`] trait.
//! - **Four scheduling modes** - [`WorkMode`](server::server_impl::WorkMode) lets the
//!   embedding daemon decide who drives I/O: an external event loop, an external
//!   periodic tick, an internal worker-thread pool, or one task per connection.
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - automatic 503 responses when overloaded.
//! - [**Custom error format**
//!   ](https://docs.rs/embercore/latest/embercore/limits/struct.ServerLimits.html#structfield.json_errors) -
//!   structured JSON (with codes/descriptions) or a plain HTTP response.
//! - **Resource protection** - automatic closure of connections exceeding set limits.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `embercore` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```bash
//! cargo add embercore tokio --features tokio/full
//! ```
//! Or manually:
//! ```toml
//! [dependencies]
//! embercore = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use embercore::{Server, Handler, Request, Response, Action, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Action {
//!         Action::respond(resp.status(StatusCode::Ok).body("Hello World!"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! For more examples including connection filtering, uploads and protocol
//! upgrades, see the `demos/` directory.
//!
//! # Use Cases
//!
//! - **Embedding in daemons** - the connection state machine is agnostic to who
//!   drives it; pick the scheduling mode that matches the host process.
//! - **Resource-constrained environments** - predictable memory usage.
//! - **Internal APIs** - security-conscious defaults.
//! - **Performance-critical applications** - zero-allocation design.
pub(crate) mod http {
    pub(crate) mod date;
    pub mod query;
    pub(crate) mod post;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod action;
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod upgrade;
}
pub(crate) mod errors;
pub mod limits;
pub(crate) mod pool;

pub use crate::{
    errors::Error,
    http::{
        post::{PostError, PostEvent, PostEventKind, PostProcessor},
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::{
        action::{Action, UploadAction},
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder, ServerHandle, WorkMode},
        upgrade::UpgradeHandle,
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use embercore::{Action, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Action {
                Action::respond(resp.status(StatusCode::Ok).body("Hello world!"))
            }
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
