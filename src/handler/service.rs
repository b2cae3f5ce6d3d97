//! Type-based handlers.
//!
//! A [`Service`] is constructed fresh for each dispatch and consumed by the
//! call, so no state can carry over from one request to the next.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Default)]
//! struct Greeter;
//!
//! impl Service for Greeter {
//!     type Output = String;
//!
//!     async fn invoke(self, request: Request) -> Result<String, HandlerError> {
//!         let name: String = request.data_as()?;
//!         Ok(format!("hello {}", name))
//!     }
//! }
//!
//! let router = Router::new().service::<Greeter>("greet");
//! ```

use std::future::Future;

use serde::Serialize;

use crate::error::HandlerError;
use crate::protocol::Request;

/// A handler type with a default entry point.
///
/// Use [`RouteTable::register_method`](super::RouteTable::register_method)
/// to route to another method of the same type.
pub trait Service: Default + Send + 'static {
    /// Reply data.
    type Output: Serialize + Send + 'static;

    /// Handle one request.
    fn invoke(
        self,
        request: Request,
    ) -> impl Future<Output = Result<Self::Output, HandlerError>> + Send + 'static;
}
