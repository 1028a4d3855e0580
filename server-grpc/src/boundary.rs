//! Request boundary: every RPC runs inside [`guard`], which tags its logs with
//! a request id, maps domain errors to gRPC statuses and turns panics into
//! `Internal`.

use futures::FutureExt;
use shared::Error;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tonic::Status;
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

/// The only detail an `Internal` status ever carries.
pub const INTERNAL_MESSAGE: &str = "internal server error";

pub fn request_span(method: &'static str) -> Span {
    info_span!("rpc", method, request_id = %Uuid::new_v4())
}

/// Caller errors keep their message; everything else is opaque.
pub fn to_status(err: &Error) -> Status {
    match err {
        Error::InvalidIdentifier(msg) => Status::invalid_argument(msg.clone()),
        Error::OriginNotFound => Status::not_found("thumbnail not found"),
        _ => Status::internal(INTERNAL_MESSAGE),
    }
}

/// Runs `fut`, logging a panic instead of unwinding into the caller.
/// Returns `None` if it panicked.
pub async fn contain<F>(what: &str, fut: F) -> Option<F::Output>
where
    F: Future,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(output) => Some(output),
        Err(payload) => {
            error!(panic = panic_message(payload.as_ref()), "{what} panicked");
            None
        }
    }
}

pub async fn guard<T, F>(method: &'static str, fut: F) -> Result<T, Status>
where
    F: Future<Output = shared::Result<T>>,
{
    async move {
        let started = Instant::now();
        let outcome = contain(method, fut).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Some(Ok(value)) => {
                info!(elapsed_ms, "request succeeded");
                Ok(value)
            }
            Some(Err(e)) if e.is_terminal() => {
                warn!(elapsed_ms, error = %e, "request rejected");
                Err(to_status(&e))
            }
            Some(Err(e)) => {
                error!(elapsed_ms, error = %e, "request failed");
                Err(to_status(&e))
            }
            None => Err(Status::internal(INTERNAL_MESSAGE)),
        }
    }
    .instrument(request_span(method))
    .await
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
