//! Structured log helpers.
//!
//! Every event carries a `context` field naming the bridge context that
//! emitted it, so interleaved logs from the page, relay and background can be
//! told apart.

/// Log an event tagged with the emitting context.
#[macro_export]
macro_rules! log_event {
    (info, $context:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            context = $context,
            $($($field)*,)?
            $msg
        )
    };

    (warn, $context:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            context = $context,
            $($($field)*,)?
            $msg
        )
    };

    (error, $context:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            context = $context,
            $($($field)*,)?
            $msg
        )
    };

    (debug, $context:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            context = $context,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a request-related event with standard fields.
#[macro_export]
macro_rules! log_request_event {
    ($level:ident, $context:expr, $msg:expr, $method:expr, $origin:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            context = $context,
            method = %$method,
            origin = %$origin,
            $($($field)*,)?
            $msg
        )
    };
}
