//! Level shortcuts over the process-wide handle.
//!
//! ```ignore
//! otelkit::info!(&cx, "order created", order_id = id, items = items.len());
//! otelkit::error!(&cx, "payment failed", reason = %err);
//! ```
//!
//! `key = %value` records the value's `Display` form.

#[doc(hidden)]
#[macro_export]
macro_rules! __otelkit_log {
    (@fields $builder:expr; $key:ident = % $value:expr $(, $($rest:tt)*)?) => {
        $crate::__otelkit_log!(@fields
            $builder.field(stringify!($key), $crate::AttrValue::display(&$value));
            $($($rest)*)?
        )
    };
    (@fields $builder:expr; $key:ident = $value:expr $(, $($rest:tt)*)?) => {
        $crate::__otelkit_log!(@fields
            $builder.field(stringify!($key), $crate::AttrValue::from($value));
            $($($rest)*)?
        )
    };
    (@fields $builder:expr;) => {
        $builder.send()
    };
    ($level:ident, $cx:expr, $msg:expr $(, $($fields:tt)*)?) => {
        $crate::__otelkit_log!(@fields
            $crate::log().context($cx).$level().msg($msg);
            $($($fields)*)?
        )
    };
}

/// Send a debug record through the process-wide handle.
#[macro_export]
macro_rules! debug {
    ($($args:tt)+) => {
        $crate::__otelkit_log!(debug, $($args)+)
    };
}

/// Send an info record through the process-wide handle.
#[macro_export]
macro_rules! info {
    ($($args:tt)+) => {
        $crate::__otelkit_log!(info, $($args)+)
    };
}

/// Send a warn record through the process-wide handle.
#[macro_export]
macro_rules! warn {
    ($($args:tt)+) => {
        $crate::__otelkit_log!(warn, $($args)+)
    };
}

/// Send an error record through the process-wide handle.
#[macro_export]
macro_rules! error {
    ($($args:tt)+) => {
        $crate::__otelkit_log!(error, $($args)+)
    };
}
