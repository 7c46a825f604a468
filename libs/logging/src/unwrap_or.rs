/// Logs the error (with its source chain) at `debug` and continues, instead
/// of unwrapping. For `Result<(), E>` sites where failure is recoverable and
/// expected often enough that `warn!`/`error!` would be noise.
#[macro_export]
macro_rules! unwrap_or_debug {
    (
        $result:expr,
        $($arg:tt)*
    ) => {
        match $result {
            Ok(()) => {}
            Err(e) => {
                let error: &dyn ::std::error::Error = e.as_ref();

                ::tracing::debug!($($arg)*, $crate::err_with_src(error))
            }
        }
    };
}
