pub mod cleanup;
pub mod file;
mod format;
#[macro_use]
mod unwrap_or;
mod ansi;
mod err_with_sources;

use anyhow::{Context, Result};
use tracing::{Subscriber, subscriber::DefaultGuard};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::ParseError,
    fmt,
    layer::SubscriberExt as _,
    reload,
    util::SubscriberInitExt,
};

pub use ansi::stdout_supports_ansi;
pub use err_with_sources::{ErrorWithSources, err_with_src};
pub use format::Format;

/// Registers a global subscriber with stdout logging and `additional_layer`
/// (e.g. the file-logging layer from [`file::layer`]).
pub fn setup_global_subscriber<L>(directives: String, additional_layer: L, stdout_json: bool) -> Result<FilterReloadHandle>
where
    L: Layer<Registry> + Send + Sync,
{
    if let Err(error) = output_vt100::try_init() {
        tracing::debug!("Failed to init terminal colors: {error}");
    }

    let (filter1, reload_handle1) = try_filter(&directives).context("Failed to parse directives")?;
    let (filter2, reload_handle2) = try_filter(&directives).context("Failed to parse directives")?;

    let subscriber = Registry::default()
        .with(additional_layer.with_filter(filter1))
        .with(match stdout_json {
            true => fmt::layer()
                .json()
                .flatten_event(true)
                .with_ansi(stdout_supports_ansi())
                .with_filter(filter2)
                .boxed(),
            false => fmt::layer()
                .with_ansi(stdout_supports_ansi())
                .event_format(Format::new())
                .with_filter(filter2)
                .boxed(),
        });
    init(subscriber)?;

    Ok(reload_handle1.merge(reload_handle2))
}

/// Sets up a bootstrap logger, active until the global subscriber replaces
/// it once configuration has been fully loaded.
pub fn setup_bootstrap() -> Result<DefaultGuard> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let (filter, _) = try_filter(&directives).context("failed to parse directives")?;
    let layer = tracing_subscriber::fmt::layer().event_format(Format::new()).with_filter(filter);
    let subscriber = Registry::default().with(layer);

    Ok(tracing::dispatcher::set_default(&subscriber.into()))
}

#[expect(clippy::disallowed_methods, reason = "This is the alternative function.")]
pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with some crates already silenced.
pub fn try_filter<S>(directives: &str) -> Result<(reload::Layer<EnvFilter, S>, FilterReloadHandle), ParseError>
where
    S: 'static,
{
    let env_filter = parse_filter(directives)?;

    let (layer, reload_handle) = reload::Layer::new(env_filter);
    let handle = FilterReloadHandle {
        inner: std::sync::Arc::new(reload_handle),
    };

    Ok((layer, handle))
}

fn parse_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    /// A filter directive that silences noisy crates.
    ///
    /// For debugging, it is useful to set a catch-all log like `debug`. This
    /// obviously creates a lot of logs from all kinds of crates. For our
    /// usecase, logs from `webrtc` and other crates are very likely not what
    /// you want to see.
    ///
    /// By prepending this directive to the active log filter, a simple
    /// directive like `debug` actually produces useful logs. If necessary,
    /// you can still activate logs from these crates by restating them in
    /// your directive with a lower filter, i.e. `webrtc=debug`.
    const IRRELEVANT_CRATES: &str = "webrtc=warn,webrtc_ice=warn,webrtc_dtls=warn,hyper_util=info,h2=info,tokio_tungstenite=info";

    let env_filter = if directives.is_empty() {
        EnvFilter::try_new(IRRELEVANT_CRATES)?
    } else {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))?
    };

    Ok(env_filter)
}

pub struct FilterReloadHandle {
    inner: std::sync::Arc<dyn Reload + Send + Sync>,
}

impl std::fmt::Debug for FilterReloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FilterReloadHandle").finish_non_exhaustive()
    }
}

impl FilterReloadHandle {
    pub fn reload(&self, new_filter: &str) -> Result<()> {
        self.inner.reload(new_filter)?;

        Ok(())
    }

    pub fn merge(self, other: FilterReloadHandle) -> Self {
        Self {
            inner: std::sync::Arc::new((self, other)),
        }
    }
}

trait Reload {
    fn reload(&self, new_filter: &str) -> Result<()>;
}

impl<S> Reload for tracing_subscriber::reload::Handle<EnvFilter, S>
where
    S: 'static,
{
    fn reload(&self, new_filter: &str) -> Result<()> {
        let filter = parse_filter(new_filter).context("Failed to parse new filter")?;

        self.reload(filter).context("Failed to reload filter")?;

        Ok(())
    }
}

impl Reload for (FilterReloadHandle, FilterReloadHandle) {
    fn reload(&self, new_filter: &str) -> Result<()> {
        let (a, b) = self;

        a.reload(new_filter)?;
        b.reload(new_filter)?;

        Ok(())
    }
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

pub fn test_global(directives: &str) {
    init(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(directives)
            .finish(),
    )
    .ok();
}
