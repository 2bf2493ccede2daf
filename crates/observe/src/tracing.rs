use {
    crate::config::Config,
    std::{io::IsTerminal, panic::PanicHookInfo, sync::Once},
    time::macros::format_description,
    tracing_subscriber::{
        EnvFilter,
        Layer,
        Registry,
        fmt::{time::UtcTime, writer::MakeWriterExt as _},
        prelude::*,
        util::SubscriberInitExt,
    },
};

/// Initializes the tracing setup shared between the binaries.
/// The filter in `config` has similar syntax to env_logger. It is documented
/// at https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html
pub fn initialize(config: &Config) {
    set_tracing_subscriber(config);
    std::panic::set_hook(Box::new(tracing_panic_hook));
}

/// Like [`initialize`], but can be called multiple times in a row. Later calls
/// are ignored.
///
/// Useful for tests.
pub fn initialize_reentrant(config: &Config) {
    // The tracing subscriber below is global object so initializing it again in the
    // same process by a different thread would fail.
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        set_tracing_subscriber(config);
        std::panic::set_hook(Box::new(tracing_panic_hook));
    });
}

fn set_tracing_subscriber(config: &Config) {
    let writer = std::io::stderr
        .with_max_level(config.stderr_threshold)
        .or_else(std::io::stdout);
    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_timer(timer);
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer
            .with_ansi(std::io::stdout().is_terminal())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(&config.env_filter)))
        .init();
    tracing::info!(filter = %config.env_filter, "initialized tracing");
}

/// Panic hook that prints roughly the same message as the default panic hook
/// but uses tracing:error instead of stderr.
fn tracing_panic_hook(panic: &PanicHookInfo) {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::error!("thread '{name}' {panic}\nstack backtrace:\n{backtrace}");
}
