use tracing::Level;

/// How log events are filtered and where they are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// `EnvFilter` directives, e.g. `warn,auctions=debug`.
    pub(crate) env_filter: String,
    /// Events at least this severe go to stderr, everything else to stdout.
    pub(crate) stderr_threshold: Level,
    pub(crate) json: bool,
}

impl Config {
    pub fn new(env_filter: impl Into<String>) -> Self {
        Self {
            env_filter: env_filter.into(),
            ..Default::default()
        }
    }

    /// `None` keeps the default threshold of [`Level::ERROR`].
    pub fn stderr_threshold(mut self, level: Option<Level>) -> Self {
        if let Some(level) = level {
            self.stderr_threshold = level;
        }
        self
    }

    pub fn json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_filter: "info".to_string(),
            stderr_threshold: Level::ERROR,
            json: false,
        }
    }
}
