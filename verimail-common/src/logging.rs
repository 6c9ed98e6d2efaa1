use std::{io::IsTerminal, str::FromStr};

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Levels from quietest to noisiest; `-v` moves one step right.
const LADDER: [LevelFilter; 6] = [
    LevelFilter::OFF,
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Traffic sent to a remote server.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

/// Traffic received from a remote server.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::incoming!(level = TRACE, $($msg)*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// How chatty the binary should be on stderr.
///
/// Results go to stdout, so with no flags only warnings are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity {
    /// Number of `-v` flags.
    pub verbose: u8,
    /// `-q`: errors only, whatever else is set.
    pub quiet: bool,
}

impl Verbosity {
    /// The level to log at, starting from `LOG_LEVEL` (or WARN) and raised
    /// one step per `-v`.
    #[must_use]
    pub fn level(self, log_level: Option<&str>) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }

        let base = log_level.map_or(LevelFilter::WARN, |level| {
            LevelFilter::from_str(level).unwrap_or_else(|_| {
                eprintln!("Invalid LOG_LEVEL {level}, using {}", LevelFilter::WARN);
                LevelFilter::WARN
            })
        });

        let start = LADDER.iter().position(|l| *l == base).unwrap_or(2);
        let index = (start + usize::from(self.verbose)).min(LADDER.len() - 1);
        LADDER[index]
    }
}

/// Install the global subscriber, logging `verimail*` targets to stderr.
///
/// Must be called at most once, from a binary.
pub fn init(verbosity: Verbosity) {
    let level = verbosity.level(std::env::var("LOG_LEVEL").ok().as_deref());

    let ours = FilterFn::new(move |metadata| {
        metadata.target().starts_with("verimail") && *metadata.level() <= level
    });

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_ansi(std::io::stderr().is_terminal())
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(ours),
        )
        .init();
}
