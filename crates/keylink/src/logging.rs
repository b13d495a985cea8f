use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Crates whose events follow `--log-level`. Everything else stays at WARN
/// or quieter so dependency chatter does not drown a report trace.
const LINK_TARGETS: [&str; 5] = [
    "keylink",
    "keylink_transport",
    "keylink_frame",
    "keylink_mux",
    "keylink_channel",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Per-crate filter for `level`, with optional `target=level` directives
/// layered on top.
pub fn link_filter(level: LogLevel, directives: Option<&str>) -> Result<Targets, String> {
    let level = level.as_filter();
    let mut filter = Targets::new()
        .with_default(level.min(LevelFilter::WARN))
        .with_targets(LINK_TARGETS.map(|target| (target, level)));

    if let Some(directives) = directives.filter(|d| !d.trim().is_empty()) {
        let extra: Targets = directives
            .parse()
            .map_err(|err| format!("invalid log filter {directives:?}: {err}"))?;
        if let Some(default) = extra.default_level() {
            filter = filter.with_default(default);
        }
        filter = filter.with_targets(extra);
    }
    Ok(filter)
}

pub fn init_logging(format: LogFormat, level: LogLevel, directives: Option<&str>) {
    let filter = link_filter(level, directives).unwrap_or_else(|err| {
        eprintln!("warning: {err}; using --log-level only");
        link_filter(level, None).unwrap_or_default()
    });

    // Targets name the layer (transport, mux, channel) a line came from.
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    let _ = match format {
        LogFormat::Text => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry
            .with(layer.json().with_current_span(false))
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn link_crates_follow_the_chosen_level() {
        let filter = link_filter(LogLevel::Trace, None).unwrap();
        assert!(filter.would_enable("keylink_mux::device", &Level::TRACE));
        assert!(filter.would_enable("keylink_transport::usb", &Level::TRACE));
        assert!(!filter.would_enable("nusb::platform", &Level::DEBUG));
        assert!(filter.would_enable("nusb::platform", &Level::WARN));
    }

    #[test]
    fn quiet_levels_also_quiet_dependencies() {
        let filter = link_filter(LogLevel::Error, None).unwrap();
        assert!(!filter.would_enable("keylink_channel::channel", &Level::WARN));
        assert!(!filter.would_enable("hidapi", &Level::WARN));
        assert!(filter.would_enable("hidapi", &Level::ERROR));

        let off = link_filter(LogLevel::Off, None).unwrap();
        assert!(!off.would_enable("keylink", &Level::ERROR));
    }

    #[test]
    fn directives_override_single_targets() {
        let filter = link_filter(LogLevel::Warn, Some("keylink_mux=trace,nusb=debug")).unwrap();
        assert!(filter.would_enable("keylink_mux::device", &Level::TRACE));
        assert!(!filter.would_enable("keylink_channel", &Level::INFO));
        assert!(filter.would_enable("nusb", &Level::DEBUG));
    }

    #[test]
    fn bad_directives_are_reported() {
        assert!(link_filter(LogLevel::Warn, Some("keylink_mux=loud")).is_err());
        assert!(link_filter(LogLevel::Warn, Some("  ")).is_ok());
    }
}
