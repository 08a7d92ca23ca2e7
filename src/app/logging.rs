use log::LevelFilter;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `env_logger` filter syntax, e.g. "info" or "vkchain=debug". Takes precedence over `RUST_LOG`.
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

/// Which filter the logger starts with
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterSource {
    Directives(String),
    Level(LevelFilter),
}

fn filter_source(configured: Option<String>, rust_log: Option<String>) -> FilterSource {
    configured
        .or(rust_log)
        .filter(|directives| !directives.trim().is_empty())
        .map(FilterSource::Directives)
        .unwrap_or(FilterSource::Level(LevelFilter::Info))
}

/// Installs `env_logger` as the global logger. If one is already installed it is kept.
pub fn init_logging(config: LoggingConfig) {
    let mut builder = env_logger::Builder::new();
    match filter_source(config.env_filter, std::env::var("RUST_LOG").ok()) {
        FilterSource::Directives(directives) => builder.parse_filters(&directives),
        FilterSource::Level(level) => builder.filter_level(level),
    };
    builder.write_style(config.write_style);

    match builder.try_init() {
        Ok(()) => log::debug!("Logger installed"),
        Err(err) => log::warn!("Keeping the existing logger: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_beats_rust_log() {
        assert_eq!(
            filter_source(Some("vkchain=trace".into()), Some("warn".into())),
            FilterSource::Directives("vkchain=trace".into())
        );
        assert_eq!(
            filter_source(None, Some("warn".into())),
            FilterSource::Directives("warn".into())
        );
    }

    #[test]
    fn falls_back_to_info() {
        assert_eq!(filter_source(None, None), FilterSource::Level(LevelFilter::Info));
        assert_eq!(filter_source(Some("  ".into()), None), FilterSource::Level(LevelFilter::Info));
    }

    #[test]
    fn second_install_keeps_the_first_logger() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig {
            env_filter: Some("debug".into()),
            ..Default::default()
        });
        assert!(log::max_level() >= LevelFilter::Error);
    }
}
