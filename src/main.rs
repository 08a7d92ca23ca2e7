use color_eyre::Result;
use vkchain::app::config::AppConfig;
use vkchain::app::logging::{init_logging, LoggingConfig};
use vkchain::app::App;

fn main() -> Result<()> {
    color_eyre::install()?;

    let config = AppConfig::from_process_env()?;
    init_logging(LoggingConfig {
        env_filter: config.log_filter.clone(),
        ..Default::default()
    });

    App::new(config).run()
}
