use std::sync::Arc;
use std::time::Duration;

use assistant_bridge::app::App;
use assistant_bridge::gateway::GatewayPolicy;
use assistant_bridge::{ChatGateway, Config, OpenAiAssistant, RunDriver, ThreadStore, default_registry};
use color_eyre::{Result, eyre::WrapErr};
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    color_eyre::install()?;

    // Load .env (optional). If the file doesn't exist, ignore the error.
    let _ = dotenvy::dotenv();

    // ログ: 標準出力は使わず、ファイルへのみ出力してratatuiと衝突しないようにする
    let file_appender = rolling::daily("logs", "app.log");
    // guard は drop するとログが失われるため main の終わりまで保持
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // ファイルにANSIカラー不要
        .with_target(true);

    tracing_subscriber::registry().with(env_filter).with(file_layer).init();

    let config = Config::from_env()?;
    let (api_key, assistant_id) = config.require_assistant()?;

    let store = ThreadStore::open_or_create(&config.thread_db_path)
        .wrap_err_with(|| format!("opening thread store {}", config.thread_db_path.display()))?;
    let registry = Arc::new(default_registry(&config));
    let service = Arc::new(OpenAiAssistant::new(api_key));

    if config.sync_assistant_tools {
        // 起動時に一度だけなので使い捨てランタイムで十分
        let rt = tokio::runtime::Runtime::new()?;
        if let Err(e) = rt.block_on(service.register_tools(assistant_id, &registry)) {
            warn!(target: "app", error = %e, "assistant_tool_sync_failed");
        }
    }

    let driver = RunDriver::new(service, registry).with_policy(config.driver_policy());
    let gateway = ChatGateway::new(driver, Arc::new(store), assistant_id).with_policy(GatewayPolicy {
        max_attempts: config.frontend_max_attempts,
        ..Default::default()
    });
    info!(target: "app", external_id = %config.cli_thread_id, "starting_terminal_frontend");

    let app = App::with_gateway(Arc::new(gateway), config.cli_thread_id.clone());
    let terminal = ratatui::init();
    let res = assistant_bridge::run(terminal, app, Duration::from_millis(config.ui_poll_interval_ms));
    ratatui::restore();
    res
}
