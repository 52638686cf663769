#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use assistant_bridge::assistant::mock::ScriptedAssistant;
use assistant_bridge::assistant::{DriverPolicy, RetryPolicy, RunDriver, ToolArguments};
use assistant_bridge::plugins::{Plugin, PluginRegistry, ToolParameters, ToolParametersBuilder, required_str};
use color_eyre::eyre::eyre;
use once_cell::sync::Lazy;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static START: Once = Once::new();
static GUARD: Lazy<std::sync::Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    Lazy::new(|| std::sync::Mutex::new(None));

/// Initialize test environment: dotenv and tracing (stderr + file).
/// Idempotent: safe to call multiple times.
pub fn init() {
    START.call_once(|| {
        let _ = dotenvy::dotenv();
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info,driver=debug,gateway=debug"))
            .expect("env filter");

        // Daily rotating log file separate from app runtime logs
        let file_appender = rolling::daily("logs", "tests.log");
        let (file_nb, guard) = tracing_appender::non_blocking(file_appender);
        *GUARD.lock().unwrap() = Some(guard);

        let stderr_layer = fmt::layer().with_target(true).with_thread_names(true).with_writer(std::io::stderr);
        let file_layer = fmt::layer().with_ansi(false).with_target(true).with_thread_names(true).with_writer(file_nb);

        let _ = tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).try_init();

        tracing::info!(target = "test_init", "Test tracing initialized (stderr + rotating file)");
    });
}

/// Stand-in for the image plugin: returns a fixed URL derived from the prompt.
pub struct FakeDalle;

impl Plugin for FakeDalle {
    fn name(&self) -> &'static str {
        "dalle"
    }
    fn description(&self) -> &'static str {
        "Generate an image."
    }
    fn parameters(&self) -> ToolParameters {
        ToolParametersBuilder::new_object().add_string("prompt", None).required("prompt").build()
    }
    fn run(&self, args: &ToolArguments) -> color_eyre::Result<String> {
        let prompt = required_str(args, "prompt")?;
        Ok(format!("https://images.example/{}.png", prompt.replace(' ', "-")))
    }
}

/// Always fails.
pub struct Broken;

impl Plugin for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }
    fn description(&self) -> &'static str {
        "Always fails."
    }
    fn parameters(&self) -> ToolParameters {
        ToolParametersBuilder::new_object().build()
    }
    fn run(&self, _args: &ToolArguments) -> color_eyre::Result<String> {
        Err(eyre!("upstream timed out"))
    }
}

pub fn test_registry() -> PluginRegistry {
    PluginRegistry::new().with(FakeDalle).with(Broken)
}

/// Default timings without jitter so waits are deterministic on paused time.
pub fn deterministic_policy() -> DriverPolicy {
    DriverPolicy {
        poll_interval: Duration::from_secs(1),
        poll_timeout: Some(Duration::from_secs(600)),
        retry: RetryPolicy::default().without_jitter(),
    }
}

pub fn driver(svc: &Arc<ScriptedAssistant>) -> RunDriver<ScriptedAssistant> {
    RunDriver::new(Arc::clone(svc), Arc::new(test_registry())).with_policy(deterministic_policy())
}
