use council::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Console plus daily-rolling file logging, for commands that trade
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},council=debug,sqlx=warn", config.level))
    });

    // Prefer COUNCIL_LOG_DIR, fallback to LOG_DIR or /var/log/council.
    let log_dir = std::env::var("COUNCIL_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/council".to_string());

    // `tracing_appender::rolling::daily` panics if it can't create the initial
    // log file, so check writability first.
    let writable = std::fs::create_dir_all(&log_dir).is_ok() && {
        let test_path = std::path::Path::new(&log_dir).join(".council_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                true
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                false
            }
        }
    };

    let file_writer = writable.then(|| {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "council.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Held for the life of the process
        Box::leak(Box::new(guard));
        non_blocking
    });

    // Audit trail in the file is always JSON; the console follows config.
    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    let (console_plain, console_json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_plain)
        .with(console_json)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("Logging to: {}/council.log", log_dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for read-only commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
