use clap::Parser;
use digit_serve::app::server::shutdown_signal;
use digit_serve::utils::error::{ErrorSeverity, ServeError};
use digit_serve::utils::{logger, validation::Validate};
use digit_serve::{DigitServer, ServeArgs};

#[tokio::main]
async fn main() {
    let args = ServeArgs::parse();

    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            // 設定檔讀不到時 logger 尚未初始化
            logger::init_cli_logger(args.verbose);
            exit_with(e);
        }
    };

    logger::init_logger(config.log_format, config.verbose);

    tracing::info!("Starting digit-serve");
    if config.verbose {
        tracing::debug!("Server config: {:?}", config);
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        exit_with(e);
    }

    if config.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    if let Err(e) = DigitServer::new(config).run(shutdown_signal()).await {
        tracing::error!(
            "❌ Server failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        exit_with(e);
    }
}

fn exit_with(e: ServeError) -> ! {
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
