use clap::Parser;
use digit_serve::utils::error::ErrorSeverity;
use digit_serve::utils::{logger, validation::Validate};
use digit_serve::{BatchClientArgs, BatchRunner, PredictClient};

#[tokio::main]
async fn main() {
    let args = BatchClientArgs::parse();
    logger::init_cli_logger(args.verbose);

    if let Err(e) = args.validate() {
        tracing::error!("❌ Invalid arguments: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let result = async {
        let client = PredictClient::new(&args.url, args.timeout_secs)?;
        let report = BatchRunner::new(client, args.concurrency, args.iterations)
            .run(&args.image_dir)
            .await?;
        report.write_csv(&args.output)?;
        Ok::<_, digit_serve::ServeError>(report)
    }
    .await;

    match result {
        Ok(report) => {
            println!(
                "✅ {} requests ({} failed) in {:.2}s",
                report.rows.len(),
                report.failed(),
                report.elapsed.as_secs_f64()
            );
            println!("📁 Results saved to: {}", args.output);
        }
        Err(e) => {
            tracing::error!("❌ Batch run failed: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            let exit_code = match e.severity() {
                ErrorSeverity::Critical => 3,
                ErrorSeverity::Medium => 2,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}
