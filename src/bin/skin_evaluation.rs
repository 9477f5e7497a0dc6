use anyhow::bail;
use clap::Parser;
use skin_prediction::{
    build_inference_service, config,
    evaluation::{evaluate, EvaluationDataset},
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the evaluation run
#[derive(Parser)]
#[command(name = "skin_evaluation")]
#[command(about = "Evaluate the skin condition classifier on a labelled test set")]
struct Args {
    /// Test set root with one sub-directory per class
    #[arg(short, long)]
    dataset: PathBuf,

    /// Print the summary as JSON instead of a text report
    #[arg(long)]
    json: bool,

    /// Evaluate at most this many images per class
    #[arg(long)]
    limit_per_class: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::get_configuration()?;
    let log_level = &format!("{},ort=warn", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let inference_service = build_inference_service(&config)?;
    if !inference_service.is_model_loaded() {
        bail!("model could not be loaded, see the log for details");
    }

    let dataset =
        EvaluationDataset::from_dir(&args.dataset, inference_service.labels(), args.limit_per_class)?;
    tracing::info!("Evaluating {} images from {:?}", dataset.len(), args.dataset);

    let summary = evaluate(&inference_service, &dataset)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Evaluated: {} images ({} skipped)", summary.evaluated, summary.skipped);
    println!("Test accuracy: {:.2} %", summary.accuracy * 100.0);
    println!("Test loss: {:.4}", summary.loss);
    println!("\nConfusion matrix:\n");
    print!("{}", summary.confusion_matrix);
    println!("\nClassification report:\n");
    print!("{}", summary.report);

    Ok(())
}
