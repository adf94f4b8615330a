//! Train command - one-shot dictionary training from a sample corpus.

use anyhow::{Context, Result};
use tracing::warn;

use baler_dict::{TrainConfig, train_corpus};

use super::load_config;

pub fn run(project_dir: &str, samples: &str, dict_size: usize) -> Result<()> {
    let config = load_config(project_dir)?;
    let train_config = TrainConfig {
        dict_size,
        ..TrainConfig::default()
    };

    let reports = train_corpus(samples, &config.dict_dir, &train_config)
        .context("dictionary training failed")?;

    println!();
    println!(
        "{:<24} {:>8} {:>10} {:>12} {:>10}",
        "topic", "dict_id", "dict_size", "samples", "mode"
    );
    for report in &reports {
        println!(
            "{:<24} {:>8} {:>10} {:>12} {:>10}",
            report.topic,
            report.dict_id.to_string(),
            report.dict_size,
            report.sample_records,
            if report.fallback { "PREFIX" } else { "trained" }
        );
    }
    println!();

    let fallbacks: Vec<&str> = reports
        .iter()
        .filter(|r| r.fallback)
        .map(|r| r.topic.as_str())
        .collect();
    if fallbacks.is_empty() {
        println!("Trained {} dictionaries into {}", reports.len(), config.dict_dir.display());
    } else {
        // The prefix fallback compresses substantially worse; make its use
        // impossible to miss.
        warn!(
            topics = fallbacks.join(",").as_str(),
            "raw-prefix fallback used; collect more samples and retrain"
        );
        println!(
            "WARNING: {} of {} topics fell back to raw-prefix dictionaries: {}",
            fallbacks.len(),
            reports.len(),
            fallbacks.join(", ")
        );
    }
    Ok(())
}
