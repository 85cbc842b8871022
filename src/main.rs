/// logsift - log triage from the command line
///
/// This program is free software: you can redistribute it and/or modify
/// it under the terms of the GNU General Public License as published by
/// the Free Software Foundation, either version 3 of the License, or
/// (at your option) any later version.
///
/// This program is distributed in the hope that it will be useful,
/// but WITHOUT ANY WARRANTY; without even the implied warranty of
/// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
/// GNU General Public License for more details.
///
/// You should have received a copy of the GNU General Public License
/// along with this program.  If not, see <https://www.gnu.org/licenses/>.
use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use logsift::store::memory::{
    MemoryAnomalyStore, MemoryCache, MemoryEntryStore, MemoryPatternStore,
};
use logsift::{
    AnalyzerConfig, AnomalyDetector, ErrorPattern, Ingestor, PatternClassifier, PatternStore,
};

#[derive(Parser, Debug)]
#[command(name = "logsift")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
#[command(about = "Cluster recurring log errors into patterns and flag anomalies", long_about = None)]
struct Args {
    /// Log file to analyze; defaults to the configured log_paths
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long, value_name = "PATH", default_value = "logsift.json")]
    config: PathBuf,

    /// Run anomaly detection after ingestion
    #[arg(long)]
    detect_anomalies: bool,

    /// Show at most this many patterns in the report
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = AnalyzerConfig::load(&args.config)?;

    let entries = Arc::new(MemoryEntryStore::new());
    let patterns = Arc::new(MemoryPatternStore::new());
    let anomalies = Arc::new(MemoryAnomalyStore::new());

    let classifier = PatternClassifier::new(
        patterns.clone(),
        entries.clone(),
        Arc::new(MemoryCache::<Vec<ErrorPattern>>::new()),
        config.pattern.clone(),
    );
    let ingestor = Ingestor::new(entries.clone(), classifier);
    let now = Utc::now();

    let report = match &args.file {
        Some(file) => ingestor
            .ingest_file(file, now)
            .with_context(|| format!("analyzing {}", file.display()))?,
        None => {
            if config.log_paths.is_empty() {
                bail!("no file given and no log_paths configured");
            }
            ingestor.ingest_paths(&config.log_paths, now)?
        }
    };

    info!(?report, "ingestion finished");
    println!(
        "Parsed {} entries from {} file(s); {} stored, {} new pattern(s), {} matched.",
        report.parsed, report.files, report.inserted, report.patterns_created, report.patterns_matched
    );

    // Rebuild a classifier over the same stores for the reporting queries.
    let classifier = PatternClassifier::new(
        patterns.clone(),
        entries.clone(),
        Arc::new(MemoryCache::<Vec<ErrorPattern>>::new()),
        config.pattern.clone(),
    );

    let mut all = patterns.list()?;
    all.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));

    if !all.is_empty() {
        println!("\nTop patterns:");
        for pattern in all.iter().take(args.limit) {
            let trend = classifier.pattern_trend(pattern, now)?;
            let mut line = format!(
                "  [{:>8}] x{:<5} {} ({})",
                pattern.severity.as_str(),
                pattern.occurrence_count,
                truncate(&pattern.pattern_signature, 80),
                trend.as_str()
            );
            if let Some(hint) = pattern.solution() {
                line.push_str(&format!("\n             hint: {hint}"));
            }
            println!("{line}");
        }
    }

    let groups = classifier.group_similar()?;
    if !groups.is_empty() {
        println!("\nSimilar pattern groups:");
        for group in &groups {
            println!(
                "  {} patterns, {} occurrences, avg similarity {:.2}",
                group.patterns.len(),
                group.total_occurrences,
                group.average_similarity
            );
            for pattern in &group.patterns {
                println!("    - {}", truncate(&pattern.pattern_signature, 76));
            }
        }
    }

    if args.detect_anomalies {
        let detector = AnomalyDetector::new(
            entries,
            patterns,
            anomalies,
            Arc::new(MemoryCache::<f64>::new()),
            config.anomaly.clone(),
        );

        let found = detector.run(now)?;
        if found.is_empty() {
            println!("\nNo anomalies detected.");
        } else {
            println!("\nAnomalies:");
            for anomaly in &found {
                println!("  [{:>8}] {}", anomaly.severity().as_str(), anomaly.describe());
            }
        }

        let stats = detector.statistics()?;
        println!(
            "\n{} anomaly record(s): {} active, {} resolved, {} ignored.",
            stats.total, stats.active, stats.resolved, stats.ignored
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let flattened = s.replace('\n', " ");
    if flattened.chars().count() > max {
        let head: String = flattened.chars().take(max).collect();
        format!("{head}...")
    } else {
        flattened
    }
}
