// src/bin/rating_recommend.rs

use clap::Parser;
use rating_svd::ingest::CsvIngestor;
use rating_svd::instrument::{init_stderr_logging, LOG_FILTER_VAR};
use rating_svd::FactorModel;
use serde::Serialize;
use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Predict ratings and recommend items from a saved U, S, V result file.
///
/// Output is one JSON object per line on stdout.
#[derive(Parser, Debug)]
#[command(name = "rating_recommend", version)]
struct Cli {
    /// Result file written by `rating_svd`
    results: PathBuf,

    /// User to recommend items for
    #[arg(long)]
    user: Option<i64>,

    /// Number of recommendations
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Ratings CSV; items the user already rated there are not recommended
    #[arg(long, requires = "user")]
    exclude_rated: Option<PathBuf>,

    /// Held-out ratings CSV to report RMSE and MAE against
    #[arg(long)]
    evaluate: Option<PathBuf>,

    /// Index of the first user and item in ids given and printed
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    index_base: i64,
}

#[derive(Serialize)]
struct ModelSummary<'a> {
    rank: usize,
    users: usize,
    items: usize,
    singular_values: &'a [f64],
}

#[derive(Serialize)]
struct Recommendation {
    user: i64,
    item: i64,
    score: f64,
}

fn to_index(id: i64, index_base: i64) -> Result<usize, Box<dyn Error>> {
    id.checked_sub(index_base)
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| format!("id {} is below the index base {}", id, index_base).into())
}

/// Item ids `user` rated in the CSV at `path`, as written there.
fn rated_items(path: &Path, user: i64) -> Result<Vec<i64>, Box<dyn Error>> {
    let mut items = Vec::new();
    CsvIngestor::open(path)?.for_each_triple(|t| {
        if t.user == user {
            items.push(t.item);
        }
    })?;
    Ok(items)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Err(e) = init_stderr_logging(LOG_FILTER_VAR) {
        eprintln!("Could not install logger: {}", e);
    }

    let model = FactorModel::load(&cli.results)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if cli.user.is_none() && cli.evaluate.is_none() {
        let singular_values = model.singular_values().to_vec();
        let summary = ModelSummary {
            rank: model.rank(),
            users: model.num_users(),
            items: model.num_items(),
            singular_values: &singular_values,
        };
        serde_json::to_writer(&mut out, &summary)?;
        writeln!(out)?;
    }

    if let Some(user_id) = cli.user {
        let user = to_index(user_id, cli.index_base)?;
        let exclude = match &cli.exclude_rated {
            Some(path) => rated_items(path, user_id)?
                .into_iter()
                .filter_map(|item| to_index(item, cli.index_base).ok())
                .collect(),
            None => Vec::new(),
        };
        let top = model
            .recommend(user, cli.top, &exclude)
            .ok_or_else(|| format!("user {} is outside the model's {} users", user_id, model.num_users()))?;
        for scored in top {
            let line = Recommendation {
                user: user_id,
                item: scored.item as i64 + cli.index_base,
                score: scored.score,
            };
            serde_json::to_writer(&mut out, &line)?;
            writeln!(out)?;
        }
    }

    if let Some(path) = &cli.evaluate {
        let evaluation = model.evaluate(path, cli.index_base)?;
        serde_json::to_writer(&mut out, &evaluation)?;
        writeln!(out)?;
    }

    out.flush()?;
    Ok(())
}
