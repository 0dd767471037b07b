//! The `languages` subcommand.

use std::collections::BTreeSet;

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::create_writer,
    config::ServiceConfig,
    prelude::*,
    recognize::{EngineChoice, engine_for_choice},
};

/// Languages command line arguments.
#[derive(Debug, Args)]
pub struct LanguagesOpts {
    /// The recognition engine to ask.
    #[clap(long, value_enum, default_value_t = EngineChoice::Tesseract)]
    pub engine: EngineChoice,

    /// Load pipeline settings from this TOML or JSON file. A config with
    /// `installed_languages` answers without asking the engine.
    #[clap(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,

    /// The output path to write the language list to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `languages` subcommand. Prints the installed language models, one
/// code per line. These are the values jobs may request.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_languages(opts: &LanguagesOpts) -> Result<()> {
    let config = match &opts.config_path {
        Some(path) => ServiceConfig::load(path).await?,
        None => ServiceConfig::default(),
    };
    let languages: BTreeSet<String> = match config.installed_languages {
        Some(codes) => codes.into_iter().collect(),
        None => {
            let engine = engine_for_choice(opts.engine);
            engine.installed_languages().await?
        }
    };

    let mut wtr = create_writer(opts.output_path.as_deref()).await?;
    for language in &languages {
        wtr.write_all(language.as_bytes())
            .await
            .context("failed to write language list")?;
        wtr.write_all(b"\n")
            .await
            .context("failed to write language list")?;
    }
    wtr.flush().await.context("failed to flush language list")?;
    Ok(())
}
