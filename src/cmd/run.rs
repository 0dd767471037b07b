//! The `run` subcommand.

use std::sync::Arc;

use clap::Args;
use futures::{FutureExt as _, StreamExt as _};

use crate::{
    async_utils::{BoxedFuture, BoxedStream},
    batch::{BatchInput, BatchOutput, process_document},
    cmd::StreamOpts,
    config::ServiceConfig,
    job::OcrPipeline,
    language::LanguageRequest,
    prelude::*,
    rasterize::PopplerRasterizer,
    recognize::{EngineChoice, engine_for_choice},
    ui::{ProgressConfig, Ui},
    verify::VerifyLevel,
};

/// Run command line arguments.
#[derive(Debug, Args)]
pub struct RunOpts {
    /// A JSONL or CSV manifest with `id` and `path` fields. Reads standard
    /// input when omitted.
    #[clap(short = 'i', long = "in")]
    pub input_path: Option<PathBuf>,

    /// Where to write results, as JSONL, or as flat CSV rows when the
    /// name ends in `.csv`. Writes standard output when omitted.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Load pipeline settings from this TOML or JSON file.
    #[clap(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,

    /// The recognition engine to use.
    #[clap(long, value_enum, default_value_t = EngineChoice::Tesseract)]
    pub engine: EngineChoice,

    /// Languages to recognize, as a comma-separated list of codes, or
    /// `auto`. Records may override this per document.
    #[clap(short = 'l', long)]
    pub languages: Option<String>,

    /// Cross-check each page with extra recognition passes.
    #[clap(long, value_enum)]
    pub verify: Option<VerifyLevel>,

    /// Max number of pages to recognize at a time, across all documents.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Raster resolution for PDF pages, in DPI.
    #[clap(long)]
    pub dpi: Option<u32>,

    /// Budget for one page, in seconds. Waiting for a worker slot counts.
    #[clap(long, value_name = "SECS")]
    pub per_page_timeout: Option<u64>,

    /// Budget for a whole document, in seconds. Rasterization counts.
    #[clap(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Reject documents larger than this many bytes.
    #[clap(long)]
    pub max_document_bytes: Option<usize>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,
}

/// The `run` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(ui: Ui, opts: &RunOpts) -> Result<()> {
    // Load our config and apply any command-line overrides.
    let mut config = match &opts.config_path {
        Some(path) => ServiceConfig::load(path).await?,
        None => ServiceConfig::default(),
    };
    if let Some(verify) = opts.verify {
        config.verify = verify;
    }
    if let Some(workers) = opts.workers {
        config.worker_count = workers;
    }
    if let Some(dpi) = opts.dpi {
        config.dpi = dpi;
    }
    if let Some(secs) = opts.per_page_timeout {
        config.per_page_timeout_secs = secs;
    }
    if let Some(secs) = opts.deadline {
        config.job_deadline_secs = secs;
    }
    if let Some(max_bytes) = opts.max_document_bytes {
        config.max_document_bytes = max_bytes;
    }

    // Build the pipeline all the documents will share. This also checks
    // which language models are actually installed.
    let engine = engine_for_choice(opts.engine);
    let pipeline = Arc::new(
        OcrPipeline::new(engine, Arc::new(PopplerRasterizer), config).await?,
    );
    let default_languages = opts
        .languages
        .as_deref()
        .map(LanguageRequest::parse)
        .unwrap_or_default();

    // Open up our input stream and parse into records.
    let input = BatchInput::read_stream(ui.clone(), opts.input_path.as_deref()).await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_from_size_hint(
        &ProgressConfig {
            emoji: "📄",
            msg: "Recognizing documents",
            done_msg: "Recognized documents",
        },
        input.size_hint(),
    );

    // Run each record through the pipeline. The per-page worker pool is
    // shared, so this concurrency only controls how many documents are
    // open at once.
    let job_ui = ui.clone();
    let futures: BoxedStream<BoxedFuture<Result<BatchOutput>>> = input
        .map(move |record| {
            let pipeline = pipeline.clone();
            let ui = job_ui.clone();
            let default_languages = default_languages.clone();
            async move {
                let record = record?;
                Ok(process_document(&pipeline, &ui, record, &default_languages).await)
            }
            .boxed()
        })
        .boxed();
    let output = pb
        .wrap_stream(futures.buffered(opts.stream_opts.job_count))
        .boxed();

    // Write out our output.
    BatchOutput::write_stream(&ui, opts.output_path.as_deref(), output, &opts.stream_opts)
        .await
}
