use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use storybook::core::config::Config;
use storybook::core::error::StoryError;
use storybook::core::io::NativeStorage;
use storybook::services::graph::render_stage_graph;
use storybook::services::workflow::{
    PipelineOutcome, RunOptions, Source, StoryServices, StoryWorkflow,
};

/// Turns a story source into an illustrated PDF and a narrated video.
#[derive(Parser, Debug)]
#[command(name = "storybook")]
#[command(group(ArgGroup::new("source").args(["file", "url"])))]
struct Cli {
    /// Source document (only PDF is recognised)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Web page holding the story
    #[arg(short, long)]
    url: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Keep only the first two pages of the generated story
    #[arg(short, long)]
    test: bool,

    /// Stop after the PDF is written
    #[arg(short, long)]
    pdf: bool,

    /// Write the stage graph and exit
    #[arg(short, long)]
    draw: bool,

    /// Where --draw writes the Graphviz file
    #[arg(long, default_value = "storybook_workflow.dot")]
    draw_output: PathBuf,

    /// YAML configuration; defaults are used when the file is missing
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,
}

impl Cli {
    fn source(&self) -> Source {
        match (&self.url, &self.file) {
            (Some(url), _) => Source::Url(url.clone()),
            (None, Some(file)) => Source::File(file.clone()),
            (None, None) => Source::Unspecified,
        }
    }
}

fn print_result(result: &str) {
    let rule = "#".repeat(60);
    println!("{}", rule);
    println!("{}", result);
    println!("{}", rule);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage problems are reported, not treated as failures.
            e.print()?;
            return Ok(());
        }
    };

    dotenvy::dotenv().ok();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if cli.draw {
        std::fs::write(&cli.draw_output, render_stage_graph())
            .with_context(|| format!("Failed to write {:?}", cli.draw_output))?;
        println!("Stage graph written to {:?}", cli.draw_output);
        return Ok(());
    }

    let config = match Config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please check {:?}.", cli.config);
            return Err(e);
        }
    };

    let options = RunOptions {
        test_mode: cli.test,
        pdf_only: cli.pdf,
    };
    let services = StoryServices::from_config(&config)?;
    let budget = Duration::from_secs(config.timeout_seconds);

    let mut workflow = StoryWorkflow::new(config, options, services, Arc::new(NativeStorage::new()));
    info!("Data root: {:?}", workflow.store().root());
    let source = cli.source();

    match tokio::time::timeout(budget, workflow.run(&source)).await {
        Ok(Ok(outcome)) => {
            print_result(&outcome.to_string());
            if let PipelineOutcome::Completed(path) = outcome {
                info!("Done: {:?}", path);
            }
            Ok(())
        }
        Ok(Err(e)) => {
            if let Some(input) = e
                .downcast_ref::<StoryError>()
                .filter(|err| err.is_input_error())
            {
                print_result(&PipelineOutcome::Rejected(input.to_string()).to_string());
                return Ok(());
            }
            error!("Pipeline failed after {:?}", workflow.trace());
            print_result(&format!("{:#}", e));
            Err(e)
        }
        Err(_) => {
            let message = format!("Pipeline timed out after {}s", budget.as_secs());
            print_result(&message);
            Err(anyhow::anyhow!(message))
        }
    }
}
