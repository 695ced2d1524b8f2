use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use catalogify::cli::{Cli, Command};

const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    run_until_interrupted(try_main(), tokio::signal::ctrl_c()).await
}

/// Runs `job` unless `interrupt` fires first. An interrupt source that fails
/// to register is ignored and the job runs to completion.
async fn run_until_interrupted<J, I>(job: J, interrupt: I) -> ExitCode
where
    J: Future<Output = anyhow::Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = job => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
        Ok(()) = interrupt => {
            tracing::warn!("interrupted; nothing was written by the unfinished job");
            ExitCode::from(INTERRUPTED)
        }
    }
}

async fn try_main() -> anyhow::Result<()> {
    catalogify::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Convert(args) => {
            tokio::task::block_in_place(|| catalogify::convert::run(args)).context("convert")?;
        }
        Command::Ratings(args) => {
            catalogify::ratings::run(args).await.context("ratings")?;
        }
        Command::Ranking(args) => {
            catalogify::ranking::run(args).await.context("ranking")?;
        }
        Command::Rerank(args) => {
            catalogify::ranking::rerank(args).await.context("rerank")?;
        }
        Command::Book(args) => {
            catalogify::book::run(args).await.context("book")?;
        }
        Command::Covers(args) => {
            catalogify::covers::run(args).context("covers")?;
        }
        Command::Stacks(args) => {
            tokio::task::block_in_place(|| catalogify::stacks::run(args)).context("stacks")?;
        }
    }

    Ok(())
}
