use std::process::ExitCode;

use clap::Parser;
use console::style;

use gitredact::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.run().await {
        Ok(status) => status.into(),
        Err(err) => match err.downcast_ref::<gitredact::Error>() {
            Some(error) if error.is_informational() => {
                println!("{} {error}", style("ℹ").blue());
                ExitCode::SUCCESS
            }
            Some(error) => {
                eprintln!("{} {err:#}", style("✖").red());
                ExitCode::from(error.exit_code())
            }
            None => {
                eprintln!("{} {err:#}", style("✖").red());
                ExitCode::from(4)
            }
        },
    }
}
