use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use sensorlink::{Args, OutputFormat, RadioBackend, RunContext, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
        let context = RunContext::builder()
            .store(Box::new(args.record_store()))
            .config(args.link_config())
            .filter(args.discovery_filter())
            .output_format(output_format)
            .maybe_log_level(args.log_level());
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let context = context
            .backend(RadioBackend::from_fake_args(maybe_fake_args))
            .build();

        run(command, &mut stdout, context).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
