mod common;
mod hexdump;
mod parsedump;
mod run;

trait ToolRun {
    fn run(&self) -> anyhow::Result<()>;
}

/// Talk to serial sensors, or pick apart captures of their output.
#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct ToolOptions {
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(clap::Subcommand, Debug)]
enum ToolCommand {
    /// Run a driver against a live device, printing every reading.
    Run(run::RunOpts),
    /// Split a captured byte stream into frames and decode them.
    ParseDump(parsedump::ParseDumpOpts),
}

impl ToolRun for ToolCommand {
    fn run(&self) -> anyhow::Result<()> {
        use ToolCommand::*;
        match self {
            Run(o) => o.run(),
            ParseDump(o) => o.run(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let opts = <ToolOptions as clap::Parser>::parse();
    opts.command.run()
}
