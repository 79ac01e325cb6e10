use clap::Parser;

use trellis::cli::{self, Cli};
use trellis::telemetry;

fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    if let Err(err) = cli::run(cli) {
        tracing::error!(error = %err, "node terminated");
        std::process::exit(1);
    }
}
