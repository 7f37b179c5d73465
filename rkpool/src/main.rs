use clap::Parser;
use rkpool::cli::Cli;
use rkpool::pidfile::PidFile;
use rkpool::{daemon, logging};

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    if cli.daemon {
        daemon::detach(cli.stdout.as_deref(), cli.stderr.as_deref())?;
    }
    logging::init(config.verbosity);

    let _pid_file = config
        .pid_file
        .as_deref()
        .map(PidFile::create)
        .transpose()?;
    daemon::run(config)
}
