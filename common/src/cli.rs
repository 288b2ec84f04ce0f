use clap::{ArgAction, Args};

#[derive(Debug, Args)]
#[clap(next_help_heading = "Global Options")]
pub struct GlobalOpts {
    /// Raise the log level (repeat for more detail); RUST_LOG takes precedence
    #[arg(long, short, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Start paused, reading debugger commands (s, c, p, q) from stdin
    #[arg(long)]
    pub paused: bool,

    #[arg(long, short, action = ArgAction::Help)]
    help: (),

    #[arg(long, short('V'), action = ArgAction::Version)]
    version: (),
}

impl GlobalOpts {
    /// Default filter for env_logger when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    #[clap(name = "test", version, disable_help_flag = true, disable_version_flag = true)]
    struct Cli {
        #[command(flatten)]
        global: GlobalOpts,
    }

    #[test]
    fn verbosity_maps_to_filter() {
        let cli = Cli::try_parse_from(["test", "-vv", "--paused"]).unwrap();
        assert!(cli.global.paused);
        assert_eq!(cli.global.log_filter(), "debug");

        let cli = Cli::try_parse_from(["test"]).unwrap();
        assert_eq!(cli.global.log_filter(), "warn");
    }
}
