//! Command line interface definition.

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::debug;

/// Builds the Clap command structure for the launcher.
pub fn build_cli() -> Command {
    Command::new("delga-launcher")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("engine_executable")
                .short('e')
                .long("engine-executable")
                .value_name("PATH")
                .help("Executable started for out-of-process engine instances")
                .global(true),
        )
        .arg(
            Arg::new("console")
                .short('c')
                .long("console")
                .help("Ask engine instances to log to the console instead of log files")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("games").about("List installed games"))
        .subcommand(Command::new("modules").about("List discovered engine modules"))
        .subcommand(Command::new("patches").about("List discovered game patches"))
        .subcommand(Command::new("profiles").about("List configured profiles"))
        .subcommand(
            Command::new("run").about("Run a game").arg(
                Arg::new("game")
                    .value_name("ID-OR-ALIAS")
                    .help("Game identifier (UUID) or alias identifier")
                    .required(true),
            ),
        )
}

/// Parses the command-line arguments. Clap handles help output and argument
/// errors itself.
pub fn parse_args() -> ArgMatches {
    debug!("Parsing command-line arguments...");
    build_cli().get_matches()
}
