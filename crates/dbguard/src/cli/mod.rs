pub mod handlers;

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("dbguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run SQL against a single-writer database file, one process at a time")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Database file (overrides config and DBGUARD_DATABASE)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Config file to use instead of .dbguard/config.toml"),
        )
        .arg(
            Arg::new("deadline-ms")
                .long("deadline-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64).range(1..))
                .global(true)
                .help("Give up if the lock is not granted within MS milliseconds"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("More logging on stderr (-v debug, -vv trace)"),
        )
        .subcommand(cmd_exec())
        .subcommand(cmd_query())
        .subcommand(cmd_write_rows())
        .subcommand(cmd_status())
}

fn cmd_exec() -> Command {
    Command::new("exec")
        .about("Run statements in one exclusive transaction")
        .arg(
            Arg::new("sql")
                .value_name("SQL")
                .required(true)
                .num_args(1..)
                .help("One statement per argument; all commit or none do"),
        )
}

fn cmd_query() -> Command {
    Command::new("query")
        .about("Run a query and print the rows")
        .arg(Arg::new("sql").value_name("SQL").required(true))
        .arg(
            Arg::new("shared")
                .long("shared")
                .action(ArgAction::SetTrue)
                .help("Read-only session under a shared lock"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print rows as a JSON array of objects"),
        )
}

fn cmd_write_rows() -> Command {
    Command::new("write-rows")
        .about("Append tagged rows to a table in one exclusive session")
        .arg(
            Arg::new("table")
                .long("table")
                .value_name("NAME")
                .required(true)
                .help("Table to append to; created if missing"),
        )
        .arg(
            Arg::new("worker")
                .long("worker")
                .value_name("ID")
                .required(true)
                .help("Tag stored with every row"),
        )
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_name("N")
                .required(true)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("hold-ms")
                .long("hold-ms")
                .value_name("MS")
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Keep the session open this long after writing"),
        )
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("Show the lock token and its last holder")
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the status as JSON"),
        )
}
