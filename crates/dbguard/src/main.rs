//! dbguard CLI
//!
//! Binary name: `dbguard`

use std::process;

use dbguard::cli::{
    build_cli,
    handlers::{dispatch, exit_code, format_error},
};

#[tokio::main]
async fn main() {
    // Usage errors exit 1 so that 2 keeps meaning a lock error
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            #[allow(clippy::exit)]
            process::exit(i32::from(err.use_stderr()));
        }
    };

    let level = match matches.get_count("verbose") {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = dispatch(&matches).await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {}", format_error(&err));
        }

        // Exit without waiting on lock waits abandoned after a deadline
        #[allow(clippy::exit)]
        process::exit(exit_code(&err));
    }
}
