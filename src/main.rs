mod backup;
mod cli;
mod clock;
mod config;
mod error;
mod logging;
mod migrator;
mod schema;

use cli::Cli;
use log::error;

fn main() {
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
