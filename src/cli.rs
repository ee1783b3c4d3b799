//! CLI domain: parse, route and output only.
//! No build orchestration; the route table dispatches to the builder and provider.

mod output;
mod parse;
mod route;

pub use output::{format_build_outcome, format_validation, map_error};
pub use parse::{Cli, Commands};
pub use route::{command_name, RunContext};
