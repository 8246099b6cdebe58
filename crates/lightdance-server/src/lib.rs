// Lightdance server: node server, operator console and UDP dispatch front end
// The binary in main.rs only parses arguments and hands over to `startup`

pub mod console; // Operator and dispatch consoles
pub mod model; // Command line and configuration
pub mod startup; // Logging, signals and subcommand entry points

pub use model::Configuration;
