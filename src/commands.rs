pub mod check;
pub mod run;

pub use check::run_plugin_check;
pub use run::run_host;
