use std::ffi::OsString;

use clap::Parser;

pub const ENV_PREFIX: &str = "GOL_";

#[derive(Parser, Debug, Clone)]
#[command(name = "gol")]
#[command(about = "Run a command and store its output in SurrealDB", long_about = None)]
pub struct Args {
    /// SurrealDB host, e.g. localhost:8000
    #[arg(long, env = "GOL_SURREAL_HOST", default_value = "")]
    pub host: String,

    /// User to sign in as
    #[arg(long, env = "GOL_SURREAL_USER", default_value = "")]
    pub user: String,

    /// Password for the user
    #[arg(long, env = "GOL_SURREAL_PASS", default_value = "", hide_env_values = true)]
    pub pass: String,

    /// Namespace holding the log databases
    #[arg(long, env = "GOL_SURREAL_NS", default_value = "")]
    pub ns: String,

    /// RPC timeout in milliseconds
    #[arg(long, env = "GOL_RPC_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// `vars` minus every `GOL_*` variable; the child never sees our settings.
pub fn child_env<I>(vars: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter(|(key, _)| !key.to_string_lossy().starts_with(ENV_PREFIX))
        .collect()
}
