use std::path::PathBuf;

use clap::Parser;

/// OpenAI- and Anthropic-compatible gateway in front of JetBrains AI.
#[derive(Debug, Parser)]
#[command(name = "jetgate", version)]
pub(crate) struct Args {
    /// Port to listen on. Falls back to $PORT, then 7860.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Path of the models registry file.
    #[arg(long, default_value = "models.json")]
    pub models_path: PathBuf,

    /// Path of the statistics snapshot file (ignored when REDIS_URL is set).
    #[arg(long, default_value = "stats.json")]
    pub stats_path: PathBuf,

    /// Log filter, e.g. "info" or "llm=debug,config=debug".
    #[arg(long, env = "JETGATE_LOG", default_value = "info")]
    pub log: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["jetgate"]);

        assert_eq!(args.models_path, PathBuf::from("models.json"));
        assert_eq!(args.stats_path, PathBuf::from("stats.json"));
        assert_eq!(args.log, "info");
    }

    #[test]
    fn port_flag_overrides() {
        let args = Args::parse_from(["jetgate", "--port", "8080"]);
        assert_eq!(args.port, Some(8080));
    }
}
