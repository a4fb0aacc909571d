use std::path::PathBuf;

use chrono::Duration;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::access::AccessMode;
use crate::training::JobType;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every subcommand. Unset values fall back to the
/// configuration file, then to built-in defaults.
#[derive(Args, Clone, Debug, Default)]
pub struct GlobalArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        global = true,
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, env = "ARENA_KUBE_CONTEXT", global = true, help = "Kubeconfig context to use")]
    pub kube_context: Option<String>,

    #[arg(
        long,
        short = 'n',
        env = "ARENA_NAMESPACE",
        global = true,
        help = "Namespace of the training jobs [default: default]"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        env = "ARENA_ACCESS_MODE",
        value_enum,
        global = true,
        help = "Read cluster state directly or through a local mirror [default: direct]"
    )]
    pub access_mode: Option<AccessMode>,

    #[arg(
        long,
        global = true,
        help = "Seconds to wait for the mirror's initial synchronization [default: 60]"
    )]
    pub cache_sync_timeout_secs: Option<u64>,

    #[arg(
        long,
        global = true,
        action = clap::ArgAction::Set,
        help = "Use direct reads when the mirror cannot synchronize [default: true]"
    )]
    pub fallback_to_direct: Option<bool>,

    #[arg(
        long,
        env = "ARENA_ISOLATE_USER",
        global = true,
        action = clap::ArgAction::Set,
        help = "Only show jobs submitted by the current user [default: false]"
    )]
    pub isolate_user_in_namespace: Option<bool>,

    #[arg(long, env = "ARENA_USER_ID", global = true, help = "Id of the current user")]
    pub user_id: Option<String>,

    #[arg(long, global = true, help = "Treat the current user as an administrator")]
    pub admin: bool,

    #[arg(
        long,
        env = "ARENA_CONFIG",
        global = true,
        value_hint = clap::ValueHint::FilePath,
        help = "YAML configuration file"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_hint = clap::ValueHint::FilePath,
        help = "Write logs to a daily rolling file instead of stderr"
    )]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show one training job
    Get(GetArgs),
    /// List training jobs
    List(ListArgs),
    /// Delete a training job and its resources
    Delete(GetArgs),
    /// Delete finished training jobs older than a given age
    Prune(PruneArgs),
    /// List training jobs by requested GPUs
    Top(TopArgs),
    /// Show which job types are installed in the cluster
    Types,
}

#[derive(Args, Clone, Debug)]
pub struct GetArgs {
    /// Job name
    pub name: String,

    #[arg(long = "type", short = 'T', value_enum, help = "Job type, required when the name is ambiguous")]
    pub job_type: Option<JobType>,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[arg(long, short = 'A', help = "List jobs in all namespaces")]
    pub all_namespaces: bool,

    #[arg(long = "type", short = 'T', value_enum, help = "Only list jobs of this type")]
    pub job_type: Option<JobType>,
}

#[derive(Args, Clone, Debug)]
pub struct PruneArgs {
    #[arg(
        long,
        short = 's',
        value_parser = parse_duration,
        help = "Minimum job age, e.g. 90s, 30m, 12h, 7d"
    )]
    pub since: Duration,

    #[arg(long, short = 'A', help = "Prune jobs in all namespaces")]
    pub all_namespaces: bool,
}

#[derive(Args, Clone, Debug)]
pub struct TopArgs {
    #[arg(long, short = 'A', help = "Show jobs in all namespaces")]
    pub all_namespaces: bool,
}

/// Parses `<n>s`, `<n>m`, `<n>h` or `<n>d`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in `{input}`, expected one of s, m, h, d"))?;
    let (digits, unit) = input.split_at(split);
    let value: i64 = digits
        .parse()
        .map_err(|e| format!("invalid number in `{input}`: {e}"))?;
    let duration = match unit {
        "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        _ => return Err(format!("unknown unit `{unit}`, expected one of s, m, h, d")),
    };
    duration.ok_or_else(|| format!("duration `{input}` is out of range"))
}
