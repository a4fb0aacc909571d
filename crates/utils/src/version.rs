use std::sync::LazyLock;

use crate::build_info::BUILD_INFO;

/// Defines the application version.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}-{}{}",
        env!("ARENA_VERSION"),
        short_sha(BUILD_INFO.commit_sha1.unwrap_or("unknown")),
        if BUILD_INFO.git_dirty { "-dirty" } else { "" }
    )
});

/// Branch the binary was built from, if known.
pub fn branch() -> &'static str {
    BUILD_INFO.branch.unwrap_or("unknown")
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
