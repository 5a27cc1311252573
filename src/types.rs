use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which execution backend a run uses.
///
/// - `Local`: run every task inline on the scheduling thread. Slow, but
///   output is interleaved in order and a debugger can step into tasks.
/// - `Threads`: run tasks on a bounded pool of blocking threads in this
///   process (default).
/// - `Pool`: run tasks in a fixed-size pool of worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Local,
    Threads,
    Pool,
}

impl Default for ExecutorKind {
    fn default() -> Self {
        ExecutorKind::Threads
    }
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ExecutorKind::Local),
            "threads" => Ok(ExecutorKind::Threads),
            "pool" => Ok(ExecutorKind::Pool),
            other => Err(format!(
                "invalid executor: {other} (expected \"local\", \"threads\" or \"pool\")"
            )),
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorKind::Local => "local",
            ExecutorKind::Threads => "threads",
            ExecutorKind::Pool => "pool",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_executor_kind_case_insensitively() {
        assert_eq!("Pool".parse::<ExecutorKind>(), Ok(ExecutorKind::Pool));
        assert_eq!(" local ".parse::<ExecutorKind>(), Ok(ExecutorKind::Local));
        assert!("cluster".parse::<ExecutorKind>().is_err());
    }
}
