//! Per-turn environment context.
//!
//! The `<env>` block (working directory, git state, platform, date) changes
//! from turn to turn, so it is kept out of the cacheable system prompt and
//! injected as its own uncached message instead.

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

const ENV_OPEN: &str = "<env>";
const ENV_CLOSE: &str = "</env>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicContext {
    pub working_dir: PathBuf,
    pub is_git_repo: bool,
    /// Output of `git status --short`, possibly empty.
    pub git_status: String,
    pub platform: String,
    /// Preformatted date, e.g. `10/18/2026`.
    pub date: String,
}

impl DynamicContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            is_git_repo: false,
            git_status: String::new(),
            platform: std::env::consts::OS.to_string(),
            date: Local::now().format("%-m/%-d/%Y").to_string(),
        }
    }

    /// Probe git state of `working_dir`. Git failures leave the context
    /// marked as a non-repository.
    pub async fn detect(working_dir: impl Into<PathBuf>) -> Self {
        let mut ctx = Self::new(working_dir);
        ctx.is_git_repo = git(&ctx.working_dir, &["rev-parse", "--is-inside-work-tree"])
            .await
            .is_some_and(|out| out.trim() == "true");
        if ctx.is_git_repo {
            ctx.git_status = git(&ctx.working_dir, &["status", "--short"])
                .await
                .unwrap_or_default();
        }
        ctx
    }

    /// Render the `<env>` block.
    pub fn render(&self) -> String {
        let mut out = String::from(ENV_OPEN);
        out.push('\n');
        out.push_str(&format!("Working directory: {}\n", self.working_dir.display()));
        if self.is_git_repo {
            out.push_str("Is directory a git repo: Yes\n");
            for line in self.git_status.trim().lines().filter(|l| !l.is_empty()) {
                out.push_str(line);
                out.push('\n');
            }
        } else {
            out.push_str("Is directory a git repo: No\n");
        }
        out.push_str(&format!("Platform: {}\n", self.platform));
        out.push_str(&format!("Today's date: {}\n", self.date));
        out.push_str(ENV_CLOSE);
        out
    }
}

async fn git(dir: &Path, args: &[&str]) -> Option<String> {
    match Command::new("git").args(args).current_dir(dir).output().await {
        Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(_) => None,
        Err(e) => {
            debug!("git {args:?} failed: {e}");
            None
        }
    }
}

/// A system prompt split into its static and per-turn parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheablePrompt {
    pub static_prompt: String,
    pub dynamic_context: String,
}

/// Remove a literal `<env>…</env>` block from `full_prompt` and pair the
/// remainder with a freshly rendered dynamic context.
pub fn split_cacheable_prompt(full_prompt: &str, dynamic: &DynamicContext) -> CacheablePrompt {
    let static_prompt = match full_prompt.split_once(ENV_OPEN) {
        Some((before, rest)) => match rest.split_once(ENV_CLOSE) {
            Some((_, after)) => format!("{before}{after}").trim().to_string(),
            None => full_prompt.to_string(),
        },
        None => full_prompt.to_string(),
    };
    CacheablePrompt {
        static_prompt,
        dynamic_context: dynamic.render(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> DynamicContext {
        DynamicContext {
            working_dir: PathBuf::from("/work/app"),
            is_git_repo: true,
            git_status: " M src/lib.rs\n?? notes.txt\n".into(),
            platform: "linux".into(),
            date: "10/18/2026".into(),
        }
    }

    #[test]
    fn render_includes_git_status_lines() {
        let rendered = fixed().render();
        assert_eq!(
            rendered,
            "<env>\nWorking directory: /work/app\nIs directory a git repo: Yes\nM src/lib.rs\n?? notes.txt\nPlatform: linux\nToday's date: 10/18/2026\n</env>"
        );
    }

    #[test]
    fn render_without_git() {
        let mut ctx = fixed();
        ctx.is_git_repo = false;
        let rendered = ctx.render();
        assert!(rendered.contains("Is directory a git repo: No\n"));
        assert!(!rendered.contains("notes.txt"));
    }

    #[test]
    fn split_removes_env_block() {
        let full = "You are helpful.\n<env>\nold\n</env>\nBe brief.";
        let split = split_cacheable_prompt(full, &fixed());
        assert_eq!(split.static_prompt, "You are helpful.\n\nBe brief.");
        assert!(split.dynamic_context.starts_with("<env>\n"));
    }

    #[test]
    fn split_without_env_keeps_prompt() {
        let split = split_cacheable_prompt("plain", &fixed());
        assert_eq!(split.static_prompt, "plain");
    }
}
