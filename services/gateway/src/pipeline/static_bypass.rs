use super::{RequestContext, Stage, StageOutcome, Termination};
use async_trait::async_trait;

pub const DEFAULT_STATIC_PREFIXES: [&str; 3] = ["/static", "/swagger", "/files"];

/// Short-circuits requests for static assets before any identity or policy
/// work happens.
#[derive(Debug, Clone)]
pub struct StaticBypassStage {
    prefixes: Vec<String>,
}

impl StaticBypassStage {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|prefix| normalize_prefix(prefix.as_ref()))
            .filter(|prefix| prefix != "/")
            .collect();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Segment-aware: `/static` matches `/static` and `/static/a.js`, not
    /// `/staticfoo`.
    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

impl Default for StaticBypassStage {
    fn default() -> Self {
        Self::new(DEFAULT_STATIC_PREFIXES)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[async_trait]
impl Stage for StaticBypassStage {
    fn name(&self) -> &'static str {
        "static_bypass"
    }

    async fn run(&self, ctx: &mut RequestContext) -> StageOutcome {
        if self.matches(&ctx.path) {
            return StageOutcome::Terminate(Termination::Static);
        }
        StageOutcome::Continue
    }
}
