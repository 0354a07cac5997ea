//! Prompt builder for model requests.
//!
//! Prompts are rendered from embedded minijinja templates. Each template marks
//! its sections with `<!-- section:KEY shown|bulky -->` comments; bulky
//! sections (project context, file content) are elided from log previews.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;

use crate::core::task::Task;
use crate::core::types::{AttemptHistory, CompletionEntry};

const RULES_TEMPLATE: &str = include_str!("prompts/rules.md");
const INITIAL_TEMPLATE: &str = include_str!("prompts/initial.md");
const VERIFY_TEMPLATE: &str = include_str!("prompts/verify.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(shown|bulky)\s*-->").expect("section regex")
});

/// A file whose full content is shown to the model in a repair prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FocusFile {
    pub path: String,
    pub content: String,
}

/// What the failed step looked like, for the repair prompt.
#[derive(Debug, Clone, Copy)]
pub struct FailedStep<'a> {
    pub commands: &'a str,
    pub error: &'a str,
    pub focus: Option<&'a FocusFile>,
}

/// Renders the three prompt kinds: initial, verify, repair.
pub struct PromptBuilder {
    env: Environment<'static>,
    marker: String,
    allowed: Vec<String>,
}

impl PromptBuilder {
    pub fn new(completion_marker: &str, allowed_commands: &[String]) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("rules", RULES_TEMPLATE)
            .context("load rules template")?;
        env.add_template("initial", INITIAL_TEMPLATE)
            .context("load initial template")?;
        env.add_template("verify", VERIFY_TEMPLATE)
            .context("load verify template")?;
        env.add_template("repair", REPAIR_TEMPLATE)
            .context("load repair template")?;
        Ok(Self {
            env,
            marker: completion_marker.to_string(),
            allowed: allowed_commands.to_vec(),
        })
    }

    /// First prompt of a run: the full task, including any pasted error log.
    pub fn initial(
        &self,
        task: &Task,
        project_context: &str,
        recent: &[CompletionEntry],
    ) -> Result<PromptPack> {
        let rendered = self
            .env
            .get_template("initial")?
            .render(context! {
                marker => &self.marker,
                allowed => &self.allowed,
                recent => recent,
                context => project_context.trim(),
                task => task.full().trim(),
            })
            .context("render initial prompt")?;
        Ok(PromptPack::from_rendered(&rendered))
    }

    /// After a successful step: clean goal, refreshed context, full history.
    pub fn verify(
        &self,
        goal: &str,
        project_context: &str,
        history: &AttemptHistory,
    ) -> Result<PromptPack> {
        let rendered = self
            .env
            .get_template("verify")?
            .render(context! {
                marker => &self.marker,
                allowed => &self.allowed,
                goal => goal.trim(),
                context => project_context.trim(),
                history => history.records(),
            })
            .context("render verify prompt")?;
        Ok(PromptPack::from_rendered(&rendered))
    }

    /// After a failed step. Shows the focus file if one was identified,
    /// otherwise the whole project context.
    pub fn repair(
        &self,
        goal: &str,
        failed: FailedStep<'_>,
        project_context: &str,
        history: &AttemptHistory,
    ) -> Result<PromptPack> {
        let rendered = self
            .env
            .get_template("repair")?
            .render(context! {
                marker => &self.marker,
                allowed => &self.allowed,
                goal => goal.trim(),
                commands => failed.commands.trim(),
                error => failed.error.trim(),
                focus => failed.focus,
                context => project_context.trim(),
                history => history.records(),
            })
            .context("render repair prompt")?;
        Ok(PromptPack::from_rendered(&rendered))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    key: String,
    bulky: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());
    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim();
        if content.is_empty() {
            continue;
        }
        sections.push(Section {
            key: key.as_str().to_string(),
            bulky: kind.as_str() == "bulky",
            content: content.to_string(),
        });
    }
    sections
}

/// A rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPack {
    sections: Vec<Section>,
}

impl PromptPack {
    fn from_rendered(rendered: &str) -> Self {
        Self {
            sections: parse_sections(rendered),
        }
    }

    /// The full prompt sent to the model.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The prompt with bulky sections replaced by a size note.
    pub fn preview(&self) -> String {
        self.sections
            .iter()
            .map(|s| {
                if s.bulky {
                    format!("[{} hidden: {} bytes]", s.key, s.content.len())
                } else {
                    s.content.clone()
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[cfg(test)]
    fn section_keys(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.key.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AttemptRecord;

    fn builder() -> PromptBuilder {
        PromptBuilder::new("DONE", &["sed".to_string(), "touch".to_string()]).expect("builder")
    }

    fn history() -> AttemptHistory {
        let mut history = AttemptHistory::new();
        history.push(AttemptRecord::success("create index.ts"));
        history.push(AttemptRecord::failure(
            "rename helper",
            "sed: can't read src/helper.ts",
        ));
        history
    }

    #[test]
    fn initial_prompt_carries_full_task_and_context() {
        let task = Task::new("Fix the build\nnpm ERR! missing script: build");
        let pack = builder()
            .initial(&task, "tree:\n  package.json", &[])
            .expect("render");
        let content = pack.render();

        assert_eq!(pack.section_keys(), vec!["rules", "context", "task"]);
        assert!(content.contains("npm ERR! missing script: build"));
        assert!(content.contains("tree:\n  package.json"));
        assert!(content.contains("start the reply with `DONE`"));
        assert!(content.contains("sed, touch"));
    }

    #[test]
    fn initial_prompt_lists_recent_work_in_fix_mode() {
        let task = Task::new("the page is blank");
        let recent = vec![CompletionEntry {
            goal: "add routing".to_string(),
            summary: "added react-router".to_string(),
        }];
        let pack = builder().initial(&task, "ctx", &recent).expect("render");

        assert_eq!(
            pack.section_keys(),
            vec!["rules", "recent", "context", "task"]
        );
        assert!(pack.render().contains("- add routing: added react-router"));
    }

    #[test]
    fn verify_prompt_uses_goal_and_numbered_history() {
        let pack = builder()
            .verify("Fix the build", "fresh context", &history())
            .expect("render");
        let content = pack.render();

        assert!(content.contains("<goal>\nFix the build\n</goal>"));
        assert!(content.contains("1. [success] create index.ts"));
        assert!(content.contains("2. [failure] rename helper: sed: can't read src/helper.ts"));
        assert!(content.contains("fresh context"));
    }

    #[test]
    fn repair_prompt_prefers_focus_file_over_context() {
        let focus = FocusFile {
            path: "src/app.ts".to_string(),
            content: "export const app = 1;".to_string(),
        };
        let pack = builder()
            .repair(
                "Fix the build",
                FailedStep {
                    commands: "sed -i 's/a/b/' src/app.ts",
                    error: "pattern not found",
                    focus: Some(&focus),
                },
                "WHOLE PROJECT",
                &history(),
            )
            .expect("render");
        let content = pack.render();

        assert!(pack.section_keys().contains(&"file"));
        assert!(content.contains("### File: src/app.ts"));
        assert!(content.contains("export const app = 1;"));
        assert!(!content.contains("WHOLE PROJECT"));
        assert!(content.contains("pattern not found"));
    }

    #[test]
    fn repair_prompt_falls_back_to_context() {
        let pack = builder()
            .repair(
                "goal",
                FailedStep {
                    commands: "npm run build",
                    error: "exit code 1",
                    focus: None,
                },
                "WHOLE PROJECT",
                &AttemptHistory::new(),
            )
            .expect("render");
        assert!(pack.section_keys().contains(&"context"));
        assert!(pack.render().contains("WHOLE PROJECT"));
    }

    #[test]
    fn preview_hides_bulky_sections() {
        let task = Task::new("goal");
        let pack = builder()
            .initial(&task, "SECRET PROJECT DUMP", &[])
            .expect("render");
        let preview = pack.preview();

        assert!(!preview.contains("SECRET PROJECT DUMP"));
        assert!(preview.contains("[context hidden:"));
        assert!(preview.contains("<task>\ngoal\n</task>"));
    }
}
