//! Splitting user input into a clean goal and a pasted error log.

/// Markers that typically start a pasted error log.
pub const ERROR_MARKERS: &[&str] = &[
    "Pre-transform error:",
    "Internal server error:",
    "Plugin: vite:",
    "npm ERR!",
    "Traceback",
    "error[E",
    "panicked at",
];

/// User-supplied task, immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    full: String,
    goal: String,
}

impl Task {
    /// Build a task from raw input. The goal is everything before the first
    /// error marker; without a marker the goal is the whole input.
    pub fn new(input: &str) -> Self {
        let full = input.trim().to_string();
        let cut = ERROR_MARKERS
            .iter()
            .filter_map(|marker| full.find(marker))
            .min()
            .unwrap_or(full.len());
        let mut goal = full[..cut].trim().to_string();
        if goal.is_empty() {
            goal = full.clone();
        }
        Self { full, goal }
    }

    /// The full input, including any pasted error log.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The goal without the pasted error log.
    pub fn goal(&self) -> &str {
        &self.goal
    }

    #[cfg(test)]
    fn has_error_log(&self) -> bool {
        self.goal.len() < self.full.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_stops_at_first_error_marker() {
        let task = Task::new("Fix the build\n\nnpm ERR! missing script\nTraceback (most recent)");
        assert_eq!(task.goal(), "Fix the build");
        assert!(task.full().contains("npm ERR!"));
        assert!(task.has_error_log());
    }

    #[test]
    fn plain_task_goal_is_whole_input() {
        let task = Task::new("  Add a dark mode toggle  ");
        assert_eq!(task.goal(), "Add a dark mode toggle");
        assert_eq!(task.full(), "Add a dark mode toggle");
        assert!(!task.has_error_log());
    }

    #[test]
    fn log_only_input_keeps_full_text_as_goal() {
        let task = Task::new("Traceback (most recent call last): boom");
        assert_eq!(task.goal(), task.full());
    }
}
