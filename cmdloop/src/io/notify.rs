//! Best-effort desktop notifications. Failures are logged and swallowed.

use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::io::process::run_command;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Show a desktop notification (`osascript` on macOS, `notify-send` elsewhere).
pub fn notify(title: &str, body: &str) {
    let cmd = notification_command(title, body, cfg!(target_os = "macos"));
    let program = cmd.get_program().to_string_lossy().into_owned();
    match run_command(cmd, None, Some(NOTIFY_TIMEOUT), 4096) {
        Ok(output) if output.success() => debug!(program, "notification sent"),
        Ok(output) => warn!(
            program,
            exit_code = ?output.status.code(),
            stderr = %output.stderr_text().trim(),
            "notification command failed"
        ),
        Err(err) => warn!(program, error = %format!("{err:#}"), "notification unavailable"),
    }
}

fn notification_command(title: &str, body: &str, macos: bool) -> Command {
    if macos {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            applescript_escape(body),
            applescript_escape(title)
        );
        let mut cmd = Command::new("osascript");
        cmd.args(["-e", &script]);
        cmd
    } else {
        let mut cmd = Command::new("notify-send");
        cmd.args(["-a", "cmdloop", title, body]);
        cmd
    }
}

fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macos_script_escapes_quotes() {
        let cmd = notification_command("cmdloop", "said \"done\"", true);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "osascript");
        assert_eq!(
            args,
            vec![
                "-e".to_string(),
                "display notification \"said \\\"done\\\"\" with title \"cmdloop\"".to_string()
            ]
        );
    }

    #[test]
    fn linux_uses_notify_send() {
        let cmd = notification_command("cmdloop", "finished", false);
        assert_eq!(cmd.get_program(), "notify-send");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["-a", "cmdloop", "cmdloop", "finished"]);
    }
}
