//! Safety rule catalogs.
//!
//! The mechanism is the contract: ordered regex deny lists evaluated under
//! a named policy, first match cited. The catalog itself is data and grows
//! here in one place.

use regex::Regex;

use opsmith_core::{ExecutionPolicy, Platform, Severity};

/// One deny or advisory pattern.
pub struct SafetyRule {
    pub id: &'static str,
    pub pattern: Regex,
    pub severity: Severity,
    pub message: &'static str,
    /// Platforms the rule applies to; `None` means all.
    pub platforms: Option<&'static [Platform]>,
}

impl SafetyRule {
    fn new(
        id: &'static str,
        pattern: &str,
        severity: Severity,
        message: &'static str,
        platforms: Option<&'static [Platform]>,
    ) -> Self {
        Self {
            id,
            // patterns are compile-time literals; a typo is a programming error
            pattern: Regex::new(pattern).expect("invalid safety rule pattern"),
            severity,
            message,
            platforms,
        }
    }

    pub fn applies_to(&self, platform: Platform) -> bool {
        match self.platforms {
            Some(platforms) => platforms.contains(&platform),
            None => true,
        }
    }
}

const BASH: &[Platform] = &[Platform::Bash];
const POWERSHELL: &[Platform] = &[Platform::PowerShell];
const APPLESCRIPT: &[Platform] = &[Platform::AppleScript];

/// Destructive operations denied under every policy, elevated included.
fn destructive_rules() -> Vec<SafetyRule> {
    use Severity::Error;
    vec![
        SafetyRule::new(
            "bash-rm-rf-root",
            r"(?i)\brm\s+-(rf|fr)\s+/(\s|$|\*)",
            Error,
            "recursive force delete of the filesystem root (rm -rf /)",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-fork-bomb",
            r":\(\)\s*\{\s*:\|:&\s*\}\s*;\s*:",
            Error,
            "shell fork bomb",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-mkfs",
            r"(?i)\bmkfs(\.[a-z0-9]+)?\b",
            Error,
            "filesystem format (mkfs)",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-dd-raw-write",
            r"(?i)\bdd\s+if=",
            Error,
            "raw device copy (dd if=)",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-system-power",
            r"(?i)\b(shutdown|reboot|halt|poweroff)\b",
            Error,
            "host power-state change (shutdown/reboot)",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-pipe-to-shell",
            r"(?i)\b(curl|wget)\b[^\n|]*\|\s*(ba|z|da)?sh\b",
            Error,
            "piping downloaded content straight into a shell",
            Some(BASH),
        ),
        SafetyRule::new(
            "ps-format-volume",
            r"(?i)\bFormat-Volume\b",
            Error,
            "volume format (Format-Volume)",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "ps-remove-system-root",
            r"(?i)Remove-Item\b[^\n]*-Recurse\b[^\n]*-Force\b[^\n]*C:\\",
            Error,
            "recursive forced delete of the system drive (Remove-Item -Recurse -Force C:\\)",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "ps-system-power",
            r"(?i)\b(Restart-Computer|Stop-Computer|shutdown(\.exe)?)\b",
            Error,
            "host power-state change",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "ps-iex-remote",
            r"(?i)(Invoke-Expression|\biex\b)[\s\S]*?(DownloadString|Invoke-WebRequest|\biwr\b|Net\.WebClient)",
            Error,
            "Invoke-Expression over downloaded content",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "as-system-power",
            r"(?i)tell\s+application[^\n]*(restart|shut down)",
            Error,
            "host power-state change via system events",
            Some(APPLESCRIPT),
        ),
        SafetyRule::new(
            "as-shell-destructive",
            r#"(?i)do shell script\s+"[^"]*rm\s+-(rf|fr)\s+/"#,
            Error,
            "destructive shell escape from AppleScript",
            Some(APPLESCRIPT),
        ),
    ]
}

/// Privilege elevation, denied under safe and restricted.
fn elevation_rules() -> Vec<SafetyRule> {
    use Severity::Error;
    vec![
        SafetyRule::new(
            "bash-sudo",
            r"(?i)\bsudo\b|\bsu\s+-",
            Error,
            "privilege elevation (sudo)",
            Some(BASH),
        ),
        SafetyRule::new(
            "ps-runas",
            r"(?i)Start-Process\b[^\n]*-Verb\s+RunAs",
            Error,
            "privilege elevation (RunAs)",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "as-admin-privileges",
            r"(?i)with administrator privileges",
            Error,
            "AppleScript shell escape with administrator privileges",
            Some(APPLESCRIPT),
        ),
    ]
}

/// Network access, denied under safe and restricted.
fn network_rules() -> Vec<SafetyRule> {
    use Severity::Error;
    vec![
        SafetyRule::new(
            "bash-network",
            r"(?i)\b(curl|wget|nc|netcat|ssh|scp|rsync)\b",
            Error,
            "network access",
            Some(BASH),
        ),
        SafetyRule::new(
            "ps-network",
            r"(?i)\b(Invoke-WebRequest|Invoke-RestMethod|Start-BitsTransfer|New-Object\s+Net\.WebClient)\b",
            Error,
            "network access",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "as-network",
            r#"(?i)do shell script\s+"[^"]*(curl|wget)"#,
            Error,
            "network access via shell escape",
            Some(APPLESCRIPT),
        ),
    ]
}

/// Filesystem mutation, denied under safe only.
fn write_rules() -> Vec<SafetyRule> {
    use Severity::Error;
    vec![
        SafetyRule::new(
            "bash-fs-write",
            r"(?i)\b(rm|rmdir|mv|chmod|chown|mkdir|tee|truncate)\b|>>?",
            Error,
            "filesystem mutation under a read-only policy",
            Some(BASH),
        ),
        SafetyRule::new(
            "ps-fs-write",
            r"(?i)\b(Set-Content|Add-Content|Out-File|New-Item|Remove-Item|Move-Item|Copy-Item|Set-ItemProperty)\b",
            Error,
            "filesystem mutation under a read-only policy",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "as-fs-write",
            r"(?i)\b(delete|move|duplicate|make new)\b",
            Error,
            "filesystem mutation under a read-only policy",
            Some(APPLESCRIPT),
        ),
    ]
}

/// Advisory findings: scored but never denying on their own.
fn advisory_rules() -> Vec<SafetyRule> {
    use Severity::Warn;
    vec![
        SafetyRule::new(
            "bash-eval",
            r"(?i)\beval\b",
            Warn,
            "eval of dynamic content",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-chmod-777",
            r"(?i)\bchmod\s+(-[a-z]+\s+)*777\b",
            Warn,
            "world-writable permissions (chmod 777)",
            Some(BASH),
        ),
        SafetyRule::new(
            "bash-killall",
            r"(?i)\b(killall|pkill)\b",
            Warn,
            "broad process termination",
            Some(BASH),
        ),
        SafetyRule::new(
            "ps-invoke-expression",
            r"(?i)\bInvoke-Expression\b",
            Warn,
            "Invoke-Expression of dynamic content",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "ps-stop-process",
            r"(?i)\bStop-Process\b",
            Warn,
            "process termination",
            Some(POWERSHELL),
        ),
        SafetyRule::new(
            "as-shell-escape",
            r"(?i)do shell script",
            Warn,
            "shell escape from AppleScript",
            Some(APPLESCRIPT),
        ),
    ]
}

/// Ordered deny list for a policy.
pub fn deny_rules_for(policy: ExecutionPolicy) -> Vec<SafetyRule> {
    let mut rules = destructive_rules();
    match policy {
        ExecutionPolicy::Safe => {
            rules.extend(elevation_rules());
            rules.extend(network_rules());
            rules.extend(write_rules());
        }
        ExecutionPolicy::Restricted => {
            rules.extend(elevation_rules());
            rules.extend(network_rules());
        }
        // standard and elevated deny the destructive catalog only
        ExecutionPolicy::Standard | ExecutionPolicy::Elevated => {}
    }
    rules
}

/// Advisory (warn-level) catalog; applies under every policy.
pub fn advisory_rules_for() -> Vec<SafetyRule> {
    advisory_rules()
}
