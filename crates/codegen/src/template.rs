//! Deterministic offline script synthesis.
//!
//! A small per-platform catalog of parameterized templates, keyed by
//! keyword sets and matched by Jaccard similarity against the description
//! tokens. Below the threshold, the platform's basic skeleton is emitted.
//! Generation never fails.

use std::collections::BTreeSet;

use opsmith_core::{Platform, Script, ScriptSource};

/// One catalog entry.
struct Template {
    key: &'static str,
    keywords: &'static [&'static str],
    filename: &'static str,
    documentation: &'static str,
    estimated_runtime: &'static str,
    body: fn(&str) -> String,
}

/// Offline template generator.
pub struct TemplateCatalog {
    threshold: f64,
}

impl TemplateCatalog {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Produce a script for the description. Falls back to the platform's
    /// basic skeleton when nothing in the catalog matches well enough.
    pub fn generate(&self, description: &str, platform: Platform) -> Script {
        let tokens = tokenize(description);
        let clean = sanitize(description);

        let mut best: Option<(&Template, f64)> = None;
        for template in catalog_for(platform) {
            let score = jaccard(&tokens, template.keywords);
            // strictly-greater keeps catalog order as the tie-break
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((template, score));
            }
        }

        match best {
            Some((template, score)) if score >= self.threshold => {
                tracing::debug!(
                    template = template.key,
                    score,
                    %platform,
                    "Matched offline template"
                );
                Script {
                    platform,
                    filename: template.filename.to_string(),
                    content: (template.body)(&clean),
                    documentation: template.documentation.to_string(),
                    source: ScriptSource::Template,
                    safety_hint: Some(safety_hint_for(template.key).to_string()),
                    safety_report: None,
                    estimated_runtime: Some(template.estimated_runtime.to_string()),
                }
            }
            _ => {
                tracing::debug!(%platform, "No template matched; emitting basic skeleton");
                Script {
                    platform,
                    filename: format!("{}-automation{}", platform, platform.file_extension()),
                    content: basic_skeleton(platform, &clean),
                    documentation: format!(
                        "Skeleton for \"{}\": fill in the marked section with the automation body.",
                        clean
                    ),
                    source: ScriptSource::Template,
                    safety_hint: Some("skeleton only; review the TODO body before running".into()),
                    safety_report: None,
                    estimated_runtime: None,
                }
            }
        }
    }
}

/// One-line caution attached to each template's output.
fn safety_hint_for(key: &str) -> &'static str {
    match key {
        "backup" => "writes an archive file; verify the destination has space",
        "monitor" => "read-only system inspection",
        "user" => "creates a local account; requires administrative rights",
        "file-process" => "iterates files in place; dry-run on a copy first",
        "service" => "may restart a service; schedule around users",
        "browser" => "opens an external application",
        _ => "review before running",
    }
}

/// Lowercase word set of a description.
fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// Jaccard similarity between the description tokens and a keyword set.
fn jaccard(tokens: &BTreeSet<String>, keywords: &[&str]) -> f64 {
    if tokens.is_empty() || keywords.is_empty() {
        return 0.0;
    }
    let keyword_set: BTreeSet<&str> = keywords.iter().copied().collect();
    let intersection = keyword_set
        .iter()
        .filter(|k| tokens.contains(**k))
        .count() as f64;
    let union = (tokens.len() + keyword_set.len()) as f64 - intersection;
    intersection / union
}

/// Strip anything that could break out of a comment or quoted string when
/// the description is substituted into a template.
fn sanitize(description: &str) -> String {
    let mut out = String::with_capacity(description.len());
    let mut last_space = true;
    for c in description.chars() {
        let keep = c.is_ascii_alphanumeric() || " .,:;()/_+-".contains(c);
        let c = if keep { c } else { ' ' };
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        "unnamed automation".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}

fn catalog_for(platform: Platform) -> &'static [Template] {
    match platform {
        Platform::Bash => BASH_TEMPLATES,
        Platform::PowerShell => POWERSHELL_TEMPLATES,
        Platform::AppleScript => APPLESCRIPT_TEMPLATES,
    }
}

// =============================================================================
// Bash catalog
// =============================================================================

static BASH_TEMPLATES: &[Template] = &[
    Template {
        key: "backup",
        keywords: &["backup", "archive", "copy", "documents", "folder", "save"],
        filename: "backup.sh",
        documentation: "Archives a source directory into a timestamped tar.gz under a backup directory.",
        estimated_runtime: "seconds to minutes, proportional to source size",
        body: bash_backup,
    },
    Template {
        key: "monitor",
        keywords: &["monitor", "system", "cpu", "memory", "disk", "usage", "health"],
        filename: "monitor.sh",
        documentation: "Prints a one-shot snapshot of CPU load, memory, and disk usage.",
        estimated_runtime: "under five seconds",
        body: bash_monitor,
    },
    Template {
        key: "user",
        keywords: &["user", "account", "create", "add", "group", "password"],
        filename: "manage-user.sh",
        documentation: "Creates a local user account with a home directory, idempotently.",
        estimated_runtime: "under five seconds",
        body: bash_user,
    },
    Template {
        key: "file-process",
        keywords: &["file", "files", "process", "rename", "batch", "convert", "clean"],
        filename: "process-files.sh",
        documentation: "Walks a directory and applies a per-file step with a processed counter.",
        estimated_runtime: "proportional to file count",
        body: bash_file_process,
    },
    Template {
        key: "service",
        keywords: &["service", "restart", "status", "daemon", "systemctl", "check"],
        filename: "check-service.sh",
        documentation: "Checks a systemd unit and restarts it when inactive.",
        estimated_runtime: "under ten seconds",
        body: bash_service,
    },
    Template {
        key: "browser",
        keywords: &["browser", "open", "url", "page", "web", "tab"],
        filename: "open-page.sh",
        documentation: "Opens a URL in the default browser, cross-desktop.",
        estimated_runtime: "instant",
        body: bash_browser,
    },
];

fn bash_header(description: &str, purpose: &str) -> String {
    format!(
        "#!/bin/bash\n# {}\n#\n# {}\n\nset -euo pipefail\ntrap 'echo \"[ERROR] failed at line $LINENO\" >&2' ERR\n\n",
        description, purpose
    )
}

fn bash_backup(description: &str) -> String {
    bash_header(description, "Usage: backup.sh [SOURCE_DIR] [BACKUP_DIR]")
        + r#"SOURCE_DIR="${1:-$HOME/Documents}"
BACKUP_DIR="${2:-$HOME/backups}"
STAMP="$(date +%Y%m%d-%H%M%S)"
ARCHIVE="$BACKUP_DIR/backup-$STAMP.tar.gz"

if [ ! -d "$SOURCE_DIR" ]; then
    echo "[ERROR] source directory not found: $SOURCE_DIR" >&2
    exit 1
fi

mkdir -p "$BACKUP_DIR"
echo "[INFO] archiving $SOURCE_DIR -> $ARCHIVE"
tar -czf "$ARCHIVE" -C "$(dirname "$SOURCE_DIR")" "$(basename "$SOURCE_DIR")"
echo "[INFO] backup complete: $(du -h "$ARCHIVE" | cut -f1)"
"#
}

fn bash_monitor(description: &str) -> String {
    bash_header(description, "Usage: monitor.sh")
        + r#"echo "[INFO] system snapshot at $(date)"
echo "--- load ---"
uptime
echo "--- memory ---"
free -h
echo "--- disk ---"
df -h --output=target,pcent,avail | tail -n +2
echo "--- top processes ---"
ps aux --sort=-%cpu | head -n 6
echo "[INFO] snapshot complete"
"#
}

fn bash_user(description: &str) -> String {
    bash_header(description, "Usage: manage-user.sh USERNAME")
        + r#"USERNAME="${1:?usage: manage-user.sh USERNAME}"

if id "$USERNAME" >/dev/null 2>&1; then
    echo "[INFO] user $USERNAME already exists, nothing to do"
    exit 0
fi

echo "[INFO] creating user $USERNAME"
useradd --create-home --shell /bin/bash "$USERNAME"
echo "[INFO] user $USERNAME created; set a password with: passwd $USERNAME"
"#
}

fn bash_file_process(description: &str) -> String {
    bash_header(description, "Usage: process-files.sh [TARGET_DIR] [GLOB]")
        + r#"TARGET_DIR="${1:-.}"
PATTERN="${2:-*}"
count=0

for file in "$TARGET_DIR"/$PATTERN; do
    [ -f "$file" ] || continue
    echo "[INFO] processing $file"
    # per-file step goes here
    count=$((count + 1))
done

echo "[INFO] processed $count file(s) in $TARGET_DIR"
"#
}

fn bash_service(description: &str) -> String {
    bash_header(description, "Usage: check-service.sh SERVICE_NAME")
        + r#"SERVICE="${1:?usage: check-service.sh SERVICE_NAME}"

if systemctl is-active --quiet "$SERVICE"; then
    echo "[INFO] $SERVICE is running"
else
    echo "[WARN] $SERVICE is not running, restarting"
    systemctl restart "$SERVICE"
    sleep 2
    systemctl is-active --quiet "$SERVICE" && echo "[INFO] $SERVICE recovered"
fi

systemctl status "$SERVICE" --no-pager --lines=3
"#
}

fn bash_browser(description: &str) -> String {
    bash_header(description, "Usage: open-page.sh URL")
        + r#"URL="${1:?usage: open-page.sh URL}"

echo "[INFO] opening $URL"
if command -v xdg-open >/dev/null 2>&1; then
    xdg-open "$URL"
elif command -v open >/dev/null 2>&1; then
    open "$URL"
else
    echo "[ERROR] no opener found (xdg-open/open)" >&2
    exit 1
fi
"#
}

// =============================================================================
// PowerShell catalog
// =============================================================================

static POWERSHELL_TEMPLATES: &[Template] = &[
    Template {
        key: "backup",
        keywords: &["backup", "archive", "copy", "documents", "folder", "save"],
        filename: "Backup-Folder.ps1",
        documentation: "Compresses a source folder into a timestamped zip archive.",
        estimated_runtime: "seconds to minutes, proportional to source size",
        body: ps_backup,
    },
    Template {
        key: "monitor",
        keywords: &["monitor", "system", "cpu", "memory", "disk", "usage", "health"],
        filename: "Get-SystemSnapshot.ps1",
        documentation: "Reports CPU, memory, and disk usage in one pass.",
        estimated_runtime: "under five seconds",
        body: ps_monitor,
    },
    Template {
        key: "user",
        keywords: &["user", "account", "create", "add", "group", "password"],
        filename: "New-LocalAccount.ps1",
        documentation: "Creates a local user account if it does not already exist.",
        estimated_runtime: "under five seconds",
        body: ps_user,
    },
    Template {
        key: "file-process",
        keywords: &["file", "files", "process", "rename", "batch", "convert", "clean"],
        filename: "Invoke-FileBatch.ps1",
        documentation: "Iterates files under a directory and applies a per-file step.",
        estimated_runtime: "proportional to file count",
        body: ps_file_process,
    },
    Template {
        key: "service",
        keywords: &["service", "restart", "status", "daemon", "check"],
        filename: "Test-ServiceHealth.ps1",
        documentation: "Checks a Windows service and starts it when stopped.",
        estimated_runtime: "under ten seconds",
        body: ps_service,
    },
    Template {
        key: "browser",
        keywords: &["browser", "open", "url", "page", "web", "tab"],
        filename: "Open-Page.ps1",
        documentation: "Opens a URL in the default browser.",
        estimated_runtime: "instant",
        body: ps_browser,
    },
];

fn ps_header(description: &str) -> String {
    format!("# {}\n\n", description)
}

fn ps_backup(description: &str) -> String {
    ps_header(description)
        + r#"param(
    [Parameter(Mandatory = $false)]
    [string]$SourceDir = "$env:USERPROFILE\Documents",

    [Parameter(Mandatory = $false)]
    [string]$BackupDir = "$env:USERPROFILE\Backups"
)

try {
    if (-not (Test-Path $SourceDir)) {
        throw "Source directory not found: $SourceDir"
    }
    New-Item -ItemType Directory -Path $BackupDir -Force | Out-Null

    $stamp = Get-Date -Format "yyyyMMdd-HHmmss"
    $archive = Join-Path $BackupDir "backup-$stamp.zip"

    Write-Host "Archiving $SourceDir -> $archive"
    Compress-Archive -Path $SourceDir -DestinationPath $archive -Force
    Write-Host "Backup complete: $archive" -ForegroundColor Green
} catch {
    Write-Error "Backup failed: $($_.Exception.Message)"
    exit 1
}
"#
}

fn ps_monitor(description: &str) -> String {
    ps_header(description)
        + r#"param(
    [Parameter(Mandatory = $false)]
    [int]$TopProcesses = 5
)

try {
    Write-Host "System snapshot at $(Get-Date)"

    $cpu = Get-CimInstance Win32_Processor | Measure-Object -Property LoadPercentage -Average
    Write-Host ("CPU load: {0}%" -f [math]::Round($cpu.Average, 1))

    $os = Get-CimInstance Win32_OperatingSystem
    $usedMb = ($os.TotalVisibleMemorySize - $os.FreePhysicalMemory) / 1KB
    Write-Host ("Memory used: {0:N0} MB of {1:N0} MB" -f $usedMb, ($os.TotalVisibleMemorySize / 1KB))

    Get-PSDrive -PSProvider FileSystem |
        Select-Object Name, @{n = 'UsedGB'; e = { [math]::Round($_.Used / 1GB, 1) } },
                            @{n = 'FreeGB'; e = { [math]::Round($_.Free / 1GB, 1) } } |
        Format-Table -AutoSize

    Get-Process | Sort-Object CPU -Descending |
        Select-Object -First $TopProcesses Name, Id, CPU |
        Format-Table -AutoSize
} catch {
    Write-Error "Snapshot failed: $($_.Exception.Message)"
    exit 1
}
"#
}

fn ps_user(description: &str) -> String {
    ps_header(description)
        + r#"param(
    [Parameter(Mandatory = $true)]
    [ValidatePattern('^[a-zA-Z0-9._-]+$')]
    [string]$UserName
)

try {
    if (Get-LocalUser -Name $UserName -ErrorAction SilentlyContinue) {
        Write-Host "User $UserName already exists, nothing to do"
        exit 0
    }

    Write-Host "Creating local user $UserName"
    New-LocalUser -Name $UserName -NoPassword | Out-Null
    Write-Host "User $UserName created; set a password before first logon" -ForegroundColor Green
} catch {
    Write-Error "Account creation failed: $($_.Exception.Message)"
    exit 1
}
"#
}

fn ps_file_process(description: &str) -> String {
    ps_header(description)
        + r#"param(
    [Parameter(Mandatory = $false)]
    [string]$TargetDir = ".",

    [Parameter(Mandatory = $false)]
    [string]$Filter = "*"
)

try {
    if (-not (Test-Path $TargetDir)) {
        throw "Target directory not found: $TargetDir"
    }

    $count = 0
    Get-ChildItem -Path $TargetDir -Filter $Filter -File | ForEach-Object {
        Write-Host "Processing $($_.FullName)"
        # per-file step goes here
        $count++
    }

    Write-Host "Processed $count file(s) in $TargetDir" -ForegroundColor Green
} catch {
    Write-Error "File processing failed: $($_.Exception.Message)"
    exit 1
}
"#
}

fn ps_service(description: &str) -> String {
    ps_header(description)
        + r#"param(
    [Parameter(Mandatory = $true)]
    [string]$ServiceName
)

try {
    $service = Get-Service -Name $ServiceName -ErrorAction Stop

    if ($service.Status -eq 'Running') {
        Write-Host "$ServiceName is running"
    } else {
        Write-Host "$ServiceName is $($service.Status), starting"
        Start-Service -Name $ServiceName
        Write-Host "$ServiceName started" -ForegroundColor Green
    }

    Get-Service -Name $ServiceName | Format-Table Name, Status, StartType -AutoSize
} catch {
    Write-Error "Service check failed: $($_.Exception.Message)"
    exit 1
}
"#
}

fn ps_browser(description: &str) -> String {
    ps_header(description)
        + r#"param(
    [Parameter(Mandatory = $true)]
    [ValidatePattern('^https?://')]
    [string]$Url
)

try {
    Write-Host "Opening $Url"
    Start-Process $Url
} catch {
    Write-Error "Could not open the page: $($_.Exception.Message)"
    exit 1
}
"#
}

// =============================================================================
// AppleScript catalog
// =============================================================================

static APPLESCRIPT_TEMPLATES: &[Template] = &[
    Template {
        key: "backup",
        keywords: &["backup", "archive", "copy", "documents", "folder", "save"],
        filename: "backup-folder.scpt",
        documentation: "Zips a folder into a timestamped archive via Finder-safe shell escape.",
        estimated_runtime: "seconds to minutes, proportional to source size",
        body: as_backup,
    },
    Template {
        key: "monitor",
        keywords: &["monitor", "system", "cpu", "memory", "disk", "usage", "health"],
        filename: "system-snapshot.scpt",
        documentation: "Shows a notification with a quick system usage snapshot.",
        estimated_runtime: "under five seconds",
        body: as_monitor,
    },
    Template {
        key: "file-process",
        keywords: &["file", "files", "process", "rename", "batch", "clean"],
        filename: "process-files.scpt",
        documentation: "Counts and reports files in a chosen folder as a processing skeleton.",
        estimated_runtime: "proportional to file count",
        body: as_file_process,
    },
    Template {
        key: "browser",
        keywords: &["browser", "open", "url", "page", "web", "safari", "tab"],
        filename: "open-page.scpt",
        documentation: "Opens a URL in Safari, launching it when needed.",
        estimated_runtime: "instant",
        body: as_browser,
    },
];

fn as_header(description: &str) -> String {
    format!("#!/usr/bin/osascript\n\n-- {}\n\n", description)
}

fn as_backup(description: &str) -> String {
    as_header(description)
        + r#"on run argv
    try
        set sourceFolder to POSIX path of (path to documents folder)
        if (count of argv) > 0 then set sourceFolder to item 1 of argv

        display notification "Backup starting…" with title "Automation"
        set stamp to do shell script "date +%Y%m%d-%H%M%S"
        set archivePath to (POSIX path of (path to home folder)) & "backup-" & stamp & ".zip"
        do shell script "cd " & quoted form of sourceFolder & " && zip -rq " & quoted form of archivePath & " ."

        display notification "Backup complete: " & archivePath with title "Automation"
        return archivePath
    on error errorMessage
        display dialog "Backup failed: " & errorMessage buttons {"OK"} default button "OK" with icon stop
        return false
    end try
end run
"#
}

fn as_monitor(description: &str) -> String {
    as_header(description)
        + r#"on run
    try
        set loadInfo to do shell script "uptime | awk -F'load averages?:' '{print $2}'"
        set diskInfo to do shell script "df -h / | tail -1 | awk '{print $5 \" used\"}'"

        display notification "Load:" & loadInfo & " — disk " & diskInfo with title "System Snapshot"
        return loadInfo
    on error errorMessage
        display dialog "Snapshot failed: " & errorMessage buttons {"OK"} default button "OK" with icon stop
        return false
    end try
end run
"#
}

fn as_file_process(description: &str) -> String {
    as_header(description)
        + r#"on run argv
    try
        set targetFolder to POSIX path of (path to desktop)
        if (count of argv) > 0 then set targetFolder to item 1 of argv

        tell application "System Events"
            set fileCount to count of files of folder targetFolder
        end tell

        -- per-file step goes here

        display notification "Processed " & fileCount & " file(s)" with title "Automation"
        return fileCount
    on error errorMessage
        display dialog "Processing failed: " & errorMessage buttons {"OK"} default button "OK" with icon stop
        return false
    end try
end run
"#
}

fn as_browser(description: &str) -> String {
    as_header(description)
        + r#"on run argv
    try
        set pageUrl to "https://example.com"
        if (count of argv) > 0 then set pageUrl to item 1 of argv

        tell application "Safari"
            activate
            open location pageUrl
        end tell

        display notification "Opened " & pageUrl with title "Automation"
        return pageUrl
    on error errorMessage
        display dialog "Could not open the page: " & errorMessage buttons {"OK"} default button "OK" with icon stop
        return false
    end try
end run
"#
}

// =============================================================================
// Basic skeletons
// =============================================================================

/// Platform skeleton emitted when no template clears the threshold: header,
/// help block, error trap, marked body, graceful exit.
fn basic_skeleton(platform: Platform, description: &str) -> String {
    match platform {
        Platform::Bash => {
            bash_header(description, "Usage: see the argument parsing below")
                + &format!(
                    r#"usage() {{
    echo "usage: $0 [args]"
    exit 64
}}

main() {{
    echo "[INFO] starting: {}"

    # TODO: implement the automation body

    echo "[INFO] done"
}}

case "${{1:-}}" in
    -h|--help) usage ;;
esac

main "$@"
"#,
                    description
                )
        }
        Platform::PowerShell => {
            ps_header(description)
                + &format!(
                    r#"param(
    [Parameter(Mandatory = $false)]
    [switch]$WhatIf
)

try {{
    Write-Host "Starting: {}"

    # TODO: implement the automation body

    Write-Host "Done" -ForegroundColor Green
}} catch {{
    Write-Error "Automation failed: $($_.Exception.Message)"
    exit 1
}}
"#,
                    description
                )
        }
        Platform::AppleScript => {
            as_header(description)
                + &format!(
                    r#"on run
    try
        display notification "Starting: {}" with title "Automation"

        -- TODO: implement the automation body

        display notification "Done" with title "Automation"
        return true
    on error errorMessage
        display dialog "Automation failed: " & errorMessage buttons {{"OK"}} default button "OK" with icon stop
        return false
    end try
end run
"#,
                    description
                )
        }
    }
}
