//! Built-in artifact catalogues.
//!
//! Mirrors the layered layout of real triage playbooks: a common core that
//! works everywhere, per-OS tables for Windows and Linux, and a small
//! deterministic set used by the mock collector and the test suite.

use anyhow::Result;

use super::spec::{ArtifactCategory, ArtifactKind, ArtifactSpec, Platform};
use super::Catalogue;

/// Catalogue for the given target platform, built-in specs only.
pub fn builtin_catalogue(platform: Platform) -> Result<Catalogue> {
    let mut specs = common_specs();
    match platform {
        Platform::Windows => specs.extend(windows_specs()),
        Platform::Linux => specs.extend(linux_specs()),
        Platform::Any => {
            specs.extend(windows_specs());
            specs.extend(linux_specs());
        }
    }
    Ok(Catalogue::build(specs)?)
}

/// Specs meaningful on every platform.
pub fn common_specs() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::command("host_profile", "Hostname, OS, kernel and CPU summary")
            .with_kind(ArtifactKind::Metadata)
            .with_category(ArtifactCategory::Host)
            .with_priority(1)
            .with_param("source", "sysinfo"),
        ArtifactSpec::command("memory_image", "Full physical memory image")
            .with_kind(ArtifactKind::Dump)
            .with_category(ArtifactCategory::Memory)
            .with_priority(5)
            .volatile(),
    ]
}

/// Linux triage set. Volatile entries cover data lost on reboot or state
/// change; the rest is ordered by investigative value.
pub fn linux_specs() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::command("running_processes", "Process table with owners and args")
            .with_category(ArtifactCategory::Process)
            .with_platform(Platform::Linux)
            .with_priority(1)
            .volatile()
            .with_param("program", "ps")
            .with_param("args", "auxww"),
        ArtifactSpec::command("network_connections", "Open sockets and listening ports")
            .with_category(ArtifactCategory::Network)
            .with_platform(Platform::Linux)
            .with_priority(1)
            .volatile()
            .with_param("program", "ss")
            .with_param("args", "-tunap"),
        ArtifactSpec::command("logged_in_users", "Sessions currently logged in")
            .with_category(ArtifactCategory::Users)
            .with_platform(Platform::Linux)
            .with_priority(2)
            .volatile()
            .with_param("program", "who")
            .with_param("args", "-a"),
        ArtifactSpec::command("arp_cache", "ARP neighbour table")
            .with_category(ArtifactCategory::Network)
            .with_platform(Platform::Linux)
            .with_priority(2)
            .volatile()
            .with_param("program", "ip")
            .with_param("args", "neigh show"),
        ArtifactSpec::command("interface_config", "Interface addresses and state")
            .with_category(ArtifactCategory::Network)
            .with_platform(Platform::Linux)
            .with_priority(2)
            .with_param("program", "ip")
            .with_param("args", "addr show"),
        ArtifactSpec::command("open_files", "Open file descriptors by process")
            .with_category(ArtifactCategory::Process)
            .with_platform(Platform::Linux)
            .with_priority(3)
            .with_param("program", "lsof")
            .with_param("args", "-nP")
            .with_param("optional", "true"),
        ArtifactSpec::command("journal_tail", "Recent systemd journal entries")
            .with_category(ArtifactCategory::Logs)
            .with_platform(Platform::Linux)
            .with_priority(2)
            .with_param("program", "journalctl")
            .with_param("args", "--no-pager -n 5000")
            .with_param("optional", "true"),
        ArtifactSpec::command("service_units", "Installed and running service units")
            .with_category(ArtifactCategory::Service)
            .with_platform(Platform::Linux)
            .with_priority(3)
            .with_param("program", "systemctl")
            .with_param("args", "list-units --type=service --all --no-pager")
            .with_param("optional", "true"),
        ArtifactSpec::command("auth_log", "Authentication log excerpt")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Logs)
            .with_platform(Platform::Linux)
            .with_priority(2)
            .with_param("paths", "/var/log/auth.log;/var/log/secure"),
        ArtifactSpec::command("syslog", "System log excerpt")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Logs)
            .with_platform(Platform::Linux)
            .with_priority(3)
            .with_param("paths", "/var/log/syslog;/var/log/messages"),
        ArtifactSpec::command("passwd_file", "Local account database")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Users)
            .with_platform(Platform::Linux)
            .with_priority(2)
            .with_param("path", "/etc/passwd"),
        ArtifactSpec::command("crontabs", "System cron tables")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::System)
            .with_platform(Platform::Linux)
            .with_priority(3)
            .with_param("paths", "/etc/crontab;/etc/cron.d"),
        ArtifactSpec::command("shell_history", "Root shell history")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Users)
            .with_platform(Platform::Linux)
            .with_priority(3)
            .with_param("paths", "/root/.bash_history"),
        ArtifactSpec::command("tmp_listing", "Metadata listing of world-writable dirs")
            .with_kind(ArtifactKind::Metadata)
            .with_category(ArtifactCategory::Filesystem)
            .with_platform(Platform::Linux)
            .with_priority(3)
            .with_param("paths", "/tmp;/var/tmp;/dev/shm"),
        ArtifactSpec::command("kernel_modules", "Loaded kernel modules")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::System)
            .with_platform(Platform::Linux)
            .with_priority(4)
            .with_param("path", "/proc/modules"),
        ArtifactSpec::command("mounts", "Mounted filesystems")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Storage)
            .with_platform(Platform::Linux)
            .with_priority(4)
            .with_param("path", "/proc/mounts"),
        ArtifactSpec::command("package_list", "Installed package inventory")
            .with_category(ArtifactCategory::Application)
            .with_platform(Platform::Linux)
            .with_priority(4)
            .with_param("program", "dpkg-query")
            .with_param("args", "-W")
            .with_param("optional", "true"),
        ArtifactSpec::command("login_history", "Recent login records")
            .with_category(ArtifactCategory::Timeline)
            .with_platform(Platform::Linux)
            .with_priority(4)
            .with_param("program", "last")
            .with_param("args", "-n 200")
            .with_param("optional", "true")
            .depends_on("logged_in_users"),
        ArtifactSpec::command("hardware_summary", "PCI and block device inventory")
            .with_category(ArtifactCategory::Hardware)
            .with_platform(Platform::Linux)
            .with_priority(5)
            .with_param("program", "lspci")
            .with_param("args", "")
            .with_param("optional", "true"),
    ]
}

/// Windows triage set.
pub fn windows_specs() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::command("running_processes_win", "Process table with services")
            .with_category(ArtifactCategory::Process)
            .with_platform(Platform::Windows)
            .with_priority(1)
            .volatile()
            .with_param("program", "tasklist")
            .with_param("args", "/V /FO CSV"),
        ArtifactSpec::command("network_connections_win", "Open sockets with owning PIDs")
            .with_category(ArtifactCategory::Network)
            .with_platform(Platform::Windows)
            .with_priority(1)
            .volatile()
            .with_param("program", "netstat")
            .with_param("args", "-ano"),
        ArtifactSpec::command("ip_config", "Adapter configuration and DNS state")
            .with_category(ArtifactCategory::Network)
            .with_platform(Platform::Windows)
            .with_priority(2)
            .volatile()
            .with_param("program", "ipconfig")
            .with_param("args", "/all"),
        ArtifactSpec::command("local_sessions", "Interactive sessions")
            .with_category(ArtifactCategory::Users)
            .with_platform(Platform::Windows)
            .with_priority(2)
            .volatile()
            .with_param("program", "query")
            .with_param("args", "user")
            .with_param("optional", "true"),
        ArtifactSpec::command("system_eventlog", "System event log excerpt")
            .with_category(ArtifactCategory::Logs)
            .with_platform(Platform::Windows)
            .with_priority(2)
            .with_param("program", "wevtutil")
            .with_param("args", "qe System /c:2000 /rd:true /f:text"),
        ArtifactSpec::command("security_eventlog", "Security event log excerpt")
            .with_category(ArtifactCategory::Logs)
            .with_platform(Platform::Windows)
            .with_priority(2)
            .with_param("program", "wevtutil")
            .with_param("args", "qe Security /c:2000 /rd:true /f:text"),
        ArtifactSpec::command("run_keys", "Autostart registry run keys")
            .with_kind(ArtifactKind::Registry)
            .with_category(ArtifactCategory::Registry)
            .with_platform(Platform::Windows)
            .with_priority(2)
            .with_param(
                "keys",
                "HKLM\\Software\\Microsoft\\Windows\\CurrentVersion\\Run;HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Run",
            ),
        ArtifactSpec::command("installed_services", "Service configuration")
            .with_category(ArtifactCategory::Service)
            .with_platform(Platform::Windows)
            .with_priority(3)
            .with_param("program", "sc")
            .with_param("args", "query type= service state= all"),
        ArtifactSpec::command("scheduled_tasks", "Scheduled task inventory")
            .with_category(ArtifactCategory::System)
            .with_platform(Platform::Windows)
            .with_priority(3)
            .with_param("program", "schtasks")
            .with_param("args", "/query /fo LIST /v"),
        ArtifactSpec::command("local_users", "Local account inventory")
            .with_category(ArtifactCategory::Users)
            .with_platform(Platform::Windows)
            .with_priority(3)
            .with_param("program", "net")
            .with_param("args", "user"),
        ArtifactSpec::command("prefetch_listing", "Prefetch directory metadata")
            .with_kind(ArtifactKind::Metadata)
            .with_category(ArtifactCategory::Timeline)
            .with_platform(Platform::Windows)
            .with_priority(3)
            .with_param("paths", "C:\\Windows\\Prefetch"),
        ArtifactSpec::command("system_hives", "Registry hive copies")
            .with_kind(ArtifactKind::Hive)
            .with_category(ArtifactCategory::Registry)
            .with_platform(Platform::Windows)
            .with_priority(4)
            .with_param(
                "paths",
                "C:\\Windows\\System32\\config\\SYSTEM;C:\\Windows\\System32\\config\\SOFTWARE",
            ),
        ArtifactSpec::command("installed_programs", "Installed program inventory")
            .with_category(ArtifactCategory::Application)
            .with_platform(Platform::Windows)
            .with_priority(4)
            .with_param("program", "wmic")
            .with_param("args", "product get name,version,vendor")
            .with_param("optional", "true"),
        ArtifactSpec::command("disk_layout", "Volume and disk layout")
            .with_category(ArtifactCategory::Storage)
            .with_platform(Platform::Windows)
            .with_priority(4)
            .with_param("program", "wmic")
            .with_param("args", "logicaldisk get caption,filesystem,size,freespace")
            .with_param("optional", "true"),
    ]
}

/// Small deterministic set used by the mock collector and tests. Names are
/// chosen so detection and report fixtures can rely on them.
pub fn mock_specs() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::command("host_profile", "Synthesized host summary")
            .with_kind(ArtifactKind::Metadata)
            .with_category(ArtifactCategory::Host)
            .with_priority(1)
            .with_param("source", "sysinfo"),
        ArtifactSpec::command("running_processes", "Synthesized process table")
            .with_category(ArtifactCategory::Process)
            .with_priority(1)
            .volatile(),
        ArtifactSpec::command("network_connections", "Synthesized socket table")
            .with_category(ArtifactCategory::Network)
            .with_priority(1)
            .volatile(),
        ArtifactSpec::command("auth_log", "Synthesized auth log")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Logs)
            .with_priority(2),
        ArtifactSpec::command("tmp_listing", "Synthesized directory metadata")
            .with_kind(ArtifactKind::Metadata)
            .with_category(ArtifactCategory::Filesystem)
            .with_priority(3),
    ]
}
