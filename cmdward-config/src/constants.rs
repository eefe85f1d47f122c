/// File locations and environment variables consulted by the loader
pub mod defaults {
    pub const CONFIG_FILE_NAME: &str = "cmdward.toml";
    pub const USER_CONFIG_DIR: &str = ".cmdward";
    pub const SYSTEM_CONFIG_PATH: &str = "/etc/cmdward/cmdward.toml";
    pub const CONFIG_PATH_ENV: &str = "CMDWARD_CONFIG_PATH";
    pub const WORKSPACE_ENV: &str = "CMDWARD_WORKSPACE";
}

/// Deadline bounds for supervised commands
pub mod execution {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const MIN_TIMEOUT_SECS: u64 = 1;
    pub const MAX_TIMEOUT_SECS: u64 = 3_600;
    pub const DEFAULT_GRACE_PERIOD_MS: u64 = 500;
    pub const MIN_GRACE_PERIOD_MS: u64 = 50;
    pub const MAX_GRACE_PERIOD_MS: u64 = 10_000;
}

/// Captured output limits
pub mod output {
    /// 10 KB, matching what an interactive terminal view can reasonably show.
    pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10_000;
    pub const MIN_MAX_OUTPUT_BYTES: usize = 64;
}

/// Default policy tables
pub mod commands {
    pub const DEFAULT_ALLOW_LIST: &[&str] = &[
        // File inspection
        "ls", "dir", "cat", "head", "tail", "less", "more", "file", "find", "locate", "which",
        "whereis", "type",
        // Text processing
        "grep", "egrep", "fgrep", "awk", "sed", "sort", "uniq", "cut", "tr", "wc", "diff",
        "cmp",
        // Archives
        "tar", "gzip", "gunzip", "zip", "unzip", "7z",
        // System information
        "ps", "top", "htop", "free", "df", "du", "lsof", "netstat", "uname", "whoami", "id",
        "groups", "uptime", "date", "cal", "env", "printenv",
        // Network tools
        "ping", "wget", "curl", "nslookup", "dig", "host",
        // Development tools
        "git", "python", "python3", "node", "npm", "pip", "pip3", "java", "javac", "gcc",
        "g++", "make", "cmake",
        // Editors
        "vim", "vi", "nano", "emacs",
        // Package managers
        "apt", "yum", "dnf", "pacman", "brew",
    ];

    pub const DEFAULT_DENY_LIST: &[&str] = &[
        // System modification
        "rm", "rmdir", "del", "erase", "format", "mkfs", "fdisk", "parted", "gparted",
        // System control
        "sudo", "su", "login", "logout", "exit", "shutdown", "reboot", "halt", "poweroff",
        "init", "systemctl", "service",
        // Remote access
        "ssh", "scp", "rsync", "ftp", "sftp", "telnet",
        // Process control
        "kill", "killall", "pkill", "nohup", "screen", "tmux",
        // Permissions
        "chmod", "chown", "chgrp", "umask",
        // Mounts
        "mount", "umount", "swapon", "swapoff",
        // Raw disk tools
        "dd", "shred", "wipe",
    ];

    /// Names the interactive front end handles itself instead of spawning.
    pub const DEFAULT_BUILTINS: &[&str] = &["cd", "pwd", "echo", "help", "clear", "history"];

    /// Per-program deadlines in seconds for slow or network-bound tools.
    pub const DEFAULT_COMMAND_TIMEOUTS: &[(&str, u64)] = &[
        ("ping", 10),
        ("wget", 60),
        ("curl", 60),
        ("find", 60),
        ("grep", 30),
        ("tar", 120),
        ("zip", 120),
        ("unzip", 120),
    ];
}
