//! Fixed policy tables
//!
//! Literal, auditable data. Every entry is matched case-insensitively.

// ============================================================
// Command denylist (substring match)
// ============================================================

/// Rule category, reported in denial reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    DestructiveFilesystem,
    NetworkEgress,
    PrivilegeEscalation,
    DeviceRedirect,
    ForkBomb,
    Firewall,
    SystemControl,
}

impl RuleCategory {
    pub fn description(&self) -> &'static str {
        match self {
            RuleCategory::DestructiveFilesystem => "destructive filesystem operation",
            RuleCategory::NetworkEgress => "network egress tool",
            RuleCategory::PrivilegeEscalation => "privilege escalation",
            RuleCategory::DeviceRedirect => "device file access",
            RuleCategory::ForkBomb => "fork bomb",
            RuleCategory::Firewall => "firewall manipulation",
            RuleCategory::SystemControl => "system control",
        }
    }
}

/// Denied command substrings, checked in order; first match wins
pub const DENIED_COMMAND_PATTERNS: &[(&str, RuleCategory)] = &[
    // Destructive filesystem operations
    ("rm -rf", RuleCategory::DestructiveFilesystem),
    ("rm -fr", RuleCategory::DestructiveFilesystem),
    ("rm -r /", RuleCategory::DestructiveFilesystem),
    ("mkfs", RuleCategory::DestructiveFilesystem),
    ("dd if=", RuleCategory::DestructiveFilesystem),
    ("shred ", RuleCategory::DestructiveFilesystem),
    ("wipefs", RuleCategory::DestructiveFilesystem),
    // Network egress
    ("curl", RuleCategory::NetworkEgress),
    ("wget", RuleCategory::NetworkEgress),
    ("nc -", RuleCategory::NetworkEgress),
    ("ncat", RuleCategory::NetworkEgress),
    ("netcat", RuleCategory::NetworkEgress),
    ("telnet", RuleCategory::NetworkEgress),
    ("ssh ", RuleCategory::NetworkEgress),
    ("scp ", RuleCategory::NetworkEgress),
    ("sftp", RuleCategory::NetworkEgress),
    ("rsync", RuleCategory::NetworkEgress),
    ("socat", RuleCategory::NetworkEgress),
    ("/dev/tcp/", RuleCategory::NetworkEgress),
    ("/dev/udp/", RuleCategory::NetworkEgress),
    // Privilege escalation
    ("sudo", RuleCategory::PrivilegeEscalation),
    ("su -", RuleCategory::PrivilegeEscalation),
    ("su root", RuleCategory::PrivilegeEscalation),
    ("doas ", RuleCategory::PrivilegeEscalation),
    ("chmod 777", RuleCategory::PrivilegeEscalation),
    ("chmod +s", RuleCategory::PrivilegeEscalation),
    ("chmod u+s", RuleCategory::PrivilegeEscalation),
    ("chown root", RuleCategory::PrivilegeEscalation),
    ("setcap", RuleCategory::PrivilegeEscalation),
    ("passwd", RuleCategory::PrivilegeEscalation),
    // Device file redirects
    ("> /dev/sd", RuleCategory::DeviceRedirect),
    (">/dev/sd", RuleCategory::DeviceRedirect),
    ("> /dev/nvme", RuleCategory::DeviceRedirect),
    (">/dev/nvme", RuleCategory::DeviceRedirect),
    ("of=/dev/", RuleCategory::DeviceRedirect),
    ("/dev/mem", RuleCategory::DeviceRedirect),
    ("/dev/kmem", RuleCategory::DeviceRedirect),
    // Fork bombs
    (":(){", RuleCategory::ForkBomb),
    (":|:&", RuleCategory::ForkBomb),
    // Firewall manipulation
    ("iptables", RuleCategory::Firewall),
    ("ip6tables", RuleCategory::Firewall),
    ("nft ", RuleCategory::Firewall),
    ("ufw ", RuleCategory::Firewall),
    ("firewall-cmd", RuleCategory::Firewall),
    // System control
    ("shutdown", RuleCategory::SystemControl),
    ("reboot", RuleCategory::SystemControl),
    ("poweroff", RuleCategory::SystemControl),
    ("init 0", RuleCategory::SystemControl),
];

/// Whitespace-tolerant fork bomb form (`: ( ) { : | : & } ; :`)
pub const FORK_BOMB_REGEX: &str = r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:";

/// Programs that must never receive piped data
pub const NETWORK_TOOLS: &[&str] = &[
    "curl", "wget", "nc", "ncat", "netcat", "telnet", "ssh", "scp", "sftp", "ftp", "socat",
    "rsync",
];

/// Programs that run their arguments as another command. A pipe segment
/// starting with one of these is judged by the command it wraps.
pub const COMMAND_WRAPPERS: &[&str] = &[
    "env", "exec", "nohup", "command", "builtin", "xargs", "stdbuf", "timeout", "nice", "time",
];

/// Redirect targets under these prefixes are denied
pub const SENSITIVE_REDIRECT_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/root", "/sys", "/proc", "/dev", "/var", "/lib",
];

/// Redirect targets allowed despite a sensitive prefix
pub const REDIRECT_EXEMPTIONS: &[&str] = &["/dev/null"];

// ============================================================
// Sensitive paths
// ============================================================

/// How a sensitive path entry is matched against a lowercased path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    /// A path component equal to the name, or starting with `name.`
    Segment(&'static str),
    /// The path ends with the text
    Suffix(&'static str),
    /// The path contains the text anywhere
    Contains(&'static str),
}

impl PathPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Segment(name) => path.split(['/', '\\']).any(|component| {
                component == *name
                    || component
                        .strip_prefix(name)
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
            PathPattern::Suffix(suffix) => path.ends_with(suffix),
            PathPattern::Contains(text) => path.contains(text),
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            PathPattern::Segment(s) | PathPattern::Suffix(s) | PathPattern::Contains(s) => s,
        }
    }
}

/// Sensitive file patterns with a short description
pub const SENSITIVE_PATH_PATTERNS: &[(PathPattern, &str)] = &[
    // Environment / secrets
    (PathPattern::Segment(".env"), "environment file"),
    (PathPattern::Contains("credentials"), "credentials file"),
    (PathPattern::Contains("private_key"), "private key"),
    (PathPattern::Suffix(".git-credentials"), "git credentials"),
    (PathPattern::Suffix(".netrc"), "network credentials"),
    (PathPattern::Suffix(".npmrc"), "npm credentials"),
    (PathPattern::Suffix(".pypirc"), "PyPI credentials"),
    // Key material
    (PathPattern::Suffix("id_rsa"), "RSA key"),
    (PathPattern::Suffix("id_dsa"), "DSA key"),
    (PathPattern::Suffix("id_ecdsa"), "ECDSA key"),
    (PathPattern::Suffix("id_ed25519"), "ED25519 key"),
    (PathPattern::Suffix(".pem"), "PEM certificate"),
    (PathPattern::Suffix(".key"), "private key"),
    (PathPattern::Suffix(".p12"), "PKCS#12 bundle"),
    (PathPattern::Suffix(".pfx"), "PKCS#12 bundle"),
    (PathPattern::Segment(".ssh"), "SSH directory"),
    (PathPattern::Segment(".gnupg"), "GPG keys"),
    // Shell history
    (PathPattern::Suffix(".bash_history"), "bash history"),
    (PathPattern::Suffix(".zsh_history"), "zsh history"),
    (PathPattern::Suffix(".python_history"), "python history"),
    // Cloud / cluster config
    (PathPattern::Segment(".aws"), "AWS credentials"),
    (PathPattern::Segment(".azure"), "Azure credentials"),
    (PathPattern::Contains(".config/gcloud"), "GCloud credentials"),
    (PathPattern::Segment(".kube"), "kube config"),
    (PathPattern::Contains(".docker/config.json"), "docker credentials"),
    // System accounts
    (PathPattern::Suffix("/etc/shadow"), "password hashes"),
    (PathPattern::Suffix("/etc/passwd"), "system users"),
    (PathPattern::Suffix("/etc/sudoers"), "sudo config"),
];

// ============================================================
// Environment
// ============================================================

/// Variable names containing any of these are stripped from environments
pub const SENSITIVE_ENV_SUBSTRINGS: &[&str] = &[
    "KEY",
    "SECRET",
    "TOKEN",
    "PASSWORD",
    "PASSWD",
    "CREDENTIAL",
    "PRIVATE",
    "AUTH",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_lowercase() {
        for (pattern, _) in DENIED_COMMAND_PATTERNS {
            assert_eq!(*pattern, pattern.to_lowercase());
        }
        for (pattern, _) in SENSITIVE_PATH_PATTERNS {
            assert_eq!(pattern.text(), pattern.text().to_lowercase());
        }
    }

    #[test]
    fn test_segment_pattern() {
        let env = PathPattern::Segment(".env");
        assert!(env.matches("/workspace/.env"));
        assert!(env.matches("/workspace/.env.local"));
        assert!(env.matches("/workspace/.env/file"));
        assert!(!env.matches("/workspace/.environment.rs"));
        assert!(!env.matches("/workspace/venv/lib"));
    }

    #[test]
    fn test_suffix_and_contains_patterns() {
        assert!(PathPattern::Suffix("id_rsa").matches("/home/user/.ssh/id_rsa"));
        assert!(!PathPattern::Suffix("id_rsa").matches("/home/user/id_rsa.pub"));
        assert!(PathPattern::Contains("credentials").matches("/x/aws_credentials_backup"));
    }
}
