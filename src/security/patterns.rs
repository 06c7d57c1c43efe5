//! Content patterns checked by the classifier.
//!
//! Patterns are grouped into categories; every category carries the
//! minimum threat level a match implies.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::error;

use crate::types::ThreatLevel;

/// Kind of suspicious content a pattern detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    SqlInjection,
    ScriptInjection,
    CodeEval,
    PromptInjection,
    RoleSpoofing,
    Jailbreak,
    CredentialProbe,
    CredentialLeak,
    PersonalData,
    CommandExecution,
    DestructiveCommand,
}

impl ThreatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::ScriptInjection => "script_injection",
            Self::CodeEval => "code_eval",
            Self::PromptInjection => "prompt_injection",
            Self::RoleSpoofing => "role_spoofing",
            Self::Jailbreak => "jailbreak",
            Self::CredentialProbe => "credential_probe",
            Self::CredentialLeak => "credential_leak",
            Self::PersonalData => "personal_data",
            Self::CommandExecution => "command_execution",
            Self::DestructiveCommand => "destructive_command",
        }
    }

    /// Minimum level a match in this category implies.
    pub fn severity(&self) -> ThreatLevel {
        match self {
            Self::CredentialProbe => ThreatLevel::Low,
            Self::CodeEval | Self::RoleSpoofing | Self::PersonalData => ThreatLevel::Medium,
            Self::SqlInjection
            | Self::ScriptInjection
            | Self::PromptInjection
            | Self::Jailbreak
            | Self::CredentialLeak => ThreatLevel::High,
            Self::CommandExecution | Self::DestructiveCommand => ThreatLevel::Critical,
        }
    }
}

impl std::fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct ThreatPattern {
    pub category: ThreatCategory,
    pub regex: Regex,
}

const PATTERN_SOURCES: &[(ThreatCategory, &str)] = &[
    (
        ThreatCategory::SqlInjection,
        r"(?i)\b(union\s+(all\s+)?select|insert\s+into|drop\s+(table|database)|delete\s+from|truncate\s+table)\b",
    ),
    (ThreatCategory::SqlInjection, r"(?i)'\s*or\s+'?1'?\s*=\s*'?1"),
    (
        ThreatCategory::ScriptInjection,
        r"(?i)(<\s*script\b|javascript\s*:|data\s*:\s*text/html|\bon(load|error)\s*=)",
    ),
    (
        ThreatCategory::CodeEval,
        r"(?i)\b(eval|settimeout|setinterval)\s*\(|\bnew\s+function\s*\(",
    ),
    (
        ThreatCategory::PromptInjection,
        r"(?i)\b(ignore|disregard|forget)\s+(all\s+)?(the\s+|your\s+|any\s+)?(previous|prior|above|earlier)\s+(instructions|prompts|rules)",
    ),
    (
        ThreatCategory::PromptInjection,
        r"(?i)\b(forget|ignore)\s+(your\s+)?instructions\b|\bnew\s+instructions\s*:",
    ),
    (
        ThreatCategory::PromptInjection,
        r"(?i)\b(reveal|print|show|repeat)\s+(me\s+)?(your|the)\s+(system\s+prompt|hidden\s+instructions|initial\s+prompt)",
    ),
    (
        ThreatCategory::RoleSpoofing,
        r"(?im)^\s*(system|assistant)\s*:|\buser\s*:.*\badmin\b",
    ),
    (
        ThreatCategory::Jailbreak,
        r"(?i)\b(jailbreak|dan\s+mode|developer\s+mode|do\s+anything\s+now)\b",
    ),
    (
        ThreatCategory::CredentialProbe,
        r"(?i)\b(passwords?|api[\s_-]?keys?|secrets?|access[\s_-]?tokens?|credentials?)\b",
    ),
    (
        ThreatCategory::CredentialLeak,
        r"\b(sk-[A-Za-z0-9_-]{20,}|AKIA[0-9A-Z]{16}|gh[pousr]_[A-Za-z0-9]{36})\b",
    ),
    (
        ThreatCategory::PersonalData,
        r"(?i)\b(ssn|social\s+security(\s+number)?|credit\s+card(\s+number)?|bank\s+account)\b",
    ),
    (ThreatCategory::PersonalData, r"\b\d{3}-\d{2}-\d{4}\b"),
    (
        ThreatCategory::CommandExecution,
        r"\b(exec|system|shell_exec|passthru|popen|proc_open)\(",
    ),
    (
        ThreatCategory::DestructiveCommand,
        r"(?i)(\brm\s+-[a-z]*r[a-z]*f|\brm\s+-[a-z]*f[a-z]*r|\bdel\s+/[sqf]|\bformat\s+c:|\bmkfs(\.\w+)?\s+/dev/)",
    ),
];

pub(crate) static PATTERNS: LazyLock<Vec<ThreatPattern>> = LazyLock::new(|| {
    PATTERN_SOURCES
        .iter()
        .filter_map(|(category, source)| match Regex::new(source) {
            Ok(regex) => Some(ThreatPattern {
                category: *category,
                regex,
            }),
            Err(e) => {
                error!(category = %category, error = %e, "invalid threat pattern skipped");
                None
            }
        })
        .collect()
});
