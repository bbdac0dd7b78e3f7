//! Stage templates for the standard delivery pipeline

use acp_core::roles;

/// Static description of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTemplate {
    pub node_id: &'static str,
    pub role: &'static str,
    pub timeout_s: u64,
    pub max_retries: u32,
    /// Previous stage, if any
    pub after: Option<&'static str>,
}

/// The pipeline, in execution order
pub const STAGES: [StageTemplate; 4] = [
    StageTemplate {
        node_id: "coding",
        role: roles::CODER,
        timeout_s: 45 * 60,
        max_retries: 2,
        after: None,
    },
    StageTemplate {
        node_id: "testing",
        role: roles::TESTER,
        timeout_s: 30 * 60,
        max_retries: 2,
        after: Some("coding"),
    },
    StageTemplate {
        node_id: "reviewing",
        role: roles::REVIEWER,
        timeout_s: 20 * 60,
        max_retries: 1,
        after: Some("testing"),
    },
    StageTemplate {
        node_id: "releasing",
        role: roles::RELEASE,
        timeout_s: 20 * 60,
        max_retries: 1,
        after: Some("reviewing"),
    },
];
