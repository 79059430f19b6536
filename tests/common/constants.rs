//! Shared constants for end-to-end tests

// ============================================================================
// Projects
// ============================================================================

/// Analysed on day 2
pub const PROJECT_A: &str = "project-a";

/// Analysed on day 1
pub const PROJECT_B: &str = "project-b";

/// Never analysed
pub const PROJECT_C: &str = "project-c";

pub const DAY_MS: i64 = 86_400_000;

// ============================================================================
// Branches
// ============================================================================

pub const A_MAIN: &str = "a-main";
pub const A_PR: &str = "a-pr-12";
pub const B_MAIN: &str = "b-main";
pub const C_MAIN: &str = "c-main";

/// Monitor tick used by the tests, in milliseconds
pub const MONITOR_TICK_MS: u64 = 10;
