//! Column-name constants for the production pipeline.
//! Single source of truth - exported to Python via PyO3.

// ── Preprocessor columns ────────────────────────────────────────────────────
pub mod preprocessed {
    pub const NUMERIC_DRIVER: &str = "numeric_driver";
    pub const PERIOD: &str = "period";
}

// ── Wide table columns ──────────────────────────────────────────────────────
pub mod wide {
    pub const ID: &str = "ID";
    pub const DEFAULT_ID_SEPARATOR: &str = " | ";
}

// ── Rate validation detail columns ──────────────────────────────────────────
pub mod rate_qa {
    pub const DISTINCT_RATE_COUNT: &str = "distinct_rate_count";
    pub const MIN_RATE: &str = "min_rate";
    pub const MAX_RATE: &str = "max_rate";
    pub const RATE_SPREAD: &str = "rate_spread";
    pub const EXAMPLE_RATE: &str = "example_rate";
}

// ── Column operations ───────────────────────────────────────────────────────
pub mod operation {
    pub const SUM: &str = "sum";
    pub const MULTIPLY: &str = "multiply";
    pub const DIVIDE: &str = "divide";
}

// ── Export stages ───────────────────────────────────────────────────────────
pub mod stage {
    pub const TRANSFORMED: &str = "transformed";
    pub const AGGREGATED: &str = "aggregated";
    pub const SMOOTHED: &str = "smoothed";
    pub const RATE_QA: &str = "rate_qa";
}
