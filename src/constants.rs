/// Dataset names written under the sink output directory.
/// Keep these in sync with the `inspect` subcommand.
pub const JOINED_DATASET: &str = "joined";
pub const TOP_PRODUCTS_DATASET: &str = "top_products";
pub const MONTHLY_SALES_DATASET: &str = "monthly_sales";
pub const TURNOVER_DATASET: &str = "turnover";
pub const ACTIVE_USERS_DATASET: &str = "active_users";

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";

// Environment overrides
pub const ENV_OUTPUT_DIR: &str = "SHOP_ETL_OUTPUT_DIR";
pub const ENV_SALT: &str = "SHOP_ETL_SALT";
pub const ENV_PARTITIONS: &str = "SHOP_ETL_PARTITIONS";
pub const ENV_METRICS_ADDR: &str = "SHOP_ETL_METRICS_ADDR";

/// Get all dataset names produced by a batch run
pub fn batch_datasets() -> Vec<&'static str> {
    vec![
        JOINED_DATASET,
        TOP_PRODUCTS_DATASET,
        MONTHLY_SALES_DATASET,
        TURNOVER_DATASET,
    ]
}
