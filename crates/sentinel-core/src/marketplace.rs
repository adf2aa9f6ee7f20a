//! Re-exports the ruleset marketplace client so CLI callers depend on
//! this crate alone.

pub use sentinel_marketplace::{
    InstalledRuleset, MarketplaceClient, MarketplaceError, MarketplaceOptions,
};
