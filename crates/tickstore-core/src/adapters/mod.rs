//! Provider adapters.
//!
//! | Adapter | Description |
//! |---------|-------------|
//! | [`YahooProvider`] | Yahoo Finance quoteSummary and chart endpoints |
//! | [`FixtureProvider`] | Deterministic offline data with scripted failures |

pub mod fixture;
pub mod yahoo;

pub use fixture::{FixtureProvider, ProviderCall};
pub use yahoo::{YahooAuth, YahooProvider};
