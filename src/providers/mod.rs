//! Market-data endpoint implementations

pub mod coinmarketcap;

pub use coinmarketcap::CoinMarketCapClient;
